//! Preamble detection and PPM demodulation (§4.2).

use crate::{
    Cursor,
    Magnitude,
};

/// Preamble: 8 µs / 16 samples at 2 Msps.
pub(crate) const PREAMBLE_SAMPLES: usize = 16;

#[derive(Clone, Copy, Debug)]
pub enum Frame {
    ModeSShort { data: [u8; 7] },
    ModeSLong { data: [u8; 14] },
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        match self {
            Frame::ModeSShort { data } => &data[..],
            Frame::ModeSLong { data } => &data[..],
        }
    }
}

/// A raw demodulated message: bytes, a linear signal-level estimate, and the
/// cursor position (in samples) where its preamble started.
#[derive(Clone, Copy, Debug)]
pub struct RawMessage {
    pub frame: Frame,
    pub signal_level: f64,
    pub preamble_position: usize,
    pub uncertain_bits: usize,
}

enum DemodFail {
    NotEnoughSamples,
    Invalid,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Quality {
    /// Accept every bit as-is, never mark anything uncertain.
    NoChecks,
    #[default]
    /// Mark a bit uncertain if its two samples are within ~12% of each other.
    Default,
}

/// Demodulates Mode S frames out of a stream of magnitude buffers.
///
/// Stateful only in the sense that it remembers the uncertain-bit budget for
/// the frame currently being read; it does not retain any data across calls
/// beyond what the caller passes back in via [`Cursor`].
#[derive(Debug)]
pub struct Demodulator {
    quality: Quality,
    max_uncertain_bits: usize,
}

impl Default for Demodulator {
    fn default() -> Self {
        Self::new(Quality::default(), 5)
    }
}

impl Demodulator {
    pub fn new(quality: Quality, max_uncertain_bits: usize) -> Self {
        Self {
            quality,
            max_uncertain_bits,
        }
    }

    /// Scans forward from `cursor.position`, returning the first demodulated
    /// message found and leaving the cursor just past it. Returns `None` if
    /// no complete frame could be found before the buffer ran out; the
    /// cursor is left at the start of a possible partial preamble so the
    /// caller can retain the tail for the next call (§4.2 edge case).
    pub fn next(&mut self, cursor: &mut Cursor) -> Option<RawMessage> {
        while find_preamble(cursor) {
            let preamble_position = cursor.position - PREAMBLE_SAMPLES;
            let mut frame_cursor = *cursor;

            match self.read_frame(preamble_position, &mut frame_cursor) {
                Ok(message) => {
                    cursor.position = frame_cursor.position;
                    return Some(message);
                }
                Err(DemodFail::NotEnoughSamples) => {
                    cursor.position = preamble_position;
                    return None;
                }
                Err(DemodFail::Invalid) => {
                    // keep scanning from just after this preamble
                }
            }
        }

        None
    }

    fn read_frame(
        &mut self,
        preamble_position: usize,
        cursor: &mut Cursor,
    ) -> Result<RawMessage, DemodFail> {
        let mut uncertain_bits = 0;

        let first_byte = self.read_byte(cursor, &mut uncertain_bits)?;

        let frame = if first_byte & 0x80 == 0 {
            Frame::ModeSShort {
                data: self.read_rest(first_byte, cursor, &mut uncertain_bits)?,
            }
        }
        else {
            Frame::ModeSLong {
                data: self.read_rest(first_byte, cursor, &mut uncertain_bits)?,
            }
        };

        if uncertain_bits > self.max_uncertain_bits {
            return Err(DemodFail::Invalid);
        }

        let signal_level = signal_level_at(cursor.samples, preamble_position);

        Ok(RawMessage {
            frame,
            signal_level,
            preamble_position,
            uncertain_bits,
        })
    }

    fn read_rest<const N: usize>(
        &mut self,
        first_byte: u8,
        cursor: &mut Cursor,
        uncertain_bits: &mut usize,
    ) -> Result<[u8; N], DemodFail> {
        let mut data = [0u8; N];
        data[0] = first_byte;
        for byte in data.iter_mut().skip(1) {
            *byte = self.read_byte(cursor, uncertain_bits)?;
        }
        Ok(data)
    }

    fn read_byte(&mut self, cursor: &mut Cursor, uncertain_bits: &mut usize) -> Result<u8, DemodFail> {
        if cursor.remaining().len() < 2 * 8 {
            return Err(DemodFail::NotEnoughSamples);
        }

        let mut byte = 0u8;
        for _ in 0..8 {
            byte <<= 1;
            if self.read_bit(cursor, uncertain_bits) {
                byte |= 1;
            }
        }
        Ok(byte)
    }

    /// One bit is 1 µs = 2 samples; bit is 1 if the first sample is greater.
    fn read_bit(&mut self, cursor: &mut Cursor, uncertain_bits: &mut usize) -> bool {
        let a = cursor.samples[cursor.position];
        let b = cursor.samples[cursor.position + 1];
        cursor.advance(2);

        if self.quality != Quality::NoChecks && is_roughly_equal(a, b) {
            *uncertain_bits += 1;
        }

        a > b
    }
}

/// True if `a` and `b` are within ~12% of the larger of the two — the "both
/// samples roughly equal" case from §4.2.
#[inline(always)]
fn is_roughly_equal(a: Magnitude, b: Magnitude) -> bool {
    let diff = a.abs_diff(b);
    let larger = a.max(b).max(1);
    diff * 8 < larger
}

fn signal_level_at(samples: &[Magnitude], preamble_position: usize) -> f64 {
    let peaks = [
        samples[preamble_position],
        samples[preamble_position + 2],
        samples[preamble_position + 7],
        samples[preamble_position + 9],
    ];
    let mean = peaks.iter().map(|&m| f64::from(m)).sum::<f64>() / 4.0;
    mean * mean
}

/// Tests the exact pulse/silence pattern from §4.2 at `cursor.position`.
fn is_preamble(samples: &[Magnitude]) -> bool {
    let m = samples;

    if !(m[0] > m[1]
        && m[2] > m[1]
        && m[2] > m[3]
        && m[3] < m[4]
        && m[4] < m[5]
        && m[5] < m[6]
        && m[6] > m[7]
        && m[7] > m[8]
        && m[8] > m[9]
        && m[9] > m[10])
    {
        return false;
    }

    let peak_mean = (f64::from(m[0]) + f64::from(m[2]) + f64::from(m[7]) + f64::from(m[9])) / 4.0;
    let silence_threshold = peak_mean / 2.0;

    m[11..14].iter().all(|&s| f64::from(s) < silence_threshold)
}

fn find_preamble(cursor: &mut Cursor) -> bool {
    loop {
        let remaining = cursor.remaining();
        if remaining.len() >= PREAMBLE_SAMPLES {
            if is_preamble(remaining) {
                cursor.advance(PREAMBLE_SAMPLES);
                return true;
            }
            cursor.advance(1);
        }
        else {
            return false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::init_magnitude_table;

    fn modulate(data: &[u8], mut sample: impl FnMut(bool) -> u16) -> Vec<u16> {
        let mut samples = vec![];

        // pulses at 0, 2, 7, 9
        let mut preamble: u16 = 0b1010_0001_0100_0000;
        for _ in 0..16 {
            samples.push(sample(preamble & 0x8000 != 0));
            preamble <<= 1;
        }

        for mut byte in data.iter().copied() {
            for _ in 0..8 {
                if byte & 0x80 == 0 {
                    samples.push(sample(true));
                    samples.push(sample(false));
                }
                else {
                    samples.push(sample(false));
                    samples.push(sample(true));
                }
                byte <<= 1;
            }
        }

        samples
    }

    fn best_signal(signal: bool) -> u16 {
        if signal { 60000 } else { 0 }
    }

    #[test]
    fn demodulates_a_long_frame() {
        init_magnitude_table();
        let input = b"\x8d\x40\x74\xb5\x23\x15\xa6\x76\xdd\x13\xa0\x66\x29\x67";
        let samples = modulate(input, best_signal);

        let mut demodulator = Demodulator::new(Quality::NoChecks, 0);
        let mut cursor = Cursor {
            samples: &samples[..],
            position: 0,
        };

        let message = demodulator.next(&mut cursor).expect("no frame demodulated");
        match message.frame {
            Frame::ModeSLong { data } => assert_eq!(&data, input),
            _ => panic!("expected a long frame"),
        }
        assert_eq!(message.preamble_position, 0);
    }

    #[test]
    fn overlapping_calls_are_idempotent() {
        init_magnitude_table();
        let input = b"\x8d\x40\x74\xb5\x23\x15\xa6\x76\xdd\x13\xa0\x66\x29\x67";
        // pad with noise before the preamble to give a non-zero offset
        let mut samples = vec![0u16; 20];
        samples.extend(modulate(input, best_signal));

        let mut demodulator = Demodulator::new(Quality::NoChecks, 0);
        let mut cursor = Cursor {
            samples: &samples[..],
            position: 0,
        };
        let message = demodulator.next(&mut cursor).expect("no frame demodulated");
        assert_eq!(message.preamble_position, 20);

        // a second call starting anywhere at or before the preamble finds the
        // same message at the same position.
        let mut cursor2 = Cursor {
            samples: &samples[..],
            position: 5,
        };
        let message2 = demodulator.next(&mut cursor2).expect("no frame demodulated");
        assert_eq!(message2.preamble_position, 20);
    }

    #[test]
    fn short_frame_detected_from_top_bit() {
        init_magnitude_table();
        // DF11 (0x5d = 0b01011101, top bit 0) is a short, 7-byte frame.
        let input = b"\x5d\x48\x40\xd6\x20\x2c\xc3";
        let samples = modulate(input, best_signal);

        let mut demodulator = Demodulator::new(Quality::NoChecks, 0);
        let mut cursor = Cursor {
            samples: &samples[..],
            position: 0,
        };
        let message = demodulator.next(&mut cursor).expect("no frame demodulated");
        match message.frame {
            Frame::ModeSShort { data } => assert_eq!(&data, input),
            _ => panic!("expected a short frame"),
        }
    }
}
