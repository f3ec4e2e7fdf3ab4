//! Magnitude conversion and Mode S preamble detection / PPM demodulation.
//!
//! This is §4.1/§4.2 of the receiver: turn interleaved I/Q samples into
//! magnitudes with a precomputed lookup table, then slide a cursor across
//! the magnitude buffer looking for the 8 µs Mode S preamble and demodulate
//! whatever 56- or 112-bit frame follows it.

pub mod demodulator;
pub mod stream;

use std::{
    sync::OnceLock,
    task::{
        Context,
        Poll,
    },
};

use bytemuck::{
    Pod,
    Zeroable,
};

pub use crate::demodulator::{
    Demodulator,
    Quality,
    RawMessage,
};

/// Sample rate the demodulator expects: 2 Msamples/s.
pub const SAMPLE_RATE: u32 = 2_000_000;

/// A 16-bit interleaved I/Q sample, unsigned-8-bit per component (centred on
/// 127/127), as produced by most RTL-SDR style sources.
#[derive(Clone, Copy, Debug, Pod, Zeroable, PartialEq, Eq)]
#[repr(C)]
pub struct IqSample {
    pub i: u8,
    pub q: u8,
}

impl Default for IqSample {
    fn default() -> Self {
        Self { i: 127, q: 127 }
    }
}

/// A demodulated magnitude sample.
pub type Magnitude = u16;

/// 256×256 lookup table mapping (I, Q) to `round(sqrt(I^2 + Q^2) * scale)`.
///
/// Built once, lazily, the first time a sample is converted — but never on
/// the demod task's hot path for a live buffer, since the first buffer from
/// a freshly-opened source always pays for it during device warm-up. See
/// the REDESIGN FLAGS note in SPEC_FULL.md §4.1.
struct MagnitudeTable(Box<[u16; 256 * 256]>);

impl MagnitudeTable {
    fn build() -> Self {
        let mut table = vec![0u16; 256 * 256].into_boxed_slice();
        for i in 0..256usize {
            for q in 0..256usize {
                let fi = i as f64 - 127.5;
                let fq = q as f64 - 127.5;
                let magnitude = (fi * fi + fq * fq).sqrt();
                // scaled so that the maximal magnitude (corner of the IQ square)
                // comfortably fits a u16 with headroom for downstream squaring.
                let scaled = (magnitude * 360.0).round();
                table[i * 256 + q] = scaled.clamp(0.0, u16::MAX as f64) as u16;
            }
        }
        Self(table.try_into().expect("exact size"))
    }

    #[inline(always)]
    fn get(&self, sample: IqSample) -> u16 {
        self.0[usize::from(sample.i) * 256 + usize::from(sample.q)]
    }
}

static MAGNITUDE_TABLE: OnceLock<MagnitudeTable> = OnceLock::new();

/// Force the lookup table to be built now, rather than lazily on first use.
///
/// Call this during startup so the demod task never stalls building the
/// table while samples are already queuing up.
pub fn init_magnitude_table() {
    MAGNITUDE_TABLE.get_or_init(MagnitudeTable::build);
}

#[inline(always)]
pub fn magnitude_of(sample: IqSample) -> Magnitude {
    MAGNITUDE_TABLE.get_or_init(MagnitudeTable::build).get(sample)
}

/// Converts a buffer of I/Q samples into magnitudes in place.
///
/// Stateless and restartable on any buffer boundary (§4.1).
pub fn magnitude_buffer(samples: &[IqSample], out: &mut Vec<Magnitude>) {
    out.clear();
    out.extend(samples.iter().map(|s| magnitude_of(*s)));
}

/// A cursor over a magnitude buffer, shared between the preamble detector and
/// the bit demodulator.
#[derive(Clone, Copy, Debug)]
pub struct Cursor<'a> {
    pub samples: &'a [Magnitude],
    pub position: usize,
}

impl<'a> Cursor<'a> {
    #[inline(always)]
    pub fn advance(&mut self, amount: usize) {
        self.position += amount;
    }

    #[inline(always)]
    pub fn remaining(&self) -> &[Magnitude] {
        &self.samples[self.position..]
    }
}

/// Minimal asynchronous sample source interface (§6 "Sample source API").
///
/// The core does not assume a specific transport; any producer of 16-bit
/// magnitude-ready I/Q pairs can implement this.
pub trait AsyncReadSamples {
    type Error;

    fn poll_read_samples(
        self: std::pin::Pin<&mut Self>,
        cx: &mut Context<'_>,
        buffer: &mut [IqSample],
    ) -> Poll<Result<usize, Self::Error>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magnitude_table_is_symmetric_around_center() {
        init_magnitude_table();
        assert_eq!(
            magnitude_of(IqSample { i: 127, q: 127 }),
            magnitude_of(IqSample { i: 128, q: 128 })
        );
        assert!(magnitude_of(IqSample { i: 255, q: 255 }) > magnitude_of(IqSample { i: 127, q: 127 }));
    }

    #[test]
    fn magnitude_buffer_is_restartable() {
        init_magnitude_table();
        let samples = [
            IqSample { i: 200, q: 50 },
            IqSample { i: 10, q: 10 },
            IqSample { i: 127, q: 127 },
        ];
        let mut out = Vec::new();
        magnitude_buffer(&samples, &mut out);
        let first_pass = out.clone();
        magnitude_buffer(&samples[1..], &mut out);
        assert_eq!(out.as_slice(), &first_pass[1..]);
    }
}
