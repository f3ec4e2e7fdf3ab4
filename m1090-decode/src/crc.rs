//! Mode S 24-bit parity: generator polynomial 0xFFF409 over the first 32 or
//! 88 bits, residue XORed into the trailing 24 bits of the frame (§4.3).

use std::collections::VecDeque;

/// <https://www.ll.mit.edu/sites/default/files/publication/doc/2018-12/Gertz_1984_ATC-117_WW-15318.pdf>
pub const CRC_24_MODES: crc::Algorithm<u32> = crc::Algorithm {
    width: 24,
    poly: 0xfff409,
    init: 0,
    refin: false,
    refout: false,
    xorout: 0x000000,
    check: 0x54268,
    residue: 0x000000,
};

/// Computes the residue of a complete frame (data bytes followed by its
/// 3-byte trailer). Zero for an uncorrupted DF11/17/18 frame; the ICAO
/// address for an uncorrupted DF0/4/5/16/20/21 frame.
pub fn residue(frame: &[u8]) -> u32 {
    crc::Crc::<u32>::new(&CRC_24_MODES).checksum(frame) & 0x00ff_ffff
}

/// Recently-seen ICAO addresses, consulted to validate the parity of frames
/// whose trailer is `ICAO XOR AP` rather than a bare checksum (DF0/4/5/16/
/// 20/21 — §4.3 point 2).
///
/// A fixed-capacity FIFO rather than a true LRU: Mode S traffic is dense
/// enough that recency of insertion tracks recency of use closely, and a
/// FIFO is cheaper to maintain under a lock shared with the decode hot path.
#[derive(Debug)]
pub struct IcaoCache {
    capacity: usize,
    order: VecDeque<u32>,
    set: std::collections::HashSet<u32>,
}

impl IcaoCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            set: std::collections::HashSet::with_capacity(capacity),
        }
    }

    pub fn contains(&self, icao: u32) -> bool {
        self.set.contains(&icao)
    }

    pub fn insert(&mut self, icao: u32) {
        if self.set.insert(icao) {
            self.order.push_back(icao);
            if self.order.len() > self.capacity {
                if let Some(evicted) = self.order.pop_front() {
                    self.set.remove(&evicted);
                }
            }
        }
    }
}

impl Default for IcaoCache {
    fn default() -> Self {
        // dump1090 uses a few thousand slots; a busy receiver sees a few
        // hundred distinct addresses per TTL window.
        Self::new(4096)
    }
}

/// Outcome of verifying (and possibly correcting) a frame's parity.
pub struct Verified {
    /// The frame, with a single bit flipped if correction was needed.
    pub frame: Vec<u8>,
    /// ICAO address, recovered either from the trailer directly (DF11/17/18)
    /// or from the residue (DF0/4/5/16/20/21).
    pub address: u32,
    pub corrected: bool,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CrcError {
    #[error("CRC residue did not match and no single-bit correction fixed it")]
    BadCrc,
    #[error("two or more single-bit corrections produce a valid CRC; rejecting as ambiguous")]
    AmbiguousCorrection,
}

/// Frames whose trailer directly carries the checksum (residue must be 0).
fn verify_direct(frame: &[u8]) -> Option<u32> {
    if residue(frame) == 0 {
        Some(address_from_announced(frame))
    }
    else {
        None
    }
}

/// Frames whose trailer carries `ICAO XOR AP`; residue equals the address
/// only when the frame is intact, so membership in `cache` is the accept
/// test.
fn verify_against_cache(frame: &[u8], cache: &IcaoCache) -> Option<u32> {
    let candidate = residue(frame);
    cache.contains(candidate).then_some(candidate)
}

/// The transmitted ICAO address for DF11/17/18 lives in the "address
/// announced" field (bytes 1-3), not the trailer — the trailer there is a
/// bare checksum, not `ICAO XOR AP`.
fn address_from_announced(frame: &[u8]) -> u32 {
    (u32::from(frame[1]) << 16) | (u32::from(frame[2]) << 8) | u32::from(frame[3])
}

fn flip_bit(frame: &mut [u8], bit: usize) {
    let byte = bit / 8;
    let shift = 7 - (bit % 8);
    frame[byte] ^= 1 << shift;
}

/// Verifies a frame's parity, attempting single-bit correction on failure.
///
/// `direct` selects whether the trailer is a bare checksum (DF11/17/18,
/// `true`) or `ICAO XOR AP` validated against `cache` (DF0/4/5/16/20/21,
/// `false`).
pub fn verify(frame: &[u8], direct: bool, cache: &IcaoCache) -> Result<Verified, CrcError> {
    let check = |f: &[u8]| -> Option<u32> {
        if direct {
            verify_direct(f)
        }
        else {
            verify_against_cache(f, cache)
        }
    };

    if let Some(address) = check(frame) {
        return Ok(Verified {
            frame: frame.to_vec(),
            address,
            corrected: false,
        });
    }

    let total_bits = frame.len() * 8;
    let mut found: Option<(usize, u32)> = None;

    for bit in 0..total_bits {
        let mut candidate = frame.to_vec();
        flip_bit(&mut candidate, bit);

        if let Some(address) = check(&candidate) {
            if let Some((previous_bit, _)) = found {
                if previous_bit != bit {
                    tracing::debug!(bit_a = previous_bit, bit_b = bit, "ambiguous single-bit CRC correction");
                    return Err(CrcError::AmbiguousCorrection);
                }
            }
            found = Some((bit, address));
        }
    }

    match found {
        Some((bit, address)) => {
            tracing::trace!(bit, address, "corrected single-bit CRC error");
            let mut corrected = frame.to_vec();
            flip_bit(&mut corrected, bit);
            Ok(Verified {
                frame: corrected,
                address,
                corrected: true,
            })
        }
        None => Err(CrcError::BadCrc),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The short DF11 fixture: first 7 bytes of the spec's literal hex.
    fn df11_fixture() -> Vec<u8> {
        hex::decode("5D4840D6202CC3").unwrap()
    }

    #[test]
    fn df11_residue_is_zero_and_address_is_announced_field() {
        let frame = df11_fixture();
        assert_eq!(residue(&frame), 0);

        let cache = IcaoCache::default();
        let verified = verify(&frame, true, &cache).expect("intact frame must verify");
        assert!(!verified.corrected);
        assert_eq!(verified.address, 0x4840D6);
    }

    #[test]
    fn single_bit_error_is_corrected() {
        let good = df11_fixture();

        let mut corrupted = good.clone();
        flip_bit(&mut corrupted, 37);
        assert_ne!(residue(&corrupted), 0);

        let cache = IcaoCache::default();
        let verified = verify(&corrupted, true, &cache).expect("should self-correct");
        assert!(verified.corrected);
        assert_eq!(verified.frame, good);
        assert_eq!(verified.address, 0x4840D6);
    }

    #[test]
    fn two_bit_error_is_ambiguous() {
        let mut corrupted = df11_fixture();
        flip_bit(&mut corrupted, 10);
        flip_bit(&mut corrupted, 40);

        let cache = IcaoCache::default();
        let result = verify(&corrupted, true, &cache);
        // two independent bit errors virtually never collapse to a
        // single-bit-correctable residue; either ambiguous or uncorrectable.
        assert!(matches!(result, Err(CrcError::AmbiguousCorrection) | Err(CrcError::BadCrc)));
    }

    #[test]
    fn icao_cache_evicts_oldest() {
        let mut cache = IcaoCache::new(2);
        cache.insert(1);
        cache.insert(2);
        cache.insert(3);
        assert!(!cache.contains(1));
        assert!(cache.contains(2));
        assert!(cache.contains(3));
    }
}
