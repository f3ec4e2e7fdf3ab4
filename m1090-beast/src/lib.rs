//! Beast binary wire format (§4.7): a feeder encoding used by the `dump1090`
//! family and widely consumed downstream (virtual radar clients, FlightAware,
//! FlightRadar24 feeders).
//!
//! Encoding is a pure, synchronous `&[u8] -> Vec<u8>` transform — there's no
//! state to carry between messages. Decoding (used only to ingest an
//! upstream MLAT-tagged Beast feed, per the crate's scope) is a
//! `Stream` adapter over `AsyncRead`, grounded on the same escape-handling
//! state machine a Beast receiver implementation uses on its input side.

mod decode;
mod encode;

pub use decode::{DecodeError, Reader};
pub use encode::{encode_long, encode_mode_ac, encode_short};

/// Beast packet type byte (§4.7).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PacketType {
    ModeAc,
    ModeSShort,
    ModeSLong,
}

impl PacketType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x31 => Some(Self::ModeAc),
            0x32 => Some(Self::ModeSShort),
            0x33 => Some(Self::ModeSLong),
            _ => None,
        }
    }

    pub fn as_byte(&self) -> u8 {
        match self {
            Self::ModeAc => 0x31,
            Self::ModeSShort => 0x32,
            Self::ModeSLong => 0x33,
        }
    }

    pub fn payload_len(&self) -> usize {
        match self {
            Self::ModeAc => 2,
            Self::ModeSShort => 7,
            Self::ModeSLong => 14,
        }
    }
}

/// A decoded Beast record: timestamp (48-bit, 12MHz clock), signal level and
/// the raw payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BeastMessage {
    pub packet_type: PacketType,
    pub timestamp: u64,
    pub signal_level: u8,
    pub payload: Vec<u8>,
}
