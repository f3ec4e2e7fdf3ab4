//! Mode S / ADS-B frame decoding: CRC verification and correction, CPR
//! position resolution, Gillham/Gray altitude and squawk decoding, and
//! extended-squitter ME-type dispatch.

pub mod altitude;
pub mod attributes;
pub mod cpr;
pub mod crc;
pub mod frame;
pub mod gillham;
pub mod identification;
pub mod message;
pub mod modeac;
pub mod position;
pub mod squawk;
pub mod velocity;

pub use attributes::Attributes;
pub use crc::{CrcError, IcaoCache};
pub use frame::{decode, FrameError};
pub use message::{Decoded, DownlinkFormat, IcaoAddress, MessageSource};
