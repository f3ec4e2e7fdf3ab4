//! Sample sources feeding the demodulator (§6 "Sample source API"). Two
//! implementations of [`m1090_demod::AsyncReadSamples`] live here: a real
//! RTL-SDR driven through `rtlsdr-async`, and a byte-stream adapter used for
//! file replay and tests.

pub mod file;
pub mod rtlsdr;

pub use crate::{file::ReaderSource, rtlsdr::RtlSdrSource};

/// The frequency a Mode S / ADS-B receiver tunes to: 1090 MHz.
pub const MODE_S_FREQUENCY_HZ: u32 = 1_090_000_000;
