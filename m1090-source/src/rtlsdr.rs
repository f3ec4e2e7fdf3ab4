//! Wraps an `rtlsdr-async` device as an [`AsyncReadSamples`] source.

use std::{
    pin::Pin,
    task::{Context, Poll},
};

use futures_util::Stream;
use m1090_demod::{AsyncReadSamples, IqSample};
use rtlsdr_async::{Error as DeviceError, Gain, RtlSdr, Samples};

use crate::MODE_S_FREQUENCY_HZ;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Tuner configuration applied when a source is opened. `gain` of `None`
/// leaves AGC enabled; `Some(_)` disables AGC and applies a manual gain.
#[derive(Clone, Copy, Debug)]
pub struct TunerConfig {
    pub device_index: u32,
    pub frequency_correction_ppm: i32,
    pub gain: Option<Gain>,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self { device_index: 0, frequency_correction_ppm: 0, gain: None }
    }
}

/// Live RTL-SDR sample source, tuned to 1090 MHz at the demodulator's
/// expected 2 Msamples/s.
pub struct RtlSdrSource {
    stream: Samples<rtlsdr_async::Iq>,
    pending: Vec<IqSample>,
    pending_offset: usize,
}

impl RtlSdrSource {
    pub async fn open(config: TunerConfig) -> Result<Self, Error> {
        let device = RtlSdr::open(config.device_index)?;
        device.set_center_frequency(MODE_S_FREQUENCY_HZ).await?;
        device.set_sample_rate(m1090_demod::SAMPLE_RATE).await?;
        device.set_frequency_correction(config.frequency_correction_ppm).await?;
        match config.gain {
            Some(gain) => {
                device.set_agc_mode(false).await?;
                device.set_tuner_gain(gain).await?;
            }
            None => device.set_agc_mode(true).await?,
        }

        let stream = device.samples().await?;
        Ok(Self { stream, pending: Vec::new(), pending_offset: 0 })
    }
}

impl AsyncReadSamples for RtlSdrSource {
    type Error = Error;

    fn poll_read_samples(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buffer: &mut [IqSample],
    ) -> Poll<Result<usize, Self::Error>> {
        let this = self.get_mut();

        loop {
            if this.pending_offset < this.pending.len() {
                let available = &this.pending[this.pending_offset..];
                let n = available.len().min(buffer.len());
                buffer[..n].copy_from_slice(&available[..n]);
                this.pending_offset += n;
                return Poll::Ready(Ok(n));
            }

            match Pin::new(&mut this.stream).poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    this.pending.clear();
                    this.pending.extend(chunk.samples().iter().map(|iq| IqSample { i: iq.i, q: iq.q }));
                    this.pending_offset = 0;
                }
                Poll::Ready(Some(Err(error))) => return Poll::Ready(Err(error.into())),
                Poll::Ready(None) => return Poll::Ready(Ok(0)),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
