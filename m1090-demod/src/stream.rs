//! Adapts an [`AsyncReadSamples`] source into a [`Stream`] of demodulated
//! messages, retaining a tail of unconsumed magnitudes across reads so a
//! preamble or frame split across two reads is never lost (§4.2).

use std::{
    pin::Pin,
    task::{
        Context,
        Poll,
    },
};

use futures_util::Stream;
use pin_project_lite::pin_project;

use crate::{
    AsyncReadSamples,
    Cursor,
    Demodulator,
    IqSample,
    Magnitude,
    RawMessage,
    magnitude_of,
};

/// Raw samples are read in chunks of this size before being converted and
/// handed to the demodulator.
const CHUNK_SAMPLES: usize = 4096;

pin_project! {
    /// A [`Stream`] of [`RawMessage`] demodulated from a raw sample source.
    pub struct DemodulateStream<S> {
        #[pin]
        source: S,
        demodulator: Demodulator,
        magnitudes: Vec<Magnitude>,
        position: usize,
        read_buf: Box<[IqSample]>,
    }
}

impl<S> DemodulateStream<S> {
    pub fn new(source: S, demodulator: Demodulator) -> Self {
        Self {
            source,
            demodulator,
            magnitudes: Vec::new(),
            position: 0,
            read_buf: vec![IqSample::default(); CHUNK_SAMPLES].into_boxed_slice(),
        }
    }
}

impl<S> Stream for DemodulateStream<S>
where
    S: AsyncReadSamples,
{
    type Item = Result<RawMessage, S::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            {
                let mut cursor = Cursor {
                    samples: &this.magnitudes[..],
                    position: *this.position,
                };
                if let Some(message) = this.demodulator.next(&mut cursor) {
                    *this.position = cursor.position;
                    return Poll::Ready(Some(Ok(message)));
                }
                *this.position = cursor.position;
            }

            // compact away samples we've already scanned past; what's left
            // from `position` onward is the tail that might still hold a
            // partial preamble or frame.
            if *this.position > 0 {
                this.magnitudes.drain(0..*this.position);
                *this.position = 0;
            }

            match this.source.as_mut().poll_read_samples(cx, this.read_buf) {
                Poll::Ready(Ok(0)) => return Poll::Ready(None),
                Poll::Ready(Ok(n)) => {
                    this.magnitudes.extend(this.read_buf[..n].iter().map(|s| magnitude_of(*s)));
                }
                Poll::Ready(Err(error)) => return Poll::Ready(Some(Err(error))),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        pin::Pin,
        task::{
            Context,
            Poll,
        },
    };

    use futures_util::StreamExt;

    use super::*;
    use crate::{
        Quality,
        init_magnitude_table,
    };

    /// A source that hands out samples in small, fixed-size chunks, forcing
    /// the stream to retain a tail across at least one `poll_read_samples`
    /// boundary.
    struct ChunkedSource {
        chunks: VecDeque<Vec<IqSample>>,
    }

    impl AsyncReadSamples for ChunkedSource {
        type Error = std::convert::Infallible;

        fn poll_read_samples(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buffer: &mut [IqSample],
        ) -> Poll<Result<usize, Self::Error>> {
            let this = self.get_mut();
            match this.chunks.pop_front() {
                Some(chunk) => {
                    buffer[..chunk.len()].copy_from_slice(&chunk);
                    Poll::Ready(Ok(chunk.len()))
                }
                None => Poll::Ready(Ok(0)),
            }
        }
    }

    fn modulate_iq(data: &[u8]) -> Vec<IqSample> {
        let hi = IqSample { i: 200, q: 200 };
        let lo = IqSample { i: 127, q: 127 };

        let mut samples = vec![];
        let mut preamble: u16 = 0b1010_0001_0100_0000;
        for _ in 0..16 {
            samples.push(if preamble & 0x8000 != 0 { hi } else { lo });
            preamble <<= 1;
        }

        for mut byte in data.iter().copied() {
            for _ in 0..8 {
                if byte & 0x80 == 0 {
                    samples.push(hi);
                    samples.push(lo);
                }
                else {
                    samples.push(lo);
                    samples.push(hi);
                }
                byte <<= 1;
            }
        }
        samples
    }

    #[tokio::test]
    async fn demodulates_a_frame_split_across_chunk_boundaries() {
        init_magnitude_table();
        let input = b"\x8d\x40\x74\xb5\x23\x15\xa6\x76\xdd\x13\xa0\x66\x29\x67";
        let samples = modulate_iq(input);

        // split right in the middle of the preamble to force tail retention.
        let split = 5;
        let chunks = VecDeque::from([samples[..split].to_vec(), samples[split..].to_vec()]);

        let source = ChunkedSource { chunks };
        let mut stream = DemodulateStream::new(source, Demodulator::new(Quality::NoChecks, 0));

        let message = stream.next().await.expect("stream ended early").expect("decode error");
        assert_eq!(message.frame.as_ref(), input);

        assert!(stream.next().await.is_none());
    }
}
