//! The bounded channel between the source task and the decode task (§5):
//! a single producer, single consumer queue of raw sample chunks. Full is
//! handled by dropping the chunk the source just read rather than blocking
//! the read loop — a stalled decode task must never back up into the
//! source driver. Counted via `DecodeStats::record_source_buffer_dropped`.

use std::{
    pin::Pin,
    task::{Context, Poll},
};

use m1090_demod::{AsyncReadSamples, IqSample};
use tokio::sync::mpsc;

/// Chunks of this many samples are handed from the source task to the
/// decode task; matches `m1090_demod::stream`'s own read granularity.
pub const CHUNK_SAMPLES: usize = 4096;

const CHANNEL_CAPACITY: usize = 8;

pub fn channel() -> (mpsc::Sender<Box<[IqSample]>>, ChannelSource) {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    (tx, ChannelSource { receiver: rx, pending: Box::new([]), pending_offset: 0 })
}

/// Adapts the receiving half of the channel into [`AsyncReadSamples`], so
/// the decode task can hand it straight to `DemodulateStream` exactly as it
/// would a live driver.
pub struct ChannelSource {
    receiver: mpsc::Receiver<Box<[IqSample]>>,
    pending: Box<[IqSample]>,
    pending_offset: usize,
}

impl AsyncReadSamples for ChannelSource {
    type Error = std::convert::Infallible;

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

            match this.receiver.poll_recv(cx) {
                Poll::Ready(Some(chunk)) => {
                    this.pending = chunk;
                    this.pending_offset = 0;
                }
                Poll::Ready(None) => return Poll::Ready(Ok(0)),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use futures_util::future::poll_fn;
    use std::pin::Pin;

    use super::*;

    #[tokio::test]
    async fn forwards_chunks_from_sender_to_source() {
        let (tx, mut source) = channel();
        tx.send(vec![IqSample { i: 1, q: 2 }, IqSample { i: 3, q: 4 }].into_boxed_slice())
            .await
            .unwrap();
        drop(tx);

        let mut buf = [IqSample::default(); 4];
        let n = poll_fn(|cx| Pin::new(&mut source).poll_read_samples(cx, &mut buf)).await.unwrap();
        assert_eq!(n, 2);
        assert_eq!(buf[0], IqSample { i: 1, q: 2 });

        let n = poll_fn(|cx| Pin::new(&mut source).poll_read_samples(cx, &mut buf)).await.unwrap();
        assert_eq!(n, 0);
    }
}
