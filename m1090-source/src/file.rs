//! Adapts a raw interleaved I/Q byte stream (a recording, or a pipe from
//! `rtl_sdr -s 2048000 -f 1090000000 -`) into [`AsyncReadSamples`], for
//! replay and tests.

use std::{
    pin::Pin,
    task::{Context, Poll},
};

use m1090_demod::{AsyncReadSamples, IqSample};
use tokio::io::{AsyncRead, ReadBuf};

/// Wraps any [`AsyncRead`] of raw `u8` I/Q pairs. An odd trailing byte at
/// the end of a read is held over to the next call rather than discarded,
/// the same way `RtlTcpClient` carries an `incomplete_sample` byte across
/// reads of its raw stream.
pub struct ReaderSource<R> {
    reader: R,
    incomplete_sample: Option<u8>,
    read_buf: Vec<u8>,
}

impl<R> ReaderSource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, incomplete_sample: None, read_buf: Vec::new() }
    }
}

impl<R: AsyncRead + Unpin> AsyncReadSamples for ReaderSource<R> {
    type Error = std::io::Error;

    fn poll_read_samples(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buffer: &mut [IqSample],
    ) -> Poll<Result<usize, Self::Error>> {
        let this = self.get_mut();

        let wanted_bytes = buffer.len() * 2;
        this.read_buf.resize(wanted_bytes, 0);

        let mut read_buf = ReadBuf::new(&mut this.read_buf);
        if let Some(i) = this.incomplete_sample.take() {
            read_buf.put_slice(&[i]);
        }

        match Pin::new(&mut this.reader).poll_read(cx, &mut read_buf) {
            Poll::Ready(Ok(())) => {
                let filled = read_buf.filled();
                let pairs = filled.len() / 2;
                for (sample, chunk) in buffer[..pairs].iter_mut().zip(filled.chunks_exact(2)) {
                    *sample = IqSample { i: chunk[0], q: chunk[1] };
                }
                if filled.len() % 2 == 1 {
                    this.incomplete_sample = Some(filled[filled.len() - 1]);
                }
                Poll::Ready(Ok(pairs))
            }
            Poll::Ready(Err(error)) => Poll::Ready(Err(error)),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use futures_util::future::poll_fn;

    use super::*;

    #[tokio::test]
    async fn reads_whole_samples_from_a_byte_slice() {
        let data: &[u8] = &[10, 20, 30, 40, 50];
        let mut source = ReaderSource::new(data);
        let mut buffer = [IqSample::default(); 4];

        let n = poll_fn(|cx| Pin::new(&mut source).poll_read_samples(cx, &mut buffer)).await.unwrap();
        assert_eq!(n, 2);
        assert_eq!(buffer[0], IqSample { i: 10, q: 20 });
        assert_eq!(buffer[1], IqSample { i: 30, q: 40 });
        assert_eq!(source.incomplete_sample, Some(50));
    }
}
