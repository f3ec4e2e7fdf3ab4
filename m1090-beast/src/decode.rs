//! Beast stream decoding, for ingesting an upstream MLAT-tagged Beast feed.
//! The escape-byte-doubling state machine mirrors a Beast receiver's input
//! side: bytes arrive one at a time, `0x1A 0x1A` collapses to a single
//! literal `0x1A`, and a lone `0x1A` followed by a type byte starts a new
//! record.

use std::{
    pin::Pin,
    task::{Context, Poll},
};

use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, ReadBuf};

use crate::{BeastMessage, PacketType};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unknown Beast packet type byte {0:#04x}")]
    UnknownType(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    WaitEscape,
    WaitType,
    /// Reading body bytes; `leading_escape` is true if the previous byte was
    /// an (unconsumed) `0x1A` awaiting its partner.
    Body { packet_type: PacketType, leading_escape: bool },
}

struct Decoder {
    state: State,
    body: Vec<u8>,
}

impl Decoder {
    fn new() -> Self {
        Self { state: State::WaitEscape, body: Vec::new() }
    }

    /// Feeds one byte; returns a completed message if this byte finished one.
    fn push_byte(&mut self, byte: u8) -> Result<Option<BeastMessage>, DecodeError> {
        match self.state {
            State::WaitEscape => {
                if byte == 0x1a {
                    self.state = State::WaitType;
                }
                Ok(None)
            }
            State::WaitType => {
                let packet_type = PacketType::from_byte(byte).ok_or(DecodeError::UnknownType(byte))?;
                self.body.clear();
                self.state = State::Body { packet_type, leading_escape: false };
                Ok(None)
            }
            State::Body { packet_type, leading_escape } => {
                if byte == 0x1a {
                    if leading_escape {
                        // doubled escape: one literal 0x1a byte in the body.
                        self.body.push(0x1a);
                        self.state = State::Body { packet_type, leading_escape: false };
                    }
                    else {
                        self.state = State::Body { packet_type, leading_escape: true };
                    }
                    return Ok(None);
                }

                if leading_escape {
                    // an unescaped 0x1a followed by a non-0x1a byte starts
                    // the next record; the current one is abandoned (short
                    // read / framing error upstream).
                    self.body.clear();
                    self.state = State::WaitType;
                    return self.push_byte(byte);
                }

                self.body.push(byte);

                let expected = 6 + 1 + packet_type.payload_len();
                if self.body.len() == expected {
                    let timestamp = self.body[0..6].iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b));
                    let signal_level = self.body[6];
                    let payload = self.body[7..].to_vec();
                    self.state = State::WaitEscape;
                    return Ok(Some(BeastMessage { packet_type, timestamp, signal_level, payload }));
                }
                Ok(None)
            }
        }
    }
}

pin_project! {
    /// A `Stream` of [`BeastMessage`]s decoded from an `AsyncRead` byte
    /// stream, used to ingest an upstream Beast feed (e.g. MLAT-tagged
    /// records forwarded by another receiver).
    pub struct Reader<R> {
        #[pin]
        reader: R,
        decoder: Decoder,
        read_buf: [u8; 4096],
    }
}

impl<R> Reader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, decoder: Decoder::new(), read_buf: [0u8; 4096] }
    }
}

impl<R: AsyncRead> futures_util::Stream for Reader<R> {
    type Item = std::io::Result<BeastMessage>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            let mut read_buf = ReadBuf::new(this.read_buf.as_mut_slice());
            match this.reader.as_mut().poll_read(cx, &mut read_buf) {
                Poll::Ready(Ok(())) => {
                    let filled = read_buf.filled();
                    if filled.is_empty() {
                        return Poll::Ready(None);
                    }
                    for &byte in filled {
                        match this.decoder.push_byte(byte) {
                            Ok(Some(message)) => return Poll::Ready(Some(Ok(message))),
                            Ok(None) => {}
                            Err(error) => {
                                return Poll::Ready(Some(Err(std::io::Error::new(
                                    std::io::ErrorKind::InvalidData,
                                    error,
                                ))));
                            }
                        }
                    }
                }
                Poll::Ready(Err(error)) => return Poll::Ready(Some(Err(error))),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;

    use super::*;
    use crate::encode_short;

    #[tokio::test]
    async fn decodes_a_stream_with_an_escaped_payload_byte() {
        let payload: [u8; 7] = [0x1a, 0x48, 0x40, 0xd6, 0x20, 0x2c, 0xc3];
        let encoded = encode_short(0x0102030405, 0xab, &payload);

        let mut reader = Reader::new(encoded.as_slice());
        let message = reader.next().await.unwrap().unwrap();

        assert_eq!(message.packet_type, PacketType::ModeSShort);
        assert_eq!(message.timestamp, 0x0102030405);
        assert_eq!(message.signal_level, 0xab);
        assert_eq!(message.payload, payload);
    }
}
