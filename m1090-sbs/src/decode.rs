//! SBS line decoding, for ingesting an upstream MLAT-tagged SBS feed
//! (§1 Non-goals: MLAT is ingested, not produced).
//!
//! Grounded on the readsb encoder's field layout:
//! <https://github.com/wiedehopf/readsb/blob/75decb53c0e66f4c12cf24127578a3fe7d919219/net_io.c#L3318>

use std::{
    pin::Pin,
    str::{FromStr, Utf8Error},
    task::{Context, Poll},
};

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use futures_util::Stream;
use m1090_decode::{squawk::Squawk, IcaoAddress};
use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, ReadBuf};

const RECEIVE_BUFFER_SIZE: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("line too long for the receive buffer")]
    LineTooLong,
    #[error(transparent)]
    InvalidEncoding(#[from] Utf8Error),
    #[error(transparent)]
    InvalidMessage(#[from] MessageParseError),
}

/// A decoded SBS `MSG` transmission, the only record type this core's
/// publishers ever emit and the only one consumed from an upstream feed.
#[derive(Clone, Debug)]
pub struct Message {
    pub transmission_type: u8,
    pub session_id: u32,
    pub aircraft_id: u32,
    pub address: IcaoAddress,
    pub time_generated: DateTime<Utc>,
    pub callsign: Option<String>,
    pub altitude: Option<i32>,
    pub ground_speed: Option<f64>,
    pub track: Option<f64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub vertical_rate: Option<i32>,
    pub squawk: Option<Squawk>,
    pub is_on_ground: Option<bool>,
}

#[derive(Debug, thiserror::Error)]
pub enum MessageParseError {
    #[error("not a MSG record")]
    NotAMessageRecord,
    #[error("truncated SBS record")]
    Truncated,
    #[error("invalid field {field}: {value:?}")]
    InvalidField { field: &'static str, value: String },
}

fn field<'a>(fields: &mut std::str::Split<'a, char>) -> Result<&'a str, MessageParseError> {
    fields.next().ok_or(MessageParseError::Truncated)
}

fn parse_optional<T: FromStr>(value: &str, name: &'static str) -> Result<Option<T>, MessageParseError> {
    if value.is_empty() {
        Ok(None)
    }
    else {
        value
            .parse()
            .map(Some)
            .map_err(|_| MessageParseError::InvalidField { field: name, value: value.to_owned() })
    }
}

fn parse_bool_field(value: &str, name: &'static str) -> Result<Option<bool>, MessageParseError> {
    match value {
        "" => Ok(None),
        "0" => Ok(Some(false)),
        "-1" => Ok(Some(true)),
        _ => Err(MessageParseError::InvalidField { field: name, value: value.to_owned() }),
    }
}

impl FromStr for Message {
    type Err = MessageParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut fields = line.split(',');

        if field(&mut fields)? != "MSG" {
            return Err(MessageParseError::NotAMessageRecord);
        }

        let transmission_type = field(&mut fields)?
            .parse()
            .map_err(|_| MessageParseError::InvalidField { field: "transmission_type", value: line.to_owned() })?;
        let session_id = field(&mut fields)?
            .parse()
            .map_err(|_| MessageParseError::InvalidField { field: "session_id", value: line.to_owned() })?;
        let aircraft_id = field(&mut fields)?
            .parse()
            .map_err(|_| MessageParseError::InvalidField { field: "aircraft_id", value: line.to_owned() })?;

        let hex = field(&mut fields)?;
        let address = u32::from_str_radix(hex, 16)
            .map(IcaoAddress::new)
            .map_err(|_| MessageParseError::InvalidField { field: "hex_ident", value: hex.to_owned() })?;

        let _flight_id = field(&mut fields)?;

        const DATE_FORMAT: &str = "%Y/%m/%d";
        const TIME_FORMAT: &str = "%H:%M:%S%.3f";
        let date_generated = field(&mut fields)?;
        let time_generated_raw = field(&mut fields)?;
        let _date_logged = field(&mut fields)?;
        let _time_logged = field(&mut fields)?;

        let time_generated = NaiveDate::parse_from_str(date_generated, DATE_FORMAT)
            .and_then(|d| NaiveTime::parse_from_str(time_generated_raw, TIME_FORMAT).map(|t| d.and_time(t)))
            .map(|naive| naive.and_utc())
            .map_err(|_| MessageParseError::InvalidField { field: "time_generated", value: line.to_owned() })?;

        let callsign = field(&mut fields)?;
        let callsign = (!callsign.is_empty()).then(|| callsign.trim().replace('@', " "));

        let altitude = parse_optional::<i32>(field(&mut fields)?, "altitude")?;
        let ground_speed = parse_optional::<f64>(field(&mut fields)?, "ground_speed")?;
        let track = parse_optional::<f64>(field(&mut fields)?, "track")?;
        let latitude = parse_optional::<f64>(field(&mut fields)?, "latitude")?;
        let longitude = parse_optional::<f64>(field(&mut fields)?, "longitude")?;
        let vertical_rate = parse_optional::<i32>(field(&mut fields)?, "vertical_rate")?;

        let squawk_raw = field(&mut fields)?;
        let squawk = (!squawk_raw.is_empty())
            .then(|| {
                // Squawk packs each octal digit into its own nibble (so
                // `as_octal_string` can print it with `{:04x}`), so a
                // 4-digit squawk parses the same way under radix 16.
                u16::from_str_radix(squawk_raw, 16)
                    .map(Squawk::from_octal_digits_unchecked)
                    .map_err(|_| MessageParseError::InvalidField { field: "squawk", value: squawk_raw.to_owned() })
            })
            .transpose()?;

        let _alert = field(&mut fields)?;
        let _emergency = field(&mut fields)?;
        let _spi = field(&mut fields)?;
        let is_on_ground = parse_bool_field(field(&mut fields)?, "is_on_ground")?;

        Ok(Message {
            transmission_type,
            session_id,
            aircraft_id,
            address,
            time_generated,
            callsign,
            altitude,
            ground_speed,
            track,
            latitude,
            longitude,
            vertical_rate,
            squawk,
            is_on_ground,
        })
    }
}

#[derive(Debug)]
struct ReceiveBuffer {
    buffer: [u8; RECEIVE_BUFFER_SIZE],
    read_pos: usize,
    write_pos: usize,
    scanned_until: usize,
}

impl Default for ReceiveBuffer {
    fn default() -> Self {
        Self { buffer: [0; RECEIVE_BUFFER_SIZE], read_pos: 0, write_pos: 0, scanned_until: 0 }
    }
}

impl ReceiveBuffer {
    fn next_line(&mut self) -> Result<Option<&[u8]>, DecodeError> {
        if let Some(offset) =
            self.buffer[self.scanned_until..self.write_pos].iter().position(|&b| b == b'\r' || b == b'\n')
        {
            let newline = self.scanned_until + offset;
            let start = self.read_pos;
            self.read_pos = newline + 1;
            self.scanned_until = self.read_pos;
            Ok(Some(&self.buffer[start..newline]))
        }
        else {
            self.scanned_until = self.write_pos;
            Ok(None)
        }
    }

    fn prepare_for_read(&mut self) -> Result<(), DecodeError> {
        if self.read_pos > 0 {
            self.buffer.copy_within(self.read_pos..self.write_pos, 0);
            self.write_pos -= self.read_pos;
            self.scanned_until -= self.read_pos;
            self.read_pos = 0;
        }
        if self.write_pos == self.buffer.len() {
            return Err(DecodeError::LineTooLong);
        }
        Ok(())
    }
}

pin_project! {
    /// A [`Stream`] of [`Message`]s decoded from a line-oriented SBS feed.
    pub struct Reader<R> {
        #[pin]
        reader: R,
        receive_buffer: ReceiveBuffer,
    }
}

impl<R> Reader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, receive_buffer: ReceiveBuffer::default() }
    }
}

impl<R: AsyncRead> Stream for Reader<R> {
    type Item = Result<Message, DecodeError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            let mut this = self.as_mut().project();

            match this.receive_buffer.next_line() {
                Ok(Some(line)) => {
                    // readsb sends blank lines as heartbeats; skip rather than error.
                    if line.is_empty() {
                        continue;
                    }
                    let parsed = std::str::from_utf8(line)
                        .map_err(DecodeError::from)
                        .and_then(|line| line.parse::<Message>().map_err(DecodeError::from));
                    return Poll::Ready(Some(parsed));
                }
                Ok(None) => {}
                Err(error) => return Poll::Ready(Some(Err(error))),
            }

            if let Err(error) = this.receive_buffer.prepare_for_read() {
                return Poll::Ready(Some(Err(error)));
            }

            let mut read_buf = ReadBuf::new(&mut this.receive_buffer.buffer[this.receive_buffer.write_pos..]);
            match this.reader.as_mut().poll_read(cx, &mut read_buf) {
                Poll::Ready(Ok(())) => {
                    let n = read_buf.filled().len();
                    if n == 0 {
                        return Poll::Ready(None);
                    }
                    this.receive_buffer.write_pos += n;
                }
                Poll::Ready(Err(error)) => return Poll::Ready(Some(Err(error.into()))),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;

    use super::*;

    const EXAMPLE: &str =
        "MSG,3,496,211,4CA2D6,10057,2008/11/28,14:53:50.594,2008/11/28,14:58:51.153,,37000,,,51.45735,-1.02826,,,0,0,0,0\r\n";

    #[test]
    fn parses_an_airborne_position_message() {
        let message: Message = EXAMPLE.trim_end().parse().unwrap();
        assert_eq!(message.address.value(), 0x4ca2d6);
        assert_eq!(message.altitude, Some(37000));
        assert_eq!(message.latitude, Some(51.45735));
    }

    #[tokio::test]
    async fn decodes_a_stream_of_one_message() {
        let mut reader = Reader::new(EXAMPLE.as_bytes());
        let message = reader.next().await.unwrap().unwrap();
        assert_eq!(message.address.value(), 0x4ca2d6);
        assert!(reader.next().await.is_none());
    }
}
