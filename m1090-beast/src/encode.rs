//! Beast record encoding (§4.7): `0x1A, type, 6-byte big-endian timestamp,
//! 1-byte signal, payload`, with any `0x1A` byte in the record doubled.

use crate::PacketType;

fn unescaped_body(packet_type: PacketType, timestamp: u64, signal_level: u8, payload: &[u8]) -> Vec<u8> {
    debug_assert_eq!(payload.len(), packet_type.payload_len());

    let mut body = Vec::with_capacity(1 + 6 + 1 + payload.len());
    body.push(packet_type.as_byte());

    let timestamp_bytes = timestamp.to_be_bytes();
    body.extend_from_slice(&timestamp_bytes[2..8]); // low 48 bits
    body.push(signal_level);
    body.extend_from_slice(payload);
    body
}

fn encode(packet_type: PacketType, timestamp: u64, signal_level: u8, payload: &[u8]) -> Vec<u8> {
    let body = unescaped_body(packet_type, timestamp, signal_level, payload);

    let mut escaped = Vec::with_capacity(body.len() * 2 + 1);
    escaped.push(0x1a);
    for &byte in &body {
        if byte == 0x1a {
            escaped.push(0x1a);
        }
        escaped.push(byte);
    }
    escaped
}

pub fn encode_mode_ac(timestamp: u64, signal_level: u8, payload: &[u8; 2]) -> Vec<u8> {
    encode(PacketType::ModeAc, timestamp, signal_level, payload)
}

pub fn encode_short(timestamp: u64, signal_level: u8, payload: &[u8; 7]) -> Vec<u8> {
    encode(PacketType::ModeSShort, timestamp, signal_level, payload)
}

pub fn encode_long(timestamp: u64, signal_level: u8, payload: &[u8; 14]) -> Vec<u8> {
    encode(PacketType::ModeSLong, timestamp, signal_level, payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_every_0x1a_byte_exactly_once() {
        let payload: [u8; 7] = [0x1a, 0x00, 0x1a, 0x1a, 0x00, 0x00, 0x00];
        let body = unescaped_body(PacketType::ModeSShort, 0, 0, &payload);
        let record = encode_short(0, 0, &payload);

        let body_1a_count = body.iter().filter(|&&b| b == 0x1a).count();
        // the leading marker plus one doubled copy per 0x1a byte in the body.
        assert_eq!(record.len(), 1 + body.len() + body_1a_count);
        assert_eq!(record[0], 0x1a);
    }

    #[test]
    fn short_record_has_type_byte_0x32() {
        let record = encode_short(12345, 200, &[0u8; 7]);
        assert_eq!(record[0], 0x1a);
        assert_eq!(record[1], 0x32);
    }
}
