//! ME types 1-4: aircraft identification and category (§4.3 point 3).

/// The 6-bit character set used by callsign fields, indexed directly by the
/// field value (0-63).
const CHARSET: &[u8; 64] = b"#ABCDEFGHIJKLMNOPQRSTUVWXYZ##### ###############0123456789######";

/// Decodes an 8-character callsign from the 48 payload bits following the ME
/// type/sub-type byte (ME bytes 1-6). Trailing `'#'`/space fill characters
/// are trimmed.
pub fn decode_callsign(me: &[u8]) -> String {
    let mut bits = 0u64;
    for &byte in &me[1..7] {
        bits = (bits << 8) | u64::from(byte);
    }

    let mut chars = [0u8; 8];
    for (i, slot) in chars.iter_mut().enumerate() {
        let shift = 42 - i * 6;
        let code = ((bits >> shift) & 0x3f) as usize;
        *slot = CHARSET[code];
    }

    String::from_utf8_lossy(&chars)
        .trim_end_matches(['#', ' '])
        .to_string()
}

/// Aircraft emitter category, encoded as `(me_type << 3) | sub3` so that the
/// four identification ME types (1-4) each occupy a distinct, non-overlapping
/// byte range — the wire format only defines subtype meaning within a type,
/// not a single flat enum across types.
pub fn category(me_type: u8, me: &[u8]) -> u8 {
    let sub3 = me[0] & 0x07;
    (me_type << 3) | sub3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_a_known_callsign() {
        // "KLM1023 " packed 6 bits/char: K=0x0B L=0x0C M=0x0D 1=0x31&0x3f...
        // Build from the charset directly instead of hand-packing bits.
        let chars = "KLM1023 ";
        let codes: Vec<u8> = chars
            .bytes()
            .map(|c| CHARSET.iter().position(|&x| x == c).unwrap() as u8)
            .collect();

        let mut bits: u64 = 0;
        for &code in &codes {
            bits = (bits << 6) | u64::from(code);
        }
        bits <<= 64 - 48;

        let mut me = [0u8; 7];
        let bytes = bits.to_be_bytes();
        me[1..7].copy_from_slice(&bytes[0..6]);

        assert_eq!(decode_callsign(&me), "KLM1023");
    }

    #[test]
    fn category_packs_type_and_subtype() {
        let me = [0b0000_0011u8];
        assert_eq!(category(4, &me), (4 << 3) | 3);
    }
}
