//! 13-bit (DF0/4/16/20) and 12-bit (DF17/18 airborne position) altitude
//! fields: M selects feet vs metres, Q selects 25-ft vs 100-ft (Gillham)
//! coding (§4.3 point 5).

use crate::gillham;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AltitudeUnit {
    Feet,
    Meters,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Altitude {
    pub value: i32,
    pub unit: AltitudeUnit,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid altitude code")]
pub struct BadAltitude;

/// Decodes a 13-bit altitude field (DF0/4/16/20). Bit 6 (`0x0040`) is M, bit
/// 4 (`0x0010`) is Q.
pub fn decode_13(field: u16) -> Result<Altitude, BadAltitude> {
    if field == 0 {
        return Err(BadAltitude);
    }

    let m_bit = field & 0x0040 != 0;
    let q_bit = field & 0x0010 != 0;

    if m_bit {
        // metric altitude is rare in practice and the exact sub-field
        // layout is unspecified by DO-260B; report the raw code.
        return Ok(Altitude {
            value: i32::from(field & !0x0040),
            unit: AltitudeUnit::Meters,
        });
    }

    if q_bit {
        let n = ((field & 0x1f80) >> 2) | ((field & 0x0020) >> 1) | (field & 0x000f);
        Ok(Altitude {
            value: i32::from(n) * 25 - 1000,
            unit: AltitudeUnit::Feet,
        })
    }
    else {
        let gillham = gillham::unscramble(field);
        let hundreds = gillham::gray_to_hundreds_of_feet(gillham).map_err(|_| BadAltitude)?;
        Ok(Altitude {
            value: hundreds * 100,
            unit: AltitudeUnit::Feet,
        })
    }
}

/// Decodes the 12-bit altitude field used in DF17/18 airborne-position ME
/// fields — same encoding as [`decode_13`] but with the M bit never present
/// and one fewer spare bit ahead of Q.
pub fn decode_12(field: u16) -> Result<Altitude, BadAltitude> {
    if field == 0 {
        return Err(BadAltitude);
    }

    let q_bit = field & 0x0010 != 0;

    if q_bit {
        let n = ((field & 0x0fe0) >> 1) | (field & 0x000f);
        Ok(Altitude {
            value: i32::from(n) * 25 - 1000,
            unit: AltitudeUnit::Feet,
        })
    }
    else {
        let n13 = ((field & 0x0fc0) << 1) | (field & 0x003f);
        let gillham = gillham::unscramble(n13);
        let hundreds = gillham::gray_to_hundreds_of_feet(gillham).map_err(|_| BadAltitude)?;
        Ok(Altitude {
            value: hundreds * 100,
            unit: AltitudeUnit::Feet,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_13_with_q_bit_is_25ft_steps() {
        let n: u16 = 0b101_0010_1001; // arbitrary 11-bit value
        let top_six = (n >> 5) & 0x3f;
        let mid_bit = (n >> 4) & 1;
        let low_four = n & 0xf;
        let field = (top_six << 7) | (mid_bit << 5) | 0x0010 | low_four;

        let altitude = decode_13(field).unwrap();
        assert_eq!(altitude.unit, AltitudeUnit::Feet);
        assert_eq!(altitude.value, i32::from(n) * 25 - 1000);
    }

    #[test]
    fn decode_13_zero_is_invalid() {
        assert_eq!(decode_13(0), Err(BadAltitude));
    }
}
