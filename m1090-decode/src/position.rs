//! ME types 5-8 (surface position) and 9-18/20-22 (airborne position)
//! (§4.3 point 3, §4.4).

use crate::altitude::{self, Altitude};
use crate::cpr::{CprFormat, CprObservation};

/// The fields an airborne-position ME field (9-18 barometric, 20-22 HAE)
/// carries besides the CPR observation itself.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AirbornePosition {
    pub cpr: CprObservation,
    pub altitude: Option<Altitude>,
    pub nucp: u8,
}

/// Extracts a CPR observation and altitude from an airborne-position ME
/// field. `me_type` 9-18 carries barometric altitude via [`altitude::decode_12`];
/// 20-22 carries HAE and is reported without unit conversion since the
/// 12-bit field's units differ by encoding convention the receiver alone
/// cannot resolve.
pub fn decode_airborne(me_type: u8, me: &[u8]) -> AirbornePosition {
    let alt_field = (u16::from(me[1]) << 4) | (u16::from(me[2]) >> 4);
    let altitude = altitude::decode_12(alt_field).ok();

    let odd = me[2] & 0x04 != 0;
    let lat = (u32::from(me[2] & 0x03) << 15) | (u32::from(me[3]) << 7) | (u32::from(me[4]) >> 1);
    let lon = (u32::from(me[4] & 0x01) << 16) | (u32::from(me[5]) << 8) | u32::from(me[6]);

    AirbornePosition {
        cpr: CprObservation {
            format: CprFormat::from_odd_flag(odd),
            lat,
            lon,
        },
        altitude,
        nucp: nucp_for_type(me_type),
    }
}

/// Maps ME type (9-18) to the Navigation Uncertainty Category for Position
/// per the type-to-NUCp table (DO-260A Table 2-14): type 9 carries the
/// tightest bound (NUCp 9), type 18 the loosest (NUCp 0).
fn nucp_for_type(me_type: u8) -> u8 {
    match me_type {
        9 => 9,
        10 => 8,
        11 => 7,
        12 => 6,
        13 => 6,
        14 => 5,
        15 => 4,
        16 => 3,
        17 => 2,
        18 => 1,
        _ => 0,
    }
}

/// Surface-position ME fields (5-8): ground speed/track come from the same
/// bit positions an airborne field would use for altitude, plus CPR.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SurfacePosition {
    pub cpr: CprObservation,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
}

pub fn decode_surface(me: &[u8]) -> SurfacePosition {
    let movement = me[0] & 0x7f;
    let speed = decode_movement(movement);

    let heading_status = me[1] & 0x08 != 0;
    let heading_raw = ((u16::from(me[1]) & 0x07) << 4) | (u16::from(me[2]) >> 4);
    let heading = heading_status.then(|| f64::from(heading_raw) * 360.0 / 128.0);

    let odd = me[2] & 0x04 != 0;
    let lat = (u32::from(me[2] & 0x03) << 15) | (u32::from(me[3]) << 7) | (u32::from(me[4]) >> 1);
    let lon = (u32::from(me[4] & 0x01) << 16) | (u32::from(me[5]) << 8) | u32::from(me[6]);

    SurfacePosition {
        cpr: CprObservation {
            format: CprFormat::from_odd_flag(odd),
            lat,
            lon,
        },
        speed,
        heading,
    }
}

/// Decodes the 7-bit ground movement (speed) field used by surface-position
/// ME fields, a piecewise-linear table rather than a fixed step size
/// (DO-260A Table 2-11).
fn decode_movement(movement: u8) -> Option<f64> {
    match movement {
        0 => None,
        1 => Some(0.0),
        2..=8 => Some(0.125 + f64::from(movement - 2) * 0.125),
        9..=12 => Some(1.0 + f64::from(movement - 9) * 0.25),
        13..=38 => Some(2.0 + f64::from(movement - 13) * 0.5),
        39..=93 => Some(15.0 + f64::from(movement - 39)),
        94..=108 => Some(70.0 + f64::from(movement - 94) * 2.0),
        109..=123 => Some(100.0 + f64::from(movement - 109) * 5.0),
        124 => Some(175.0),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_a_known_airborne_position_fixture() {
        // spec's literal scenario #3: 8D40621D58C382D690C8AC2863A7
        let frame = hex::decode("8D40621D58C382D690C8AC2863A7").unwrap();
        let me = &frame[4..11];
        let position = decode_airborne(11, me);

        assert_eq!(position.cpr.format, CprFormat::Even);
        let altitude = position.altitude.expect("altitude should decode");
        assert_eq!(altitude.value, 38000);
    }

    #[test]
    fn movement_field_zero_is_unavailable() {
        assert_eq!(decode_movement(0), None);
    }

    #[test]
    fn movement_field_is_monotonic() {
        let mut previous = -1.0;
        for m in 1..=124u8 {
            if let Some(speed) = decode_movement(m) {
                assert!(speed >= previous);
                previous = speed;
            }
        }
    }
}
