//! ME type 19: airborne velocity (§4.3 point 3, fixture scenario #4).

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Velocity {
    pub speed: f64,
    pub heading: f64,
    pub vertical_rate: Option<i32>,
}

/// Decodes ME type 19 subtypes 1/2 (ground speed) and 3/4 (airspeed).
/// `me` is the full 7-byte ME field, `subtype` its low 3 bits.
pub fn decode(subtype: u8, me: &[u8]) -> Option<Velocity> {
    match subtype {
        1 | 2 => decode_ground_speed(me),
        3 | 4 => decode_air_speed(me),
        _ => None,
    }
}

fn decode_ground_speed(me: &[u8]) -> Option<Velocity> {
    let ew_dir = (me[1] & 0x04) >> 2;
    let ew_velocity = (u32::from(me[1] & 0x03) << 8) | u32::from(me[2]);

    let ns_dir = (me[3] & 0x80) >> 7;
    let ns_velocity = (u32::from(me[3] & 0x7f) << 3) | (u32::from(me[4] & 0xe0) >> 5);

    if ew_velocity == 0 || ns_velocity == 0 {
        return None;
    }

    let ew = if ew_dir != 0 { -(f64::from(ew_velocity) - 1.0) } else { f64::from(ew_velocity) - 1.0 };
    let ns = if ns_dir != 0 { -(f64::from(ns_velocity) - 1.0) } else { f64::from(ns_velocity) - 1.0 };

    let speed = (ns * ns + ew * ew).sqrt();
    let mut heading = ew.atan2(ns).to_degrees();
    if heading < 0.0 {
        heading += 360.0;
    }

    Some(Velocity {
        speed,
        heading,
        vertical_rate: decode_vertical_rate(me),
    })
}

fn decode_air_speed(me: &[u8]) -> Option<Velocity> {
    let heading_status = me[1] & 0x04 != 0;
    let heading_raw = (u32::from(me[1] & 0x03) << 8) | u32::from(me[2]);
    let airspeed = (u32::from(me[3] & 0x7f) << 3) | (u32::from(me[4] & 0xe0) >> 5);

    if airspeed == 0 {
        return None;
    }

    let heading = if heading_status {
        f64::from(heading_raw) * 360.0 / 1024.0
    }
    else {
        return None;
    };

    Some(Velocity {
        speed: f64::from(airspeed - 1),
        heading,
        vertical_rate: decode_vertical_rate(me),
    })
}

fn decode_vertical_rate(me: &[u8]) -> Option<i32> {
    let sign = (me[4] & 0x08) >> 3;
    let raw = (u32::from(me[4] & 0x07) << 6) | (u32::from(me[5] & 0xfc) >> 2);
    if raw == 0 {
        return None;
    }
    let magnitude = (raw as i32 - 1) * 64;
    Some(if sign != 0 { -magnitude } else { magnitude })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scenario #4's literal fixture: `8D485020994409940838175B284F`. Bytes
    /// 4-10 of the frame are the 7-byte ME field `99 44 09 94 08 38 17`,
    /// decoding to 159kt / 182.88deg / -832 ft/min.
    #[test]
    fn ground_speed_matches_known_fixture() {
        let me = hex::decode("99440994083817").unwrap();
        let velocity = decode(1, &me).expect("ground speed should decode");

        approx::assert_abs_diff_eq!(velocity.speed, 159.20, epsilon = 0.5);
        approx::assert_abs_diff_eq!(velocity.heading, 182.88, epsilon = 0.1);
        assert_eq!(velocity.vertical_rate, Some(-832));
    }
}
