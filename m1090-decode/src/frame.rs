//! Top-level frame decoder: downlink-format dispatch, CRC verification and
//! ME-type fan-out (§4.3).

use crate::{
    altitude, crc, gillham, identification,
    message::{Decoded, DownlinkFormat, IcaoAddress, MessageSource},
    position, squawk::Squawk, velocity,
    attributes::Attributes,
};

pub const LENGTH_SHORT: usize = 7;
pub const LENGTH_LONG: usize = 14;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame too short to contain a valid downlink format")]
    ShortFrame,
    #[error(transparent)]
    BadCrc(#[from] CrcMismatch),
    #[error("unknown downlink format {0}")]
    UnknownDf(u8),
    #[error("bad altitude encoding")]
    BadAltitude,
    #[error("bad squawk encoding")]
    BadSquawk,
}

/// Wraps [`crc::CrcError`] so [`FrameError`] doesn't need to name the crc
/// module's error type directly in its public signature.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CrcMismatch {
    #[error("CRC residue did not match and no single-bit correction fixed it")]
    BadCrc,
    #[error("two or more single-bit corrections produce a valid CRC; rejecting as ambiguous")]
    AmbiguousCorrection,
}

impl From<crc::CrcError> for CrcMismatch {
    fn from(value: crc::CrcError) -> Self {
        match value {
            crc::CrcError::BadCrc => Self::BadCrc,
            crc::CrcError::AmbiguousCorrection => Self::AmbiguousCorrection,
        }
    }
}

/// Decodes a raw 7- or 14-byte frame. `cache` supplies recently-seen ICAO
/// addresses for frames whose trailer is `ICAO XOR AP` rather than a bare
/// checksum (§4.3 point 2).
pub fn decode(raw: &[u8], cache: &crc::IcaoCache) -> Result<Decoded, FrameError> {
    if raw.len() < LENGTH_SHORT {
        return Err(FrameError::ShortFrame);
    }

    let df_value = raw[0] >> 3;
    let df = DownlinkFormat::from_bits(df_value).ok_or(FrameError::UnknownDf(df_value))?;

    let expected_len = if df.is_short() { LENGTH_SHORT } else { LENGTH_LONG };
    if raw.len() < expected_len {
        return Err(FrameError::ShortFrame);
    }
    let frame = &raw[..expected_len];

    let verified = crc::verify(frame, df.trailer_is_direct_checksum(), cache)
        .map_err(|e| FrameError::BadCrc(e.into()))?;
    let frame = verified.frame;

    let address = IcaoAddress::new(verified.address);
    let mut decoded = Decoded::new(df, address);
    decoded.corrected_bit = verified.corrected.then_some(0);

    match df {
        DownlinkFormat::ShortAirAirSurveillance
        | DownlinkFormat::SurveillanceAltitude
        | DownlinkFormat::LongAirAirSurveillance
        | DownlinkFormat::CommBAltitude => {
            decode_altitude_reply(&frame, &mut decoded)?;
        }
        DownlinkFormat::SurveillanceIdentity | DownlinkFormat::CommBIdentity => {
            decode_identity_reply(&frame, &mut decoded)?;
        }
        DownlinkFormat::AllCallReply => {
            // carries only the address, already captured above.
        }
        DownlinkFormat::ExtendedSquitter => {
            decode_extended_squitter(&frame, &mut decoded, MessageSource::Adsb);
        }
        DownlinkFormat::ExtendedSquitterNonIcao => {
            decoded.address = decoded.address.with_non_icao_flag();
            decode_extended_squitter(&frame, &mut decoded, MessageSource::TisB);
        }
        DownlinkFormat::MilitaryExtendedSquitter | DownlinkFormat::CommD => {
            // status/target-state and military formats: parsed at the
            // frame level only, per §4.3 point 4's "subset used; rest
            // ignored but not errored".
        }
    }

    Ok(decoded)
}

fn altitude_field(frame: &[u8]) -> u16 {
    (u16::from(frame[2] & 0x1f) << 8) | u16::from(frame[3])
}

fn decode_altitude_reply(frame: &[u8], decoded: &mut Decoded) -> Result<(), FrameError> {
    let field = altitude_field(frame);
    if field == 0 {
        return Ok(());
    }
    let altitude = altitude::decode_13(field).map_err(|_| FrameError::BadAltitude)?;
    decoded.altitude = Some(altitude.value);
    decoded.attributes.insert(Attributes::ALTITUDE);
    Ok(())
}

fn decode_identity_reply(frame: &[u8], decoded: &mut Decoded) -> Result<(), FrameError> {
    let field = altitude_field(frame);
    if gillham::unscramble(field) == 0 {
        return Err(FrameError::BadSquawk);
    }
    decoded.squawk = Some(Squawk::decode_13(field));
    decoded.attributes.insert(Attributes::SQUAWK);
    Ok(())
}

fn decode_extended_squitter(frame: &[u8], decoded: &mut Decoded, source: MessageSource) {
    decoded.source = source;
    let me = &frame[4..11];
    let me_type = me[0] >> 3;
    decoded.me_type = Some(me_type);

    match me_type {
        1..=4 => {
            decoded.callsign = Some(identification::decode_callsign(me));
            decoded.category = Some(identification::category(me_type, me));
            decoded.attributes.insert(Attributes::CALLSIGN | Attributes::CATEGORY);
        }
        5..=8 => {
            let surface = position::decode_surface(me);
            decoded.cpr = Some(surface.cpr);
            decoded.speed = surface.speed;
            decoded.heading = surface.heading;
            decoded.aog = Some(true);
            decoded.attributes.insert(llparity_bit(surface.cpr.format) | Attributes::AOG | Attributes::AOG_VALID);
            if decoded.speed.is_some() {
                decoded.attributes.insert(Attributes::SPEED);
            }
            if decoded.heading.is_some() {
                decoded.attributes.insert(Attributes::HEADING);
            }
        }
        9..=18 | 20..=22 => {
            let airborne = position::decode_airborne(me_type, me);
            decoded.cpr = Some(airborne.cpr);
            decoded.nucp = Some(airborne.nucp);
            decoded.aog = Some(false);
            decoded.attributes.insert(llparity_bit(airborne.cpr.format) | Attributes::AOG_VALID);
            if let Some(altitude) = airborne.altitude {
                if me_type >= 20 {
                    decoded.altitude_hae = Some(altitude.value);
                    decoded.attributes.insert(Attributes::ALTITUDE_HAE);
                }
                else {
                    decoded.altitude = Some(altitude.value);
                    decoded.attributes.insert(Attributes::ALTITUDE);
                }
            }
        }
        19 => {
            let subtype = me[0] & 0x07;
            if let Some(velocity) = velocity::decode(subtype, me) {
                decoded.speed = Some(velocity.speed);
                decoded.heading = Some(velocity.heading);
                decoded.vertical_rate = velocity.vertical_rate;
                decoded.attributes.insert(Attributes::SPEED | Attributes::HEADING);
                if velocity.vertical_rate.is_some() {
                    decoded.attributes.insert(Attributes::VERTRATE);
                }
            }
        }
        // status/target-state (23-27), aircraft operational status (28, 29,
        // 31): recognised but not decoded, per §4.3 point 4. Keep the raw
        // ME bytes around rather than dropping them (SPEC_FULL §4.3).
        23..=31 => {
            let mut payload = [0u8; 7];
            payload.copy_from_slice(me);
            decoded.unparsed_me = Some((payload, me_type));
        }
        _ => {}
    }
}

fn llparity_bit(format: crate::cpr::CprFormat) -> Attributes {
    match format {
        crate::cpr::CprFormat::Even => Attributes::LLEVEN,
        crate::cpr::CprFormat::Odd => Attributes::LLODD,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_df11_all_call_reply() {
        let frame = hex::decode("5D4840D6202CC3").unwrap();
        let cache = crc::IcaoCache::default();
        let decoded = decode(&frame, &cache).unwrap();
        assert_eq!(decoded.address.value(), 0x4840D6);
        assert_eq!(decoded.df, Some(DownlinkFormat::AllCallReply));
    }

    #[test]
    fn decodes_df17_airborne_position() {
        let frame = hex::decode("8D40621D58C382D690C8AC2863A7").unwrap();
        let cache = crc::IcaoCache::default();
        let decoded = decode(&frame, &cache).unwrap();
        assert_eq!(decoded.me_type, Some(11));
        assert_eq!(decoded.altitude, Some(38000));
        assert!(decoded.attributes.intersects(Attributes::LLEITHER));
    }

    #[test]
    fn unknown_df_is_rejected() {
        // DF 2 is not one of the recognised downlink formats; the dispatch
        // on bits 0-4 happens before any length or CRC check.
        let mut frame = hex::decode("5D4840D6202CC3").unwrap();
        frame[0] = 2 << 3;
        let cache = crc::IcaoCache::default();
        assert_eq!(decode(&frame, &cache), Err(FrameError::UnknownDf(2)));
    }
}
