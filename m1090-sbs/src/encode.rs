//! Builds one SBS `MSG` record line per the SBS-1/BaseStation format.

use chrono::{DateTime, Utc};
use m1090_decode::{cpr::Position, message::Decoded, Attributes};

/// SBS floats are printed with fixed precision rather than Rust's default
/// `Display`, matching the column widths BaseStation clients expect.
fn format_coordinate(value: f64) -> String {
    format!("{value:.5}")
}

/// Chooses the transmission type the way a real receiver's feeder would:
/// by which fields this particular message carries, not by a fixed mapping
/// from downlink format (the SBS format predates ADS-B, and the generating
/// side can emit whichever MSG subtype best matches the content). Position
/// is a resolved lat/lon from the aircraft table, not `decoded` itself —
/// see [`encode_message`].
fn transmission_type(decoded: &Decoded, has_position: bool) -> u8 {
    if has_position && decoded.aog == Some(true) {
        2
    }
    else if has_position {
        3
    }
    else if decoded.attributes.intersects(Attributes::SPEED | Attributes::HEADING) {
        4
    }
    else if decoded.attributes.contains(Attributes::CALLSIGN) {
        1
    }
    else if decoded.attributes.contains(Attributes::ALTITUDE) {
        5
    }
    else if decoded.attributes.contains(Attributes::SQUAWK) {
        6
    }
    else {
        8
    }
}

/// Encodes one SBS `MSG` record. `session_id`/`aircraft_id` are the
/// receiver-local identifiers a BaseStation session assigns per connection
/// and per tracked aircraft; this core leaves their allocation to the
/// caller, matching the feeder/session split the format assumes.
///
/// `position` is the aircraft's current *resolved* lat/lon, if any — CPR
/// resolution happens in the aircraft table (§4.4), not on a single
/// [`Decoded`] message, so the caller (which holds the table entry) supplies
/// it rather than this function re-deriving it from `decoded.cpr` alone.
pub fn encode_message(
    decoded: &Decoded,
    position: Option<Position>,
    session_id: u32,
    aircraft_id: u32,
    now: DateTime<Utc>,
) -> String {
    let date = now.format("%Y/%m/%d");
    let time = now.format("%H:%M:%S%.3f");

    let hex = format!("{:06X}", decoded.address.value());
    let flight = decoded.callsign.as_deref().unwrap_or("");
    let altitude = decoded.altitude.map(|a| a.to_string()).unwrap_or_default();
    let speed = decoded.speed.map(|s| format!("{s:.0}")).unwrap_or_default();
    let track = decoded.heading.map(|h| format!("{h:.0}")).unwrap_or_default();
    let (lat, lon) = match position {
        Some(position) => (format_coordinate(position.latitude), format_coordinate(position.longitude)),
        None => (String::new(), String::new()),
    };
    let vertical_rate = decoded.vertical_rate.map(|v| v.to_string()).unwrap_or_default();
    let squawk = decoded.squawk.map(|s| s.as_octal_string()).unwrap_or_default();
    let on_ground = decoded.aog.map(|aog| if aog { "-1" } else { "0" }).unwrap_or_default();

    format!(
        "MSG,{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},,,,{}",
        transmission_type(decoded, position.is_some()),
        session_id,
        aircraft_id,
        hex,
        aircraft_id,
        date,
        time,
        date,
        time,
        flight,
        altitude,
        speed,
        track,
        lat,
        lon,
        vertical_rate,
        squawk,
        on_ground,
    )
}

#[cfg(test)]
mod tests {
    use m1090_decode::{message::DownlinkFormat, IcaoAddress};

    use super::*;

    #[test]
    fn encodes_a_minimal_all_call_reply() {
        let decoded = Decoded::new(DownlinkFormat::AllCallReply, IcaoAddress::new(0x4840d6));
        let now = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z").unwrap().with_timezone(&Utc);
        let line = encode_message(&decoded, None, 1, 1, now);
        assert!(line.starts_with("MSG,8,1,1,4840D6,1,2024/01/01,00:00:00.000"));
    }

    #[test]
    fn includes_resolved_position_when_given() {
        let decoded = Decoded::new(DownlinkFormat::ExtendedSquitter, IcaoAddress::new(0x4840d6));
        let now = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z").unwrap().with_timezone(&Utc);
        let position = Position { latitude: 52.25720, longitude: 3.91937 };
        let line = encode_message(&decoded, Some(position), 1, 1, now);
        assert_eq!(transmission_type(&decoded, true), 3);
        assert!(line.contains("52.25720,3.91937"));
    }
}
