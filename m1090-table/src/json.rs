//! JSON snapshot publication (§4.6): a receiver descriptor and an aircraft
//! array, rebuilt on every tick and published via an atomic pointer swap
//! by the caller (the tick task owns the `ArcSwap`, not this module).

use chrono::{DateTime, Utc};
use m1090_decode::Attributes;
use serde_json::{Map, Value};

use crate::{aircraft::Aircraft, table::Table};

#[derive(Clone, Copy, Debug)]
pub struct JsonConfig {
    pub version: &'static str,
    pub refresh_ms: u64,
    pub history: u32,
    /// readsb/tar1090 field names (`altitude`/`vert_rate`/`speed`) vs the
    /// FlightAware-style aliases (`alt_baro`/`geom_rate`/`gs`), per §4.6's
    /// "compatibility flag".
    pub flightaware_aliases: bool,
}

impl Default for JsonConfig {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            refresh_ms: 250,
            history: 120,
            flightaware_aliases: false,
        }
    }
}

/// Builds `/data/receiver.json` (§4.6, §6).
pub fn receiver_document(config: &JsonConfig, home: Option<m1090_decode::cpr::Position>) -> Value {
    let mut doc = Map::new();
    doc.insert("version".into(), Value::String(config.version.into()));
    doc.insert("refresh".into(), Value::from(config.refresh_ms));
    doc.insert("history".into(), Value::from(config.history));
    if let Some(home) = home {
        doc.insert("lat".into(), Value::from(home.latitude));
        doc.insert("lon".into(), Value::from(home.longitude));
    }
    Value::Object(doc)
}

/// Builds `/data/aircraft.json`'s full document, `{now, messages, aircraft:
/// [...]}`, filtering to records with `LATLON && messages > 1` that aren't
/// Mode-A-only (§4.6).
pub fn aircraft_document(table: &Table, config: &JsonConfig, now: DateTime<Utc>) -> Value {
    let (total_messages, entries) = table.snapshot(|aircraft| {
        let total: u64 = aircraft.values().map(|a| a.messages).sum();
        let entries: Vec<Value> = aircraft
            .values()
            .filter(|a| is_published(a))
            .map(|a| aircraft_entry_value(a, config, now))
            .collect();
        (total, entries)
    });

    let mut doc = Map::new();
    doc.insert("now".into(), Value::from(now.timestamp_millis() as f64 / 1000.0));
    doc.insert("messages".into(), Value::from(total_messages));
    doc.insert("aircraft".into(), Value::Array(entries));
    Value::Object(doc)
}

fn is_published(aircraft: &Aircraft) -> bool {
    aircraft.attributes.contains(Attributes::LATLON) && aircraft.messages > 1 && aircraft.mode_s_seen
}

/// Builds one aircraft's JSON entry. Exposed separately from
/// [`aircraft_document`] so the interactive sorted view (§4.5, §6) can
/// render a table snapshot it has sorted itself without reimplementing the
/// field layout.
pub fn aircraft_entry_value(aircraft: &Aircraft, config: &JsonConfig, now: DateTime<Utc>) -> Value {
    let mut entry = Map::new();

    entry.insert("hex".into(), Value::String(aircraft.address.to_string()));

    if let Some(callsign) = &aircraft.callsign {
        entry.insert("flight".into(), Value::String(callsign.clone()));
    }
    if let Some(position) = &aircraft.position {
        entry.insert("lat".into(), Value::from(position.value.latitude));
        entry.insert("lon".into(), Value::from(position.value.longitude));
        entry.insert("seen_pos".into(), Value::from((now - position.time).num_milliseconds() as f64 / 1000.0));
    }
    if let Some(nucp) = aircraft.even_cpr.map(|s| s.nucp).or(aircraft.odd_cpr.map(|s| s.nucp)) {
        entry.insert("nucp".into(), Value::from(nucp));
    }
    if let Some(altitude) = &aircraft.altitude {
        let key = if config.flightaware_aliases { "alt_baro" } else { "altitude" };
        entry.insert(key.into(), Value::from(altitude.value));
    }
    if let Some(vertical_rate) = aircraft.vertical_rate {
        let key = if config.flightaware_aliases { "geom_rate" } else { "vert_rate" };
        entry.insert(key.into(), Value::from(vertical_rate));
    }
    if let Some(heading) = aircraft.heading {
        entry.insert("track".into(), Value::from(heading));
    }
    if let Some(speed) = &aircraft.speed {
        let key = if config.flightaware_aliases { "gs" } else { "speed" };
        entry.insert(key.into(), Value::from(speed.value));
    }
    if let Some(squawk) = aircraft.squawk {
        entry.insert("squawk".into(), Value::String(squawk.as_octal_string()));
    }
    if let Some(category) = aircraft.category {
        entry.insert("category".into(), Value::String(format!("{category:02x}")));
    }
    entry.insert("messages".into(), Value::from(aircraft.messages));
    entry.insert("seen".into(), Value::from((now - aircraft.last_seen).num_milliseconds() as f64 / 1000.0));
    entry.insert("rssi".into(), Value::from(rssi(aircraft.signal_ring.mean())));

    if !aircraft.mlat_attributes.is_empty() {
        entry.insert("mlat".into(), Value::Array(attribute_names(aircraft.mlat_attributes)));
    }
    if !aircraft.tisb_attributes.is_empty() {
        entry.insert("tisb".into(), Value::Array(attribute_names(aircraft.tisb_attributes)));
    }

    Value::Object(entry)
}

/// §4.6: RSSI computed from the mean of the 8-slot signal ring.
fn rssi(mean_signal: f64) -> f64 {
    10.0 * (mean_signal / 8.0 + 1.125e-5).log10()
}

fn attribute_names(attributes: Attributes) -> Vec<Value> {
    const NAMED: &[(Attributes, &str)] = &[
        (Attributes::ALTITUDE, "altitude"),
        (Attributes::ALTITUDE_HAE, "altitude_hae"),
        (Attributes::LATLON, "latlon"),
        (Attributes::CALLSIGN, "callsign"),
        (Attributes::SQUAWK, "squawk"),
        (Attributes::SPEED, "speed"),
        (Attributes::HEADING, "heading"),
        (Attributes::VERTRATE, "vertrate"),
        (Attributes::CATEGORY, "category"),
        (Attributes::AOG, "aog"),
    ];
    NAMED
        .iter()
        .filter(|(bit, _)| attributes.contains(*bit))
        .map(|(_, name)| Value::String((*name).into()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn aircraft_document_is_empty_for_a_fresh_table() {
        let table = Table::new(Config::default());
        let doc = aircraft_document(&table, &JsonConfig::default(), Utc::now());
        assert_eq!(doc["aircraft"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn receiver_document_carries_home_position() {
        let home = m1090_decode::cpr::Position { latitude: 52.0, longitude: 4.0 };
        let doc = receiver_document(&JsonConfig::default(), Some(home));
        assert_eq!(doc["lat"], 52.0);
    }
}
