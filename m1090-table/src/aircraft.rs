//! Per-aircraft state record (§3 Data Model, §4.5).

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use m1090_decode::{
    cpr::{CprFormat, CprObservation, Position},
    Attributes, IcaoAddress, MessageSource,
};

use crate::registration::Registration;

/// A value paired with the time it was last updated — the same pattern
/// the per-field timestamps in §4.5 point 4 rely on to answer "has this
/// gone stale" without a central clock sweep per field.
#[derive(Clone, Copy, Debug)]
pub struct Timestamped<T> {
    pub time: DateTime<Utc>,
    pub value: T,
}

impl<T> Timestamped<T> {
    pub fn new(time: DateTime<Utc>, value: T) -> Self {
        Self { time, value }
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.time
    }
}

bitflags! {
    /// Mode A/C cross-link bitfield (§4.5 point 8).
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct ModeAcHits: u8 {
        const MODEA_HIT = 1 << 0;
        const MODEC_HIT = 1 << 1;
        const MODES_HIT = Self::MODEA_HIT.bits() | Self::MODEC_HIT.bits();
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Visibility {
    FirstTime,
    #[default]
    Normal,
    LastTime,
    None,
}

/// Fixed-capacity ring of recent signal levels (§3: "an 8-slot ring of
/// recent signal levels"), used to compute the RSSI field in the JSON
/// snapshot (§4.6).
#[derive(Clone, Debug, Default)]
pub struct SignalRing {
    levels: [f64; 8],
    len: usize,
    next: usize,
}

impl SignalRing {
    pub fn push(&mut self, level: f64) {
        self.levels[self.next] = level;
        self.next = (self.next + 1) % self.levels.len();
        self.len = (self.len + 1).min(self.levels.len());
    }

    pub fn mean(&self) -> f64 {
        if self.len == 0 {
            0.0
        }
        else {
            self.levels[..self.len].iter().sum::<f64>() / self.len as f64
        }
    }
}

/// One parity's CPR observation, with its own timestamp and NUCp.
#[derive(Clone, Copy, Debug)]
pub struct CprSlot {
    pub observation: CprObservation,
    pub time: DateTime<Utc>,
    pub nucp: u8,
}

/// The full per-ICAO-address record (§3 "Aircraft").
#[derive(Debug)]
pub struct Aircraft {
    pub address: IcaoAddress,

    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub messages: u64,

    pub attributes: Attributes,
    pub mlat_attributes: Attributes,
    pub tisb_attributes: Attributes,

    pub altitude: Option<Timestamped<i32>>,
    pub altitude_hae: Option<Timestamped<i32>>,
    pub hae_delta: Option<i32>,
    pub squawk: Option<m1090_decode::squawk::Squawk>,
    pub callsign: Option<String>,
    pub speed: Option<Timestamped<f64>>,
    pub heading: Option<f64>,
    pub vertical_rate: Option<i32>,
    pub category: Option<u8>,
    pub aog: Option<bool>,

    pub position: Option<Timestamped<Position>>,
    pub estimated_position: Option<Timestamped<Position>>,
    pub distance_to_home: Option<f64>,

    pub even_cpr: Option<CprSlot>,
    pub odd_cpr: Option<CprSlot>,

    pub signal_ring: SignalRing,

    pub registration: Option<Registration>,
    pub registration_looked_up: bool,

    pub mode_ac_hits: ModeAcHits,
    pub mode_a_hits: u32,
    pub mode_c_hits: u32,
    /// Set the first time a real Mode S (not synthetic Mode A/C) message
    /// arrives; used by JSON publication to exclude Mode-A-only records.
    pub mode_s_seen: bool,

    pub visibility: Visibility,
    pub global_dist_checks: u32,
}

impl Aircraft {
    pub fn new(address: IcaoAddress, now: DateTime<Utc>) -> Self {
        Self {
            address,
            first_seen: now,
            last_seen: now,
            messages: 0,
            attributes: Attributes::empty(),
            mlat_attributes: Attributes::empty(),
            tisb_attributes: Attributes::empty(),
            altitude: None,
            altitude_hae: None,
            hae_delta: None,
            squawk: None,
            callsign: None,
            speed: None,
            heading: None,
            vertical_rate: None,
            category: None,
            aog: None,
            position: None,
            estimated_position: None,
            distance_to_home: None,
            even_cpr: None,
            odd_cpr: None,
            signal_ring: SignalRing::default(),
            registration: None,
            registration_looked_up: false,
            mode_ac_hits: ModeAcHits::empty(),
            mode_a_hits: 0,
            mode_c_hits: 0,
            mode_s_seen: false,
            visibility: Visibility::FirstTime,
            global_dist_checks: 0,
        }
    }

    /// Stores a fresh CPR observation in the slot for its parity.
    pub fn record_cpr(&mut self, observation: CprObservation, time: DateTime<Utc>, nucp: u8) {
        let slot = CprSlot { observation, time, nucp };
        match observation.format {
            CprFormat::Even => {
                self.even_cpr = Some(slot);
                self.attributes.insert(Attributes::LLEVEN);
            }
            CprFormat::Odd => {
                self.odd_cpr = Some(slot);
                self.attributes.insert(Attributes::LLODD);
            }
        }
    }

    /// `LLBOTH`: both parities current (§3 Attribute bitfield values).
    pub fn ll_both(&self) -> bool {
        self.even_cpr.is_some() && self.odd_cpr.is_some()
    }

    /// The source a message tagged `FROM_MLAT`/`FROM_TISB` (or neither, for
    /// plain ADS-B) originates from, used to route which shadow bitfield an
    /// update's attributes get copied into (§4.5 point 7).
    pub fn shadow_attributes_mut(&mut self, source: MessageSource) -> Option<&mut Attributes> {
        match source {
            MessageSource::Mlat => Some(&mut self.mlat_attributes),
            MessageSource::TisB => Some(&mut self.tisb_attributes),
            _ => None,
        }
    }

    pub fn clear_position(&mut self) {
        self.even_cpr = None;
        self.odd_cpr = None;
        self.attributes.remove(Attributes::LATLON | Attributes::LATLON_REL_OK);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_ring_averages_over_its_capacity() {
        let mut ring = SignalRing::default();
        for level in [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 100.0] {
            ring.push(level);
        }
        // the first pushed value (1.0) should have been evicted.
        approx::assert_abs_diff_eq!(ring.mean(), (2.0 + 3.0 + 4.0 + 5.0 + 6.0 + 7.0 + 8.0 + 100.0) / 8.0);
    }
}
