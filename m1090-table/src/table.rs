//! The aircraft state table: a single `RwLock<HashMap>`, mutated only by the
//! message-handling path and the staleness sweep (§4.5, §5).

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use m1090_decode::{
    cpr::{self, CprFormat, Position},
    message::{Decoded, IcaoAddress, MessageSource},
    Attributes,
};
use parking_lot::RwLock;

use crate::{
    aircraft::{Aircraft, Visibility},
    config::Config,
    registration::{NoRegistrationLookup, SharedRegistrationLookup},
};

#[derive(Debug, Default, Clone, Copy)]
pub struct Stats {
    pub messages_applied: u64,
    pub bad_global: u64,
    pub global_skipped: u64,
    pub local_skipped: u64,
    pub suppressed_altitude: u64,
    /// Sum of every aircraft's `global_dist_checks` (§4.5: "sums per record
    /// a `global_dist_checks` counter"), used by the startup home-position
    /// sanity check — see [`Table::home_position_suspect`].
    pub global_dist_checks: u64,
}

/// Sole mutator: the demod task. Server/tick tasks only ever take the read
/// lock (§5 "Server thread(s) ... read from the table under a single
/// reader-writer lock").
pub struct Table {
    config: RwLock<Config>,
    registration_lookup: SharedRegistrationLookup,
    aircraft: RwLock<HashMap<IcaoAddress, Aircraft>>,
    stats: RwLock<Stats>,
}

impl Table {
    pub fn new(config: Config) -> Self {
        Self::with_registration_lookup(config, Arc::new(NoRegistrationLookup))
    }

    pub fn with_registration_lookup(config: Config, registration_lookup: SharedRegistrationLookup) -> Self {
        Self {
            config: RwLock::new(config),
            registration_lookup,
            aircraft: RwLock::new(HashMap::new()),
            stats: RwLock::new(Stats::default()),
        }
    }

    pub fn stats(&self) -> Stats {
        *self.stats.read()
    }

    pub fn len(&self) -> usize {
        self.aircraft.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn home(&self) -> Option<Position> {
        self.config.read().home
    }

    /// Operator `set-home` control (§6): takes effect on the next message
    /// or sweep, without requiring the aircraft-table lock.
    pub fn set_home(&self, home: Option<Position>) {
        self.config.write().home = home;
    }

    /// §4.5's startup sanity check: "if the global total has not risen in
    /// the first 50-80s of operation, the home position is probably
    /// wrong". Only meaningful once a home position is actually configured
    /// — without one, global decode never runs a plausibility check at all
    /// and the counter staying at zero is expected, not suspicious.
    pub fn home_position_suspect(&self) -> bool {
        self.config.read().home.is_some() && self.stats.read().global_dist_checks == 0
    }

    /// Operator `set-ttl` control (§6).
    pub fn set_ttl(&self, ttl: std::time::Duration) {
        self.config.write().ttl = ttl;
    }

    /// Operator `reset-stats` control (§6): zeroes the running counters
    /// without touching any aircraft record.
    pub fn reset_stats(&self) {
        *self.stats.write() = Stats::default();
    }

    /// Applies a decoded message to the table, following §4.5's 8-step
    /// update procedure. `now` is threaded in rather than read from the
    /// clock so tests can drive time deterministically.
    pub fn apply(&self, decoded: &Decoded, now: DateTime<Utc>) {
        if decoded.address.is_non_icao() && decoded.source == MessageSource::Adsb {
            // non-ICAO addresses only arrive tagged TIS-B/ADS-R; a plain
            // ADS-B frame never carries one.
            return;
        }

        let mut table = self.aircraft.write();
        let is_new = !table.contains_key(&decoded.address);
        let aircraft = table
            .entry(decoded.address)
            .or_insert_with(|| Aircraft::new(decoded.address, now));

        if is_new {
            aircraft.registration = self.registration_lookup.lookup(decoded.address);
            aircraft.registration_looked_up = true;
        }

        aircraft.signal_ring.push(decoded.signal_level);
        aircraft.last_seen = now;
        aircraft.messages += 1;
        if !decoded.mode_ac {
            aircraft.mode_s_seen = true;
        }
        if aircraft.visibility == Visibility::LastTime {
            aircraft.visibility = Visibility::Normal;
        }

        self.apply_scalar_fields(aircraft, decoded, now);

        if let Some(observation) = decoded.cpr {
            self.resolve_position(aircraft, observation, decoded.nucp.unwrap_or(0), now);
        }

        if decoded.mode_ac {
            self.cross_check_mode_ac(aircraft, decoded);
        }

        if let Some(shadow) = aircraft.shadow_attributes_mut(decoded.source) {
            *shadow |= decoded.attributes;
        }

        self.stats.write().messages_applied += 1;
    }

    fn apply_scalar_fields(&self, aircraft: &mut Aircraft, decoded: &Decoded, now: DateTime<Utc>) {
        if let Some(altitude) = decoded.altitude {
            if self.altitude_is_suppressed(aircraft, decoded, now) {
                self.stats.write().suppressed_altitude += 1;
            }
            else {
                aircraft.altitude = Some(crate::aircraft::Timestamped::new(now, altitude));
                aircraft.attributes.insert(Attributes::ALTITUDE);
            }
        }
        if let Some(altitude_hae) = decoded.altitude_hae {
            aircraft.altitude_hae = Some(crate::aircraft::Timestamped::new(now, altitude_hae));
            aircraft.attributes.insert(Attributes::ALTITUDE_HAE);
        }
        if let Some(hae_delta) = decoded.hae_delta {
            aircraft.hae_delta = Some(hae_delta);
            aircraft.attributes.insert(Attributes::HAE_DELTA);
        }
        if let Some(squawk) = decoded.squawk {
            aircraft.squawk = Some(squawk);
            aircraft.attributes.insert(Attributes::SQUAWK);
        }
        if let Some(callsign) = &decoded.callsign {
            aircraft.callsign = Some(callsign.clone());
            aircraft.attributes.insert(Attributes::CALLSIGN);
        }
        if let Some(speed) = decoded.speed {
            aircraft.speed = Some(crate::aircraft::Timestamped::new(now, speed));
            aircraft.attributes.insert(Attributes::SPEED);
        }
        if let Some(heading) = decoded.heading {
            aircraft.heading = Some(heading);
            aircraft.attributes.insert(Attributes::HEADING);
        }
        if let Some(vertical_rate) = decoded.vertical_rate {
            aircraft.vertical_rate = Some(vertical_rate);
            aircraft.attributes.insert(Attributes::VERTRATE);
        }
        if let Some(category) = decoded.category {
            aircraft.category = Some(category);
            aircraft.attributes.insert(Attributes::CATEGORY);
        }
        if let Some(aog) = decoded.aog {
            aircraft.aog = Some(aog);
            aircraft.attributes.insert(Attributes::AOG);
            if decoded.attributes.contains(Attributes::AOG_VALID) {
                aircraft.attributes.insert(Attributes::AOG_VALID);
            }
        }
    }

    /// §4.5 point 6: a DF0/4/16/20 altitude within 15s of both a DF17/18
    /// non-MLAT altitude and a non-MLAT position is assumed to be a
    /// single-bit decode error and discarded.
    fn altitude_is_suppressed(&self, aircraft: &Aircraft, decoded: &Decoded, now: DateTime<Utc>) -> bool {
        if decoded.attributes.contains(Attributes::FROM_MLAT) {
            return false;
        }
        let window = self.config.read().altitude_suppression_window;
        let recent_es_altitude = aircraft
            .altitude
            .as_ref()
            .is_some_and(|a| (now - a.time).to_std().map(|d| d < window).unwrap_or(false));
        let recent_position = aircraft
            .position
            .as_ref()
            .is_some_and(|p| (now - p.time).to_std().map(|d| d < window).unwrap_or(false));
        decoded.df.is_some() && recent_es_altitude && recent_position && decoded.me_type.is_none()
    }

    fn resolve_position(
        &self,
        aircraft: &mut Aircraft,
        observation: m1090_decode::cpr::CprObservation,
        nucp: u8,
        now: DateTime<Utc>,
    ) {
        aircraft.record_cpr(observation, now, nucp);
        let config = *self.config.read();

        let global_window = if aircraft.aog == Some(true) {
            let slow = aircraft.speed.as_ref().map(|s| s.value <= 25.0).unwrap_or(true);
            if slow { config.global_window_surface_slow } else { config.global_window_surface_fast }
        }
        else {
            config.global_window_airborne
        };

        let within_window = aircraft
            .even_cpr
            .zip(aircraft.odd_cpr)
            .map(|(even, odd)| (even.time - odd.time).abs().to_std().unwrap_or_default() <= global_window)
            .unwrap_or(false);

        if aircraft.ll_both() && within_window {
            let (even, odd) = (aircraft.even_cpr.unwrap(), aircraft.odd_cpr.unwrap());
            let most_recent = if even.time >= odd.time { CprFormat::Even } else { CprFormat::Odd };

            match cpr::decode_global(
                even.observation,
                odd.observation,
                most_recent,
                config.home,
                config.global_plausibility_nmi,
            ) {
                Ok(position) => {
                    if let Some(home) = config.home {
                        aircraft.distance_to_home = Some(cpr::distance_nmi(home, position));
                        aircraft.global_dist_checks += 1;
                        self.stats.write().global_dist_checks += 1;
                    }
                    aircraft.position = Some(crate::aircraft::Timestamped::new(now, position));
                    aircraft.attributes.insert(Attributes::LATLON);
                    return;
                }
                Err(cpr::CprError::Skipped) => {
                    self.stats.write().global_skipped += 1;
                }
                Err(cpr::CprError::ImplausiblyFarFromHome { distance_nmi }) => {
                    aircraft.distance_to_home = Some(distance_nmi);
                    aircraft.global_dist_checks += 1;
                    self.stats.write().global_dist_checks += 1;
                    self.stats.write().bad_global += 1;
                    aircraft.clear_position();
                    return;
                }
                Err(_) => {
                    self.stats.write().bad_global += 1;
                }
            }
        }

        // fall back to local decode against the last known position (or
        // home, if this is the aircraft's first observation).
        let seed = aircraft.position.as_ref().map(|p| p.value).or(config.home);
        if let Some(seed) = seed {
            let bound = if aircraft.aog == Some(true) {
                config.local_surface_nmi
            }
            else {
                config.local_airborne_nmi
            };
            match cpr::decode_local(observation, seed, bound) {
                Ok(position) => {
                    aircraft.position = Some(crate::aircraft::Timestamped::new(now, position));
                    aircraft.attributes.insert(Attributes::LATLON);
                }
                Err(_) => {
                    self.stats.write().local_skipped += 1;
                }
            }
        }
    }

    /// §4.5 point 8: cross-check a synthetic Mode A/C decode against this
    /// address's Mode S state.
    fn cross_check_mode_ac(&self, aircraft: &mut Aircraft, decoded: &Decoded) {
        use crate::aircraft::ModeAcHits;

        let mut hits = ModeAcHits::empty();
        if let (Some(modeac_squawk), Some(known_squawk)) = (decoded.squawk, aircraft.squawk) {
            if modeac_squawk == known_squawk {
                hits.insert(ModeAcHits::MODEA_HIT);
                aircraft.mode_a_hits += 1;
            }
        }
        if let (Some(modeac_altitude), Some(known_altitude)) = (decoded.altitude, aircraft.altitude.as_ref()) {
            if (modeac_altitude - known_altitude.value).abs() <= 100 {
                hits.insert(ModeAcHits::MODEC_HIT);
                aircraft.mode_c_hits += 1;
            }
        }
        aircraft.mode_ac_hits |= hits;
    }

    /// Staleness sweep (§4.5 "invoked 4x/s"). Transitions, then destroys,
    /// records past their TTL; clears stale position data without
    /// destroying the record. Returns the number of records destroyed.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let ttl = self.config.read().ttl;
        let mut table = self.aircraft.write();
        let mut destroyed = 0;

        table.retain(|_, aircraft| {
            let age = (now - aircraft.last_seen).to_std().unwrap_or_default();

            if age > ttl {
                destroyed += 1;
                return false;
            }

            if ttl.checked_sub(std::time::Duration::from_secs(1)).is_some_and(|margin| age > margin)
                && aircraft.visibility == Visibility::Normal
            {
                aircraft.visibility = Visibility::LastTime;
            }

            if let Some(position) = &aircraft.position {
                if (now - position.time).to_std().unwrap_or_default() > ttl {
                    aircraft.clear_position();
                }
            }

            true
        });

        destroyed
    }

    /// Runs `f` with a read lock over a cloned snapshot vector, matching
    /// §5's "read operations take snapshots of interest ... and release
    /// the lock before writing to sockets".
    pub fn snapshot<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&HashMap<IcaoAddress, Aircraft>) -> R,
    {
        f(&self.aircraft.read())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortKey {
    Callsign,
    Country,
    Icao,
    Altitude,
    Distance,
    Regnum,
    Speed,
    Seen,
    Messages,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Compares two aircraft on `key`, falling back to ICAO address to keep the
/// ordering total (§4.5 "Sorting").
pub fn compare(a: &Aircraft, b: &Aircraft, key: SortKey, order: SortOrder) -> std::cmp::Ordering {
    use std::cmp::Ordering;

    let primary = match key {
        SortKey::Callsign => a.callsign.cmp(&b.callsign),
        SortKey::Country => Ordering::Equal, // country derives from the ICAO block; no lookup table wired in yet.
        SortKey::Icao => a.address.value().cmp(&b.address.value()),
        SortKey::Altitude => a
            .altitude
            .as_ref()
            .map(|v| v.value)
            .cmp(&b.altitude.as_ref().map(|v| v.value)),
        SortKey::Distance => a
            .distance_to_home
            .map(ordered_float)
            .cmp(&b.distance_to_home.map(ordered_float)),
        SortKey::Regnum => a
            .registration
            .as_ref()
            .map(|r| r.registration.clone())
            .cmp(&b.registration.as_ref().map(|r| r.registration.clone())),
        SortKey::Speed => a
            .speed
            .as_ref()
            .map(|v| ordered_float(v.value))
            .cmp(&b.speed.as_ref().map(|v| ordered_float(v.value))),
        SortKey::Seen => a.last_seen.cmp(&b.last_seen),
        SortKey::Messages => a.messages.cmp(&b.messages),
    };

    let result = primary.then_with(|| a.address.value().cmp(&b.address.value()));
    match order {
        SortOrder::Ascending => result,
        SortOrder::Descending => result.reverse(),
    }
}

/// `f64` doesn't implement `Ord`; values this table compares are always
/// finite, so a bit-pattern key via `total_cmp` is sufficient and avoids
/// pulling in a crate solely for this.
fn ordered_float(value: f64) -> impl Ord {
    value.to_bits() as i64 ^ (((value.to_bits() as i64) >> 63) & i64::MAX)
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;
    use m1090_decode::{message::DownlinkFormat, IcaoAddress};

    use super::*;

    fn message(address: u32) -> Decoded {
        Decoded::new(DownlinkFormat::AllCallReply, IcaoAddress::new(address))
    }

    #[test]
    fn creates_a_record_on_first_message() {
        let table = Table::new(Config::default());
        let now = Utc::now();
        table.apply(&message(0x4840D6), now);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn sweep_destroys_records_past_ttl() {
        let mut config = Config::default();
        config.ttl = std::time::Duration::from_secs(60);
        let table = Table::new(config);
        let now = Utc::now();
        table.apply(&message(0x4840D6), now);

        let destroyed = table.sweep(now + ChronoDuration::seconds(61));
        assert_eq!(destroyed, 1);
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn sweep_marks_last_time_before_destroying() {
        let mut config = Config::default();
        config.ttl = std::time::Duration::from_secs(60);
        let table = Table::new(config);
        let now = Utc::now();
        table.apply(&message(0x4840D6), now);

        table.sweep(now + ChronoDuration::seconds(59) + ChronoDuration::milliseconds(500));
        table.snapshot(|aircraft| {
            let record = aircraft.values().next().unwrap();
            assert_eq!(record.visibility, Visibility::LastTime);
        });
    }

    #[test]
    fn home_position_not_suspect_without_a_configured_home() {
        let table = Table::new(Config::default());
        assert!(!table.home_position_suspect());
    }

    #[test]
    fn home_position_suspect_until_a_global_decode_succeeds() {
        let mut config = Config::default();
        config.home = Some(m1090_decode::cpr::Position { latitude: 52.0, longitude: 4.0 });
        let table = Table::new(config);
        assert!(table.home_position_suspect());

        table.stats.write().global_dist_checks += 1;
        assert!(!table.home_position_suspect());
    }
}
