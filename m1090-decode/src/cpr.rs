//! Compact Position Reporting resolver (§4.4).
//!
//! CPR encodes each coordinate in 17 bits within one of two interleaved
//! grids: an even grid with 60 latitude zones, and an odd grid with 59.
//! [`decode_global`] needs one observation of each parity within a bounded
//! time window; [`decode_local`] disambiguates a single observation against
//! a known seed position.

use std::sync::OnceLock;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CprFormat {
    Even,
    Odd,
}

impl CprFormat {
    pub fn from_odd_flag(odd: bool) -> Self {
        if odd { CprFormat::Odd } else { CprFormat::Even }
    }
}

/// A single CPR observation: 17-bit latitude/longitude plus its parity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CprObservation {
    pub format: CprFormat,
    pub lat: u32,
    pub lon: u32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq)]
pub enum CprError {
    /// The even/odd pair straddles a latitude zone boundary — not an error,
    /// just not resolvable from this pair (§4.4, "not an error").
    #[error("even/odd observations straddle a latitude zone boundary")]
    Skipped,
    /// Global decode succeeded geometrically but the result is implausibly
    /// far from the configured home position (§4.4's plausibility
    /// threshold, default 300 nmi).
    #[error("decoded position is {distance_nmi:.1} nmi from home, farther than the plausibility threshold")]
    ImplausiblyFarFromHome { distance_nmi: f64 },
    /// Local decode's nearest cell is farther from the seed than its
    /// distance bound (5 nmi surface / 180 nmi airborne).
    #[error("decoded position is {distance_nmi:.1} nmi from the seed, farther than local decode's bound")]
    TooFarFromSeed { distance_nmi: f64 },
}

const CPR_MAX: f64 = 131_072.0; // 2^17

/// Number-of-longitude-zones step function (59 down to 1), piecewise
/// constant on latitude. Reproduced exactly per the 1090-WP-9-14
/// boundaries by computing the defining formula once per boundary and
/// caching the result — never evaluated on the decode hot path.
fn nl_table() -> &'static [f64; 59] {
    static TABLE: OnceLock<[f64; 59]> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut boundaries = [0.0f64; 59];
        for (i, boundary) in boundaries.iter_mut().enumerate() {
            // boundary between NL=59-i and NL=58-i, i.e. the greatest
            // latitude for which NL still equals 59-i.
            let nl = (59 - i) as f64;
            *boundary = nl_inverse(nl);
        }
        boundaries
    })
}

/// The latitude at which `NL(lat)` transitions away from `nl`, i.e. the
/// supremum of `{lat : NL(lat) >= nl}`. This is the closed-form definition
/// of the NL step function evaluated at its own transition points, which is
/// exactly how the canonical NL table is derived.
fn nl_inverse(nl: f64) -> f64 {
    use std::f64::consts::PI;

    if nl <= 1.0 {
        return 90.0;
    }
    let a = 1.0 - (PI / 30.0).cos();
    let b = 1.0 - a / (1.0 - (PI / nl).cos());
    b.acos().to_degrees()
}

/// Number-of-longitude-zones at `lat` (always queried with `lat.abs()`).
pub fn nl(lat: f64) -> f64 {
    let lat = lat.abs();
    if lat >= 87.0 {
        return 1.0;
    }
    let table = nl_table();
    for (i, &boundary) in table.iter().enumerate() {
        if lat < boundary {
            return (59 - i) as f64;
        }
    }
    1.0
}

fn wrap_lat(lat: f64) -> f64 {
    if lat >= 270.0 { lat - 360.0 } else { lat }
}

fn normalize_lon(lon: f64) -> f64 {
    if lon > 180.0 { lon - 360.0 } else { lon }
}

/// Resolves a position from one even and one odd CPR observation, per
/// §4.4's "Global decode". `most_recent` selects which of the two
/// observations' latitude/longitude to report (the more recent one, per
/// the aircraft table's bookkeeping). When `home` is configured, a result
/// farther than `plausibility_nmi` from it is rejected with
/// [`CprError::ImplausiblyFarFromHome`] rather than returned (§4.4 "The
/// resolver MUST reject results that place the aircraft further than a
/// plausibility threshold ... from the home position").
pub fn decode_global(
    even: CprObservation,
    odd: CprObservation,
    most_recent: CprFormat,
    home: Option<Position>,
    plausibility_nmi: f64,
) -> Result<Position, CprError> {
    let lat_cpr_even = f64::from(even.lat) / CPR_MAX;
    let lat_cpr_odd = f64::from(odd.lat) / CPR_MAX;

    let j = (59.0 * lat_cpr_even - 60.0 * lat_cpr_odd + 0.5).floor();

    let rlat_even = wrap_lat((360.0 / 60.0) * (j.rem_euclid(60.0) + lat_cpr_even));
    let rlat_odd = wrap_lat((360.0 / 59.0) * (j.rem_euclid(59.0) + lat_cpr_odd));

    let nl_even = nl(rlat_even);
    let nl_odd = nl(rlat_odd);

    if nl_even != nl_odd {
        return Err(CprError::Skipped);
    }

    let (lat, nl_lat) = match most_recent {
        CprFormat::Even => (rlat_even, nl_even),
        CprFormat::Odd => (rlat_odd, nl_odd),
    };

    let lon_cpr_even = f64::from(even.lon) / CPR_MAX;
    let lon_cpr_odd = f64::from(odd.lon) / CPR_MAX;

    let m = (lon_cpr_even * (nl_lat - 1.0) - lon_cpr_odd * nl_lat + 0.5).floor();

    let n_even = nl_lat.max(1.0);
    let n_odd = (nl_lat - 1.0).max(1.0);

    let d_lon_even = 360.0 / n_even;
    let d_lon_odd = 360.0 / n_odd;

    let lon_even = d_lon_even * (m.rem_euclid(n_even) + lon_cpr_even);
    let lon_odd = d_lon_odd * (m.rem_euclid(n_odd) + lon_cpr_odd);

    let lon = normalize_lon(match most_recent {
        CprFormat::Even => lon_even,
        CprFormat::Odd => lon_odd,
    });

    let position = Position { latitude: lat, longitude: lon };

    if let Some(home) = home {
        let distance_nmi = distance_nmi(home, position);
        if distance_nmi > plausibility_nmi {
            return Err(CprError::ImplausiblyFarFromHome { distance_nmi });
        }
    }

    Ok(position)
}

/// Resolves a position from a single CPR observation by choosing the cell
/// closest to `seed`, per §4.4's "Local decode". Rejects a result farther
/// than `bound_nmi` from `seed` with [`CprError::TooFarFromSeed`] (§4.4
/// "Accepts the result only if it is within 5 nmi (surface) or 180 nmi
/// (airborne) of the seed; otherwise 'skipped'").
pub fn decode_local(observation: CprObservation, seed: Position, bound_nmi: f64) -> Result<Position, CprError> {
    let (d_lat, lat_zones) = match observation.format {
        CprFormat::Even => (360.0 / 60.0, 60.0),
        CprFormat::Odd => (360.0 / 59.0, 59.0),
    };

    let lat_cpr = f64::from(observation.lat) / CPR_MAX;
    let j = (seed.latitude / d_lat).floor() + (0.5 + (seed.latitude.rem_euclid(d_lat)) / d_lat - lat_cpr).floor();
    let lat = d_lat * (j + lat_cpr);

    let nl_lat = nl(lat);
    let n = match observation.format {
        CprFormat::Even => nl_lat.max(1.0),
        CprFormat::Odd => (nl_lat - 1.0).max(1.0),
    };
    let d_lon = 360.0 / n;

    let lon_cpr = f64::from(observation.lon) / CPR_MAX;
    let m = (seed.longitude / d_lon).floor()
        + (0.5 + (seed.longitude.rem_euclid(d_lon)) / d_lon - lon_cpr).floor();
    let lon = d_lon * (m + lon_cpr);

    let position = Position { latitude: lat, longitude: normalize_lon(lon) };
    let distance_nmi = distance_nmi(seed, position);
    if distance_nmi > bound_nmi {
        return Err(CprError::TooFarFromSeed { distance_nmi });
    }
    Ok(position)
}

/// Great-circle distance in nautical miles, used for the plausibility checks
/// in §4.4.
pub fn distance_nmi(a: Position, b: Position) -> f64 {
    const EARTH_RADIUS_NMI: f64 = 3440.065;

    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_NMI * h.sqrt().asin()
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn decode_global_matches_known_fixture() {
        let even = CprObservation {
            format: CprFormat::Even,
            lat: 0b10110101101001000,
            lon: 0b01100100010101100,
        };
        let odd = CprObservation {
            format: CprFormat::Odd,
            lat: 0b10010000110101110,
            lon: 0b01100010000010010,
        };

        let position = decode_global(even, odd, CprFormat::Even, None, 300.0).unwrap();
        assert_abs_diff_eq!(position.latitude, 52.2572, epsilon = 0.001);
        assert_abs_diff_eq!(position.longitude, 3.91937, epsilon = 0.001);
    }

    /// Same fixture pair as above, but picking the odd observation as the
    /// most-recently-received one. This exercises `ni = max(NL(rlat) - 1,
    /// 1)` for the odd branch (§4.4) — a regression here previously used
    /// `nl(lat - 1.0)` (NL evaluated one degree further south) instead of
    /// `nl_lat - 1.0` (the NL value itself, decremented), which silently
    /// produced the wrong longitude whenever the odd observation was the
    /// more recent of the pair.
    #[test]
    fn decode_global_matches_known_fixture_with_odd_most_recent() {
        let even = CprObservation {
            format: CprFormat::Even,
            lat: 0b10110101101001000,
            lon: 0b01100100010101100,
        };
        let odd = CprObservation {
            format: CprFormat::Odd,
            lat: 0b10010000110101110,
            lon: 0b01100010000010010,
        };

        let position = decode_global(even, odd, CprFormat::Odd, None, 300.0).unwrap();
        assert_abs_diff_eq!(position.latitude, 52.26578, epsilon = 0.001);
        assert_abs_diff_eq!(position.longitude, 3.93891, epsilon = 0.001);
    }

    #[test]
    fn nl_is_59_at_equator_and_1_near_poles() {
        assert_eq!(nl(0.0), 59.0);
        assert_eq!(nl(88.0), 1.0);
        assert_eq!(nl(-88.0), 1.0);
    }

    #[test]
    fn nl_is_monotonically_non_increasing_with_latitude() {
        let mut previous = nl(0.0);
        let mut lat = 1.0;
        while lat < 87.0 {
            let current = nl(lat);
            assert!(current <= previous);
            previous = current;
            lat += 0.5;
        }
    }

    #[test]
    fn decode_global_rejects_a_result_too_far_from_home() {
        let even = CprObservation {
            format: CprFormat::Even,
            lat: 0b10110101101001000,
            lon: 0b01100100010101100,
        };
        let odd = CprObservation {
            format: CprFormat::Odd,
            lat: 0b10010000110101110,
            lon: 0b01100010000010010,
        };
        // The fixture decodes to roughly 52.26N 3.92E; a home on the other
        // side of the planet is thousands of nmi away.
        let home = Position { latitude: -33.87, longitude: 151.21 };

        let error = decode_global(even, odd, CprFormat::Even, Some(home), 300.0).unwrap_err();
        assert!(matches!(error, CprError::ImplausiblyFarFromHome { distance_nmi } if distance_nmi > 300.0));
    }

    #[test]
    fn decode_local_rejects_a_result_too_far_from_seed() {
        let observation = CprObservation {
            format: CprFormat::Even,
            lat: 0b10110101101001000,
            lon: 0b01100100010101100,
        };
        // Same fixture as the global decode tests, which resolves near
        // 52.26N 3.92E; seeding from the other side of the planet forces
        // the nearest-cell search to land far outside any sane bound.
        let seed = Position { latitude: -33.87, longitude: 151.21 };

        let error = decode_local(observation, seed, 180.0).unwrap_err();
        assert!(matches!(error, CprError::TooFarFromSeed { distance_nmi } if distance_nmi > 180.0));
    }
}
