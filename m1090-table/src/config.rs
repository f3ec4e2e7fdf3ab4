//! Table-wide tunables (§4.4, §4.5), all with the defaults the spec names.

use std::time::Duration;

use m1090_decode::cpr::Position;

#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// Receiver position, used as the CPR local-decode seed and as the
    /// centre of the global-decode plausibility check.
    pub home: Option<Position>,
    pub ttl: Duration,
    pub global_plausibility_nmi: f64,
    pub local_surface_nmi: f64,
    pub local_airborne_nmi: f64,
    pub global_window_airborne: Duration,
    pub global_window_surface_fast: Duration,
    pub global_window_surface_slow: Duration,
    /// §4.5 point 6: suppress a DF0/4/16/20 altitude if a DF17/18 altitude
    /// and a position both landed within this window.
    pub altitude_suppression_window: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            home: None,
            ttl: Duration::from_secs(60),
            global_plausibility_nmi: 300.0,
            local_surface_nmi: 5.0,
            local_airborne_nmi: 180.0,
            global_window_airborne: Duration::from_secs(10),
            global_window_surface_fast: Duration::from_secs(25),
            global_window_surface_slow: Duration::from_secs(50),
            altitude_suppression_window: Duration::from_secs(15),
        }
    }
}
