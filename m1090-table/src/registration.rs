//! External registration lookup (§6 "Registration lookup API").
//!
//! The core treats the SQLite-backed lookup as an external collaborator: it
//! is handed a plain callback and caches whatever it returns on the
//! aircraft record, never touching a database itself.

use std::sync::Arc;

use m1090_decode::IcaoAddress;

/// A registration record as returned by the lookup callback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Registration {
    pub registration: String,
    pub manufacturer: Option<String>,
    pub aircraft_type: Option<String>,
    pub call_sign: Option<String>,
}

/// Injected in place of the SQLite-backed lookup the original process
/// embeds: `lookup(icao24) -> Option<Registration>`, expected to return
/// within 1ms on the hot path (§6). Implemented as a trait object so the
/// table doesn't need to be generic over the concrete lookup source.
pub trait RegistrationLookup: Send + Sync {
    fn lookup(&self, address: IcaoAddress) -> Option<Registration>;
}

impl<F> RegistrationLookup for F
where
    F: Fn(IcaoAddress) -> Option<Registration> + Send + Sync,
{
    fn lookup(&self, address: IcaoAddress) -> Option<Registration> {
        (self)(address)
    }
}

/// No-op lookup for callers that don't configure a registration source.
pub struct NoRegistrationLookup;

impl RegistrationLookup for NoRegistrationLookup {
    fn lookup(&self, _address: IcaoAddress) -> Option<Registration> {
        None
    }
}

pub type SharedRegistrationLookup = Arc<dyn RegistrationLookup>;
