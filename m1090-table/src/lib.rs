//! The aircraft state table: keyed by ICAO address, staleness-swept at 4Hz,
//! and rendered into the JSON documents the server publishes (§3, §4.5, §4.6).

pub mod aircraft;
pub mod config;
pub mod json;
pub mod registration;
pub mod table;

pub use aircraft::{Aircraft, Visibility};
pub use config::Config;
pub use registration::{Registration, RegistrationLookup, SharedRegistrationLookup};
pub use table::{SortKey, SortOrder, Stats, Table};
