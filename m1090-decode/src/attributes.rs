//! Per-message/per-aircraft attribute bitfield (§3 Data Model).
//!
//! A single bit type is shared between a [`Decoded`](crate::message::Decoded)
//! message and the aircraft table: a message's bits say which fields it
//! carries, and the aircraft's bits say which fields currently hold a
//! value sourced from that message (or its MLAT/TIS-B counterparts).

use bitflags::bitflags;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct Attributes: u32 {
        const ALTITUDE        = 1 << 0;
        const ALTITUDE_HAE    = 1 << 1;
        const HAE_DELTA       = 1 << 2;
        const LLEVEN          = 1 << 3;
        const LLODD           = 1 << 4;
        /// Either parity is present — test with [`Attributes::intersects`].
        const LLEITHER        = Self::LLEVEN.bits() | Self::LLODD.bits();
        const LATLON          = 1 << 5;
        const LATLON_REL_OK   = 1 << 6;
        const CALLSIGN        = 1 << 7;
        const SQUAWK          = 1 << 8;
        const SPEED           = 1 << 9;
        const HEADING         = 1 << 10;
        const VERTRATE        = 1 << 11;
        const CATEGORY        = 1 << 12;
        const AOG             = 1 << 13;
        const AOG_VALID       = 1 << 14;
        const FROM_MLAT       = 1 << 15;
        const FROM_TISB       = 1 << 16;
        const REL_CPR_USED    = 1 << 17;
        const NSEWSPD         = 1 << 18;
        const EWSPEED         = 1 << 19;
        const NSSPEED         = 1 << 20;
        const FS              = 1 << 21;
    }
}

impl Attributes {
    /// `LLBOTH`: both even and odd CPR observations are current — not a
    /// storable bit of its own, since it's the conjunction of two others.
    pub fn ll_both(self) -> bool {
        self.contains(Attributes::LLEVEN | Attributes::LLODD)
    }
}
