//! The decoded message type shared by every downlink format (§3 Data Model).

use crate::{
    attributes::Attributes,
    cpr::CprObservation,
    squawk::Squawk,
};

/// A 24-bit ICAO address, or a synthetic non-ICAO address for TIS-B/ADS-R
/// targets that are anonymous or ground-vehicle/obstruction addresses
/// (§4.3 point 4, code formats 1/3/5).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IcaoAddress {
    value: u32,
    non_icao: bool,
}

impl IcaoAddress {
    pub fn new(value: u32) -> Self {
        Self {
            value: value & 0x00ff_ffff,
            non_icao: false,
        }
    }

    pub fn with_non_icao_flag(mut self) -> Self {
        self.non_icao = true;
        self
    }

    pub fn value(&self) -> u32 {
        self.value
    }

    pub fn is_non_icao(&self) -> bool {
        self.non_icao
    }
}

impl std::fmt::Display for IcaoAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:06x}", self.value)
    }
}

/// Which external source a message (or an attribute currently held on an
/// aircraft record) is tagged with, per §3's source tag.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MessageSource {
    #[default]
    Adsb,
    TisB,
    AdsR,
    Mlat,
}

/// The downlink format, as read from bits 0-4 of the frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DownlinkFormat {
    ShortAirAirSurveillance,  // DF0
    SurveillanceAltitude,     // DF4
    SurveillanceIdentity,     // DF5
    AllCallReply,             // DF11
    LongAirAirSurveillance,   // DF16
    ExtendedSquitter,         // DF17
    ExtendedSquitterNonIcao,  // DF18
    MilitaryExtendedSquitter, // DF19
    CommBAltitude,            // DF20
    CommBIdentity,            // DF21
    CommD,                    // DF24-31
}

impl DownlinkFormat {
    pub fn from_bits(df: u8) -> Option<Self> {
        if df >= 24 {
            return Some(Self::CommD);
        }
        match df {
            0 => Some(Self::ShortAirAirSurveillance),
            4 => Some(Self::SurveillanceAltitude),
            5 => Some(Self::SurveillanceIdentity),
            11 => Some(Self::AllCallReply),
            16 => Some(Self::LongAirAirSurveillance),
            17 => Some(Self::ExtendedSquitter),
            18 => Some(Self::ExtendedSquitterNonIcao),
            19 => Some(Self::MilitaryExtendedSquitter),
            20 => Some(Self::CommBAltitude),
            21 => Some(Self::CommBIdentity),
            _ => None,
        }
    }

    /// `true` for the 56-bit formats (DF0/4/5/11); everything else is 112 bits.
    pub fn is_short(&self) -> bool {
        matches!(
            self,
            Self::ShortAirAirSurveillance
                | Self::SurveillanceAltitude
                | Self::SurveillanceIdentity
                | Self::AllCallReply
        )
    }

    /// The trailer directly carries the checksum, rather than `ICAO XOR AP`.
    pub fn trailer_is_direct_checksum(&self) -> bool {
        matches!(
            self,
            Self::AllCallReply | Self::ExtendedSquitter | Self::ExtendedSquitterNonIcao
        )
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            Self::ShortAirAirSurveillance => 0,
            Self::SurveillanceAltitude => 4,
            Self::SurveillanceIdentity => 5,
            Self::AllCallReply => 11,
            Self::LongAirAirSurveillance => 16,
            Self::ExtendedSquitter => 17,
            Self::ExtendedSquitterNonIcao => 18,
            Self::MilitaryExtendedSquitter => 19,
            Self::CommBAltitude => 20,
            Self::CommBIdentity => 21,
            Self::CommD => 24,
        }
    }
}

/// A fully decoded Mode S (or synthetic Mode A/C) message, carrying every
/// field §3 lists plus the [`Attributes`] bitfield saying which of them are
/// populated.
#[derive(Clone, Debug, Default)]
pub struct Decoded {
    pub df: Option<DownlinkFormat>,
    /// ME type (5 bits), only meaningful for DF17/18.
    pub me_type: Option<u8>,
    pub address: IcaoAddress,
    pub attributes: Attributes,

    pub altitude: Option<i32>,
    pub altitude_hae: Option<i32>,
    pub hae_delta: Option<i32>,
    pub squawk: Option<Squawk>,
    pub callsign: Option<String>,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub vertical_rate: Option<i32>,
    pub category: Option<u8>,

    pub cpr: Option<CprObservation>,

    pub aog: Option<bool>,
    pub source: MessageSource,
    pub nucp: Option<u8>,

    /// `Some(bit)` if the frame needed single-bit CRC correction.
    pub corrected_bit: Option<usize>,
    pub signal_level: f64,
    pub timestamp_us: u64,

    /// ME types 23-27, 28, 29, 31 are recognised but parsed-but-ignored
    /// (§4.3 point 4, Open Question in §9): the type number and raw 7-byte
    /// ME payload are kept here rather than dropped, so a future decision
    /// to decode them doesn't require re-demodulating the frame.
    pub unparsed_me: Option<([u8; 7], u8)>,

    /// Set for synthetic Mode A/C fallback decodes (§4.3 point 6).
    pub mode_ac: bool,
}

impl Decoded {
    pub fn new(df: DownlinkFormat, address: IcaoAddress) -> Self {
        Self {
            df: Some(df),
            address,
            ..Default::default()
        }
    }
}
