//! Mode A/C legacy fallback decode (§4.3 point 6).
//!
//! Short impulses that don't match a Mode S preamble/DF may still carry a
//! legacy Mode A (squawk) or Mode C (altitude) reply. The demodulator hands
//! these in as a raw 13-bit Gillham-coded field (the same wire coding as a
//! Mode S ID13/AC13 field, sans DF framing) plus a flag distinguishing which
//! of the two interpretations applies — the receiver cannot tell from the
//! bits alone and relies on the interrogation cycle it was collected in.

use crate::{
    gillham,
    message::{Decoded, DownlinkFormat, IcaoAddress},
    squawk::Squawk,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModeAcKind {
    SquawkOnly,
    AltitudeOnly,
}

/// Synthesizes a [`Decoded`] message from a Mode A/C field. The address is
/// fudged as `0xFF0000 | field` so it cannot collide with a real 24-bit
/// ICAO address (whose top byte the allocation authorities never assign as
/// 0xFF), giving downstream an address to key the aircraft table on while
/// `mode_ac` marks the record as tentative.
pub fn decode(field: u16, kind: ModeAcKind) -> Option<Decoded> {
    let field = field & 0x1fff;
    let address = IcaoAddress::new(0x00ff_0000 | u32::from(field));

    let mut decoded = Decoded::new(DownlinkFormat::ShortAirAirSurveillance, address);
    decoded.mode_ac = true;

    match kind {
        ModeAcKind::SquawkOnly => {
            decoded.squawk = Some(Squawk::decode_13(field));
            decoded.attributes.insert(crate::Attributes::SQUAWK);
        }
        ModeAcKind::AltitudeOnly => {
            let gillham = gillham::unscramble(field);
            let hundreds = gillham::gray_to_hundreds_of_feet(gillham).ok()?;
            decoded.altitude = Some(hundreds * 100);
            decoded.attributes.insert(crate::Attributes::ALTITUDE);
        }
    }

    Some(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn squawk_only_fallback_synthesizes_a_decoded_message() {
        let field = 0x0800 | 0x0200 | 0x0080 | 0x0020 | 0x0008 | 0x0002; // 7700
        let decoded = decode(field, ModeAcKind::SquawkOnly).unwrap();
        assert!(decoded.mode_ac);
        assert_eq!(decoded.squawk.unwrap().as_octal_string(), "7700");
        assert!(decoded.address.value() & 0x00ff_0000 == 0x00ff_0000);
    }
}
