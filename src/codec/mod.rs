//! Binary and text codecs for fermentation sensor beacons.
//!
//! Every format packs a reading into a fixed layout (or a compact JSON object
//! for the extended formats) and decodes it back. Decoding is all-or-nothing:
//! a payload whose length, signature or any sub-field does not match yields a
//! [`DecodeError`], never a partially filled reading.

pub mod eddystone;
pub mod extended;
pub mod ibeacon;

use log::debug;
use thiserror::Error;

/// Error types for decoding beacon payloads.
///
/// All variants mean "not recognized" to the pipeline; they are only
/// distinguished for diagnostics.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Payload is shorter (or longer) than the layout requires
    #[error("Invalid length: expected {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },
    /// Signature prefix does not match the format
    #[error("Signature mismatch: {0}")]
    Signature(String),
    /// Proximity identifier is not one of the Tilt colours
    #[error("Unknown Tilt color identifier: {0}")]
    UnknownColor(String),
    /// Custom iBeacon tag is not a known sensor family
    #[error("Unknown beacon tag: {0}")]
    UnknownTag(String),
    /// Extended payload marker names an unknown variant
    #[error("Unknown extended marker: {0}")]
    UnknownMarker(String),
    /// Structured text payload could not be interpreted
    #[error("Invalid payload: {0}")]
    Payload(String),
}

/// Error types for encoding readings into beacon payloads.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EncodeError {
    /// Beacon layouts carry a 32-bit hex chip id
    #[error("Invalid device id '{0}': expected up to 8 hex digits")]
    InvalidId(String),
    /// The reading variant has no representation in the requested format
    #[error("{reading} readings cannot be encoded as {format}")]
    Unsupported {
        reading: &'static str,
        format: &'static str,
    },
}

/// Convert a value to an unsigned 16-bit fixed-point field.
///
/// Rounds to the nearest step and saturates at the field bounds. Clamped
/// values are logged at debug.
pub fn to_fixed(value: f64, scale: f64) -> u16 {
    let scaled = (value * scale).round();
    if !fits_fixed(scaled) {
        debug!("{value} does not fit a fixed-point field at scale {scale}, clamping");
    }
    scaled as u16
}

fn fits_fixed(scaled: f64) -> bool {
    (0.0..=f64::from(u16::MAX)).contains(&scaled)
}

/// Convert an unsigned 16-bit fixed-point field back to a value.
pub fn from_fixed(raw: u16, scale: f64) -> f64 {
    f64::from(raw) / scale
}

/// Read a big-endian u16 at `offset`. Callers validate the length first.
pub(crate) fn be_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([data[offset], data[offset + 1]])
}

pub(crate) fn be_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

/// Chip ids travel as 32-bit integers and are shown as lower-case hex.
pub fn chip_id_to_string(chip_id: u32) -> String {
    format!("{chip_id:x}")
}

pub fn parse_chip_id(id: &str) -> Result<u32, EncodeError> {
    if id.is_empty() || id.len() > 8 {
        return Err(EncodeError::InvalidId(id.to_string()));
    }
    u32::from_str_radix(id, 16).map_err(|_| EncodeError::InvalidId(id.to_string()))
}

/// Ensure `data` is exactly `expected` bytes long.
pub(crate) fn check_length(data: &[u8], expected: usize) -> Result<(), DecodeError> {
    if data.len() != expected {
        return Err(DecodeError::Length {
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_fixed_rounds_instead_of_truncating() {
        // 1.05 * 1000 is 1049.999... in binary floating point
        assert_eq!(to_fixed(1.05, 1000.0), 1050);
        assert_eq!(to_fixed(1.0499, 10000.0), 10499);
    }

    #[test]
    fn test_to_fixed_saturates() {
        assert_eq!(to_fixed(-3.0, 1000.0), 0);
        assert_eq!(to_fixed(100.0, 1000.0), u16::MAX);
    }

    #[test]
    fn test_fits_fixed_flags_clamped_values() {
        assert!(fits_fixed(0.0));
        assert!(fits_fixed(65535.0));
        // cold crash chamber temperature, -1.5 C at x1000
        assert!(!fits_fixed((-1.5f64 * 1000.0).round()));
        assert!(!fits_fixed(65536.0));
        assert!(!fits_fixed(f64::NAN));
    }

    #[test]
    fn test_gravity_range_round_trips_at_both_scales() {
        for raw in 990..=1999u16 {
            let sg = from_fixed(raw, 1000.0);
            assert_eq!(to_fixed(sg, 1000.0), raw);
        }
        for raw in 9900..=19990u16 {
            let sg = from_fixed(raw, 10000.0);
            assert_eq!(to_fixed(sg, 10000.0), raw);
        }
    }

    #[test]
    fn test_chip_id_strings() {
        assert_eq!(chip_id_to_string(0x0011_2233), "112233");
        assert_eq!(parse_chip_id("112233").unwrap(), 0x0011_2233);
        assert_eq!(parse_chip_id("DEADBEEF").unwrap(), 0xDEAD_BEEF);
        assert!(parse_chip_id("").is_err());
        assert!(parse_chip_id("xyz").is_err());
        assert!(parse_chip_id("123456789").is_err());
    }

    #[test]
    fn test_decode_error_display() {
        let err = DecodeError::Length {
            expected: 25,
            actual: 3,
        };
        assert_eq!(err.to_string(), "Invalid length: expected 25 bytes, got 3");
        assert_eq!(
            DecodeError::UnknownTag("FOOBAR..".into()).to_string(),
            "Unknown beacon tag: FOOBAR.."
        );
    }
}
