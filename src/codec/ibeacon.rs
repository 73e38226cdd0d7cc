//! iBeacon-compatible manufacturer data layouts.
//!
//! Both layouts are 25 bytes:
//!
//! ```text
//! 4C 00 | subtype | 15 | body (16) | major (2) | minor (2) | power (1)
//! ```
//!
//! Subtype `0x02` is the legacy layout used by Tilt hydrometers, where the body
//! is a colour-specific proximity UUID. Subtype `0x03` is the custom layout used
//! by Gravitymon, Pressuremon and the chamber controller, where the body starts
//! with an 8-byte ASCII tag and a 4-byte chip id and the remaining bytes hold
//! four 16-bit fields.

use super::{
    DecodeError, EncodeError, be_u16, be_u32, check_length, chip_id_to_string, from_fixed,
    parse_chip_id, to_fixed,
};
use crate::reading::{ChamberReading, GravityReading, PressureReading, ReadingData, TiltColor, TiltReading};

/// Apple company id as it appears on air (little-endian).
pub const COMPANY_ID_BYTES: [u8; 2] = [0x4C, 0x00];
/// Apple company id for lookups keyed by number.
pub const COMPANY_ID: u16 = 0x004C;
/// Subtype used by Tilt-compatible beacons.
pub const TILT_SUBTYPE: u8 = 0x02;
/// Subtype used by the custom sensor payloads.
pub const CUSTOM_SUBTYPE: u8 = 0x03;
/// Length of the subtype payload that follows the subtype length byte.
pub const SUBTYPE_LENGTH: u8 = 0x15;
/// Total manufacturer data length including the company id.
pub const FRAME_LEN: usize = 25;

pub const GRAVITY_TAG: &[u8; 8] = b"GRAVMON.";
pub const PRESSURE_TAG: &[u8; 8] = b"PRESMON.";
pub const CHAMBER_TAG: &[u8; 8] = b"CHAMBER.";

/// Proximity identifiers, in [`TiltColor::ALL`] order.
const TILT_COLOR_UUIDS: [&str; 8] = [
    "a495bb10c5b14b44b5121370f02d74de",
    "a495bb20c5b14b44b5121370f02d74de",
    "a495bb30c5b14b44b5121370f02d74de",
    "a495bb40c5b14b44b5121370f02d74de",
    "a495bb50c5b14b44b5121370f02d74de",
    "a495bb60c5b14b44b5121370f02d74de",
    "a495bb70c5b14b44b5121370f02d74de",
    "a495bb80c5b14b44b5121370f02d74de",
];

/// Above this minor value the beacon uses the high resolution (Pro) scaling.
const TILT_PRO_MINOR_THRESHOLD: u16 = 5000;

/// Check the 4-byte signature prefix for the given subtype.
pub fn has_signature(data: &[u8], subtype: u8) -> bool {
    data.len() >= 4
        && data[..2] == COMPANY_ID_BYTES
        && data[2] == subtype
        && data[3] == SUBTYPE_LENGTH
}

fn check_signature(data: &[u8], subtype: u8) -> Result<(), DecodeError> {
    if data.len() < 4 {
        return Err(DecodeError::Length {
            expected: FRAME_LEN,
            actual: data.len(),
        });
    }
    if !has_signature(data, subtype) {
        return Err(DecodeError::Signature(format!(
            "expected 4c00{subtype:02x}15, got {}",
            to_hex(&data[..4])
        )));
    }
    check_length(data, FRAME_LEN)
}

fn header(subtype: u8) -> [u8; FRAME_LEN] {
    let mut frame = [0u8; FRAME_LEN];
    frame[..2].copy_from_slice(&COMPANY_ID_BYTES);
    frame[2] = subtype;
    frame[3] = SUBTYPE_LENGTH;
    frame
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// 16-byte proximity identifier for a Tilt colour.
pub fn color_uuid(color: TiltColor) -> [u8; 16] {
    let hex = TILT_COLOR_UUIDS[color as usize];
    let mut uuid = [0u8; 16];
    for (i, byte) in uuid.iter_mut().enumerate() {
        // The table is a compile-time constant of valid hex digits.
        *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).unwrap_or_default();
    }
    uuid
}

/// Look up the Tilt colour for a 16-byte proximity identifier.
pub fn color_from_uuid(uuid: &[u8]) -> Result<TiltColor, DecodeError> {
    let hex = to_hex(uuid);
    TILT_COLOR_UUIDS
        .iter()
        .position(|candidate| *candidate == hex)
        .map(|i| TiltColor::ALL[i])
        .ok_or(DecodeError::UnknownColor(hex))
}

/// Encode a Tilt reading as iBeacon manufacturer data.
pub fn encode_tilt(tilt: &TiltReading) -> [u8; FRAME_LEN] {
    let mut frame = header(TILT_SUBTYPE);
    frame[4..20].copy_from_slice(&color_uuid(tilt.color));
    frame[20..22].copy_from_slice(&tilt.temp_raw.to_be_bytes());
    frame[22..24].copy_from_slice(&tilt.gravity_raw.to_be_bytes());
    frame[24] = tilt.tx_power as u8;
    frame
}

/// Decode Tilt-compatible manufacturer data.
///
/// The received signal strength is not part of the payload and is left at 0.
pub fn decode_tilt(data: &[u8]) -> Result<TiltReading, DecodeError> {
    check_signature(data, TILT_SUBTYPE)?;

    let color = color_from_uuid(&data[4..20])?;
    let temp_raw = be_u16(data, 20);
    let gravity_raw = be_u16(data, 22);

    Ok(TiltReading {
        color,
        temp_raw,
        gravity_raw,
        pro: gravity_raw > TILT_PRO_MINOR_THRESHOLD,
        tx_power: data[24] as i8,
        rssi: 0,
    })
}

fn custom_frame(tag: &[u8; 8], chip_id: u32, fields: [u16; 4]) -> [u8; FRAME_LEN] {
    let mut frame = header(CUSTOM_SUBTYPE);
    frame[4..12].copy_from_slice(tag);
    frame[12..16].copy_from_slice(&chip_id.to_be_bytes());
    for (i, field) in fields.iter().enumerate() {
        let offset = 16 + i * 2;
        frame[offset..offset + 2].copy_from_slice(&field.to_be_bytes());
    }
    // frame[24] is the signal byte, always 0
    frame
}

/// Encode a Gravitymon reading using the custom `GRAVMON.` layout.
pub fn encode_gravity(reading: &GravityReading) -> Result<[u8; FRAME_LEN], EncodeError> {
    let chip_id = parse_chip_id(&reading.id)?;
    Ok(custom_frame(
        GRAVITY_TAG,
        chip_id,
        [
            to_fixed(reading.angle, 100.0),
            to_fixed(reading.battery, 1000.0),
            to_fixed(reading.gravity, 10000.0),
            to_fixed(reading.temperature, 1000.0),
        ],
    ))
}

/// Encode a Pressuremon reading using the custom `PRESMON.` layout.
pub fn encode_pressure(reading: &PressureReading) -> Result<[u8; FRAME_LEN], EncodeError> {
    let chip_id = parse_chip_id(&reading.id)?;
    Ok(custom_frame(
        PRESSURE_TAG,
        chip_id,
        [
            to_fixed(reading.pressure, 100.0),
            to_fixed(reading.pressure1, 100.0),
            to_fixed(reading.battery, 1000.0),
            to_fixed(reading.temperature, 1000.0),
        ],
    ))
}

/// Encode a chamber controller reading using the custom `CHAMBER.` layout.
pub fn encode_chamber(reading: &ChamberReading) -> Result<[u8; FRAME_LEN], EncodeError> {
    let chip_id = parse_chip_id(&reading.id)?;
    Ok(custom_frame(
        CHAMBER_TAG,
        chip_id,
        [
            to_fixed(reading.chamber_temp, 1000.0),
            to_fixed(reading.beer_temp, 1000.0),
            0,
            0,
        ],
    ))
}

/// Decode the custom (subtype 0x03) layout, dispatching on the ASCII tag.
pub fn decode_custom(data: &[u8]) -> Result<ReadingData, DecodeError> {
    check_signature(data, CUSTOM_SUBTYPE)?;

    let tag = &data[4..12];
    let id = chip_id_to_string(be_u32(data, 12));
    let field = |i: usize, scale: f64| from_fixed(be_u16(data, 16 + i * 2), scale);

    if tag == GRAVITY_TAG {
        Ok(ReadingData::Gravity(GravityReading {
            id,
            angle: field(0, 100.0),
            battery: field(1, 1000.0),
            gravity: field(2, 10000.0),
            temperature: field(3, 1000.0),
            ..Default::default()
        }))
    } else if tag == PRESSURE_TAG {
        Ok(ReadingData::Pressure(PressureReading {
            id,
            pressure: field(0, 100.0),
            pressure1: field(1, 100.0),
            battery: field(2, 1000.0),
            temperature: field(3, 1000.0),
            ..Default::default()
        }))
    } else if tag == CHAMBER_TAG {
        Ok(ReadingData::Chamber(ChamberReading {
            id,
            chamber_temp: field(0, 1000.0),
            beer_temp: field(1, 1000.0),
            rssi: 0,
        }))
    } else {
        Err(DecodeError::UnknownTag(String::from_utf8_lossy(tag).into_owned()))
    }
}

/// Decode any iBeacon-compatible payload.
pub fn decode(data: &[u8]) -> Result<ReadingData, DecodeError> {
    if has_signature(data, TILT_SUBTYPE) {
        decode_tilt(data).map(ReadingData::Tilt)
    } else {
        decode_custom(data)
    }
}
