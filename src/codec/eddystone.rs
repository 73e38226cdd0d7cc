//! Eddystone TLM-compatible service data.
//!
//! Gravitymon reuses the Eddystone telemetry frame, carried as service data
//! under the Eddystone service id, with its own 14-byte body:
//!
//! ```text
//! 20 | 00 | battery x1000 | temp x1000 | gravity x10000 | angle x100 | chip id (4)
//! ```

use super::{
    DecodeError, EncodeError, be_u16, be_u32, check_length, chip_id_to_string, from_fixed,
    parse_chip_id, to_fixed,
};
use crate::reading::GravityReading;

/// Eddystone 16-bit service id.
pub const SERVICE_ID: u16 = 0xFEAA;
/// Eddystone TLM frame type.
pub const FRAME_TYPE_TLM: u8 = 0x20;
pub const TLM_VERSION: u8 = 0x00;
pub const BODY_LEN: usize = 14;

/// Encode a gravity reading as a TLM body.
pub fn encode(reading: &GravityReading) -> Result<[u8; BODY_LEN], EncodeError> {
    let chip_id = parse_chip_id(&reading.id)?;

    let mut body = [0u8; BODY_LEN];
    body[0] = FRAME_TYPE_TLM;
    body[1] = TLM_VERSION;
    body[2..4].copy_from_slice(&to_fixed(reading.battery, 1000.0).to_be_bytes());
    body[4..6].copy_from_slice(&to_fixed(reading.temperature, 1000.0).to_be_bytes());
    body[6..8].copy_from_slice(&to_fixed(reading.gravity, 10000.0).to_be_bytes());
    body[8..10].copy_from_slice(&to_fixed(reading.angle, 100.0).to_be_bytes());
    body[10..14].copy_from_slice(&chip_id.to_be_bytes());
    Ok(body)
}

/// Decode a TLM body into a gravity reading.
///
/// Name, token and interval are not carried by this frame and stay empty.
pub fn decode(data: &[u8]) -> Result<GravityReading, DecodeError> {
    if data.len() < 2 || data[0] != FRAME_TYPE_TLM || data[1] != TLM_VERSION {
        return Err(DecodeError::Signature(
            "expected Eddystone TLM frame 2000".into(),
        ));
    }
    check_length(data, BODY_LEN)?;

    Ok(GravityReading {
        id: chip_id_to_string(be_u32(data, 10)),
        battery: from_fixed(be_u16(data, 2), 1000.0),
        temperature: from_fixed(be_u16(data, 4), 1000.0),
        gravity: from_fixed(be_u16(data, 6), 10000.0),
        angle: from_fixed(be_u16(data, 8), 100.0),
        ..Default::default()
    })
}
