//! Structured text payloads: compact service data and the verbose characteristic.
//!
//! Readings that do not fit a 25-byte frame travel as JSON. On the secondary
//! broadcast channel the keys are abbreviated to single letters and a marker
//! key names the variant. When read over a connection the payload uses the
//! full key names the sensor firmware has always produced. Both decode into
//! the same reading types through one key table per form.
//!
//! Keys that are absent decode as zero or empty; this is logged at debug level.

use super::{DecodeError, EncodeError};
use crate::reading::{GravityReading, PressureReading, ReadingData};
use log::debug;
use serde_json::{Map, Value};

/// Secondary 16-bit service id carrying the compact form.
pub const SERVICE_ID: u16 = 0x1801;
/// Key holding the variant marker in the compact form.
pub const MARKER_KEY: &str = "f";
pub const GRAVITY_MARKER: &str = "gm1";
pub const PRESSURE_MARKER: &str = "pm1";

/// Key names of one JSON form, mapped onto the canonical reading fields.
#[derive(Debug)]
pub struct FieldKeys {
    pub id: &'static str,
    pub name: &'static str,
    pub token: &'static str,
    pub interval: &'static str,
    pub temperature: &'static str,
    pub temp_units: &'static str,
    pub gravity: &'static str,
    pub angle: &'static str,
    pub battery: &'static str,
    pub rssi: &'static str,
    pub pressure: &'static str,
    pub pressure1: &'static str,
}

/// Single-letter keys used on the secondary broadcast channel.
pub const COMPACT_KEYS: FieldKeys = FieldKeys {
    id: "i",
    name: "n",
    token: "k",
    interval: "s",
    temperature: "t",
    temp_units: "u",
    gravity: "g",
    angle: "a",
    battery: "b",
    rssi: "r",
    pressure: "p",
    pressure1: "q",
};

/// Full keys used by the readable payload characteristic.
pub const CHARACTERISTIC_KEYS: FieldKeys = FieldKeys {
    id: "ID",
    name: "name",
    token: "token",
    interval: "interval",
    temperature: "temperature",
    temp_units: "temp_units",
    gravity: "gravity",
    angle: "angle",
    battery: "battery",
    rssi: "RSSI",
    pressure: "pressure",
    pressure1: "pressure1",
};

/// Typed access to a JSON object through a key table.
struct Fields<'a> {
    map: &'a Map<String, Value>,
    keys: &'a FieldKeys,
}

impl Fields<'_> {
    fn number(&self, key: &str) -> f64 {
        match self.map.get(key).and_then(Value::as_f64) {
            Some(value) => value,
            None => {
                debug!("Payload field '{key}' missing or not numeric, using 0");
                0.0
            }
        }
    }

    fn text(&self, key: &str) -> String {
        match self.map.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => {
                debug!("Payload field '{key}' missing, using empty string");
                String::new()
            }
        }
    }

    fn interval(&self) -> u32 {
        self.number(self.keys.interval).round() as u32
    }

    fn rssi(&self) -> i16 {
        self.number(self.keys.rssi).round() as i16
    }

    /// Temperature in Celsius, converting when the payload says Fahrenheit.
    fn temperature_c(&self) -> f64 {
        let value = self.number(self.keys.temperature);
        match self.map.get(self.keys.temp_units).and_then(Value::as_str) {
            Some(units) if units.eq_ignore_ascii_case("F") => (value - 32.0) * 5.0 / 9.0,
            _ => value,
        }
    }

    fn gravity(&self) -> GravityReading {
        GravityReading {
            id: self.text(self.keys.id),
            name: self.text(self.keys.name),
            token: self.text(self.keys.token),
            temperature: self.temperature_c(),
            gravity: self.number(self.keys.gravity),
            angle: self.number(self.keys.angle),
            battery: self.number(self.keys.battery),
            tx_power: 0,
            rssi: self.rssi(),
            interval: self.interval(),
        }
    }

    fn pressure(&self) -> PressureReading {
        PressureReading {
            id: self.text(self.keys.id),
            name: self.text(self.keys.name),
            token: self.text(self.keys.token),
            temperature: self.temperature_c(),
            pressure: self.number(self.keys.pressure),
            pressure1: self.number(self.keys.pressure1),
            battery: self.number(self.keys.battery),
            tx_power: 0,
            rssi: self.rssi(),
            interval: self.interval(),
        }
    }
}

fn parse_object(data: &[u8]) -> Result<Map<String, Value>, DecodeError> {
    match serde_json::from_slice::<Value>(data) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(DecodeError::Payload(format!(
            "expected a JSON object, got {other}"
        ))),
        Err(e) => Err(DecodeError::Payload(e.to_string())),
    }
}

fn to_object(data: &ReadingData, keys: &FieldKeys) -> Result<Map<String, Value>, EncodeError> {
    let mut map = Map::new();
    let mut put = |key: &str, value: Value| {
        map.insert(key.to_string(), value);
    };

    match data {
        ReadingData::Gravity(g) => {
            put(keys.id, g.id.clone().into());
            put(keys.name, g.name.clone().into());
            put(keys.token, g.token.clone().into());
            put(keys.interval, g.interval.into());
            put(keys.temperature, g.temperature.into());
            put(keys.temp_units, "C".into());
            put(keys.gravity, g.gravity.into());
            put(keys.angle, g.angle.into());
            put(keys.battery, g.battery.into());
            put(keys.rssi, g.rssi.into());
        }
        ReadingData::Pressure(p) => {
            put(keys.id, p.id.clone().into());
            put(keys.name, p.name.clone().into());
            put(keys.token, p.token.clone().into());
            put(keys.interval, p.interval.into());
            put(keys.temperature, p.temperature.into());
            put(keys.temp_units, "C".into());
            put(keys.pressure, p.pressure.into());
            put(keys.pressure1, p.pressure1.into());
            put(keys.battery, p.battery.into());
            put(keys.rssi, p.rssi.into());
        }
        ReadingData::Tilt(_) | ReadingData::Chamber(_) => {
            return Err(EncodeError::Unsupported {
                reading: data.kind().as_str(),
                format: "structured text",
            });
        }
    }

    Ok(map)
}

/// Encode a gravity or pressure reading in the compact single-letter form.
pub fn encode_compact(data: &ReadingData) -> Result<Vec<u8>, EncodeError> {
    let mut map = to_object(data, &COMPACT_KEYS)?;
    let marker = match data {
        ReadingData::Gravity(_) => GRAVITY_MARKER,
        _ => PRESSURE_MARKER,
    };
    map.insert(MARKER_KEY.to_string(), marker.into());
    Ok(Value::Object(map).to_string().into_bytes())
}

/// Decode compact service data, selecting the variant by its marker.
pub fn decode_compact(data: &[u8]) -> Result<ReadingData, DecodeError> {
    let map = parse_object(data)?;
    let fields = Fields {
        map: &map,
        keys: &COMPACT_KEYS,
    };

    match map.get(MARKER_KEY).and_then(Value::as_str) {
        Some(GRAVITY_MARKER) => Ok(ReadingData::Gravity(fields.gravity())),
        Some(PRESSURE_MARKER) => Ok(ReadingData::Pressure(fields.pressure())),
        Some(other) => Err(DecodeError::UnknownMarker(other.to_string())),
        None => Err(DecodeError::Signature(format!(
            "missing marker key '{MARKER_KEY}'"
        ))),
    }
}

/// Encode a reading as the verbose payload exposed by the readable characteristic.
pub fn encode_characteristic(data: &ReadingData) -> Result<Vec<u8>, EncodeError> {
    let map = to_object(data, &CHARACTERISTIC_KEYS)?;
    Ok(Value::Object(map).to_string().into_bytes())
}

/// Decode the verbose characteristic payload, remapping its keys.
///
/// A `gravity` key selects a gravity reading, otherwise a `pressure` key
/// selects a pressure reading.
pub fn decode_characteristic(data: &[u8]) -> Result<ReadingData, DecodeError> {
    let map = parse_object(data)?;
    let fields = Fields {
        map: &map,
        keys: &CHARACTERISTIC_KEYS,
    };

    if map.contains_key(CHARACTERISTIC_KEYS.gravity) {
        Ok(ReadingData::Gravity(fields.gravity()))
    } else if map.contains_key(CHARACTERISTIC_KEYS.pressure) {
        Ok(ReadingData::Pressure(fields.pressure()))
    } else {
        Err(DecodeError::Payload(
            "payload has neither gravity nor pressure".into(),
        ))
    }
}
