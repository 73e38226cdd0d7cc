//! InfluxDB line protocol output formatter.

use crate::output::OutputFormatter;
use crate::reading::{Reading, ReadingData};
use std::collections::BTreeMap;
use std::fmt;

/// Field values for InfluxDB line protocol
#[derive(Debug, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
    String(String),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FieldValue::Float(num) => write!(f, "{num}"),
            FieldValue::Integer(num) => write!(f, "{num}i"),
            FieldValue::String(s) => write!(f, "\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
        }
    }
}

/// Data point in InfluxDB line protocol, timestamped by the server on write
#[derive(Debug)]
pub struct DataPoint {
    pub measurement: String,
    pub tag_set: BTreeMap<String, String>,
    pub field_set: BTreeMap<String, FieldValue>,
}

/// Escape commas, equals signs and spaces in tag keys and values.
fn escape_tag(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, ',' | '=' | ' ') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn fmt_tags(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    for (key, value) in data_point.tag_set.iter() {
        write!(fmt, ",{}={}", escape_tag(key), escape_tag(value))?;
    }
    Ok(())
}

fn fmt_fields(data_point: &DataPoint, fmt: &mut fmt::Formatter) -> fmt::Result {
    let mut first = true;
    for (key, value) in data_point.field_set.iter() {
        if first {
            first = false;
        } else {
            write!(fmt, ",")?;
        }
        write!(fmt, "{}={}", escape_tag(key), value)?;
    }
    Ok(())
}

impl fmt::Display for DataPoint {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}", escape_tag(&self.measurement))?;
        fmt_tags(self, fmt)?;
        write!(fmt, " ")?;
        fmt_fields(self, fmt)
    }
}

/// InfluxDB line protocol formatter.
///
/// Tags every point with the reading's id, resolved name, type and source.
pub struct InfluxDbFormatter {
    /// The measurement name in InfluxDB
    measurement_name: String,
}

impl InfluxDbFormatter {
    pub fn new(measurement_name: String) -> Self {
        Self { measurement_name }
    }

    fn tag_set(&self, reading: &Reading, name: &str) -> BTreeMap<String, String> {
        let mut tags = BTreeMap::new();
        tags.insert("id".to_string(), reading.id().to_string());
        tags.insert("name".to_string(), name.to_string());
        tags.insert("type".to_string(), reading.kind().to_string());
        tags.insert("source".to_string(), reading.source.to_string());
        tags
    }

    /// Build the field set; temperatures are reported in Celsius.
    fn field_set(&self, reading: &Reading) -> BTreeMap<String, FieldValue> {
        let mut fields = BTreeMap::new();

        macro_rules! float {
            ($name:literal, $val:expr) => {
                fields.insert($name.into(), FieldValue::Float($val));
            };
        }
        macro_rules! int {
            ($name:literal, $val:expr) => {
                fields.insert($name.into(), FieldValue::Integer(i64::from($val)));
            };
        }

        match &reading.data {
            ReadingData::Tilt(t) => {
                float!("temperature", t.temp_c());
                float!("temperature_f", t.temp_f());
                float!("gravity", t.gravity());
                int!("tx_power", t.tx_power);
                int!("rssi", t.rssi);
            }
            ReadingData::Gravity(g) => {
                float!("temperature", g.temperature);
                float!("gravity", g.gravity);
                float!("angle", g.angle);
                float!("battery", g.battery);
                int!("tx_power", g.tx_power);
                int!("rssi", g.rssi);
                int!("interval", g.interval);
            }
            ReadingData::Pressure(p) => {
                float!("temperature", p.temperature);
                float!("pressure", p.pressure);
                float!("pressure1", p.pressure1);
                float!("battery", p.battery);
                int!("tx_power", p.tx_power);
                int!("rssi", p.rssi);
                int!("interval", p.interval);
            }
            ReadingData::Chamber(c) => {
                float!("chamber_temperature", c.chamber_temp);
                float!("beer_temperature", c.beer_temp);
                int!("rssi", c.rssi);
            }
        }

        fields.insert(
            "created".into(),
            FieldValue::String(reading.created.clone()),
        );
        fields
    }

    fn to_data_point(&self, reading: &Reading, name: &str) -> DataPoint {
        DataPoint {
            measurement: self.measurement_name.clone(),
            tag_set: self.tag_set(reading, name),
            field_set: self.field_set(reading),
        }
    }
}

impl OutputFormatter for InfluxDbFormatter {
    fn format(&self, reading: &Reading, name: &str) -> String {
        format!("{}", self.to_data_point(reading, name))
    }
}
