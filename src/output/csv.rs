//! Fixed-width CSV rows for the data log.
//!
//! Every row has 14 columns. Column 0 is the row format version, followed by
//! type, source, creation time and id; the remaining columns depend on the
//! reading variant and unused trailing columns are left empty.

use crate::output::OutputFormatter;
use crate::reading::{Reading, ReadingData};

/// Row format version written in column 0.
pub const ROW_VERSION: u8 = 1;
/// Number of columns in every row.
pub const COLUMNS: usize = 14;

/// Format one data log row, without a line terminator.
pub fn format_row(reading: &Reading) -> String {
    let head = format!(
        "{ROW_VERSION},{},{},{},{}",
        reading.kind(),
        reading.source,
        reading.created,
        reading.id()
    );

    let tail = match &reading.data {
        ReadingData::Tilt(t) => format!(
            "{},{:.2},{:.4},{},{},,,,",
            t.color,
            t.temp_c(),
            t.gravity(),
            t.tx_power,
            t.rssi
        ),
        ReadingData::Gravity(g) => format!(
            "{},{},{:.2},{:.4},{:.4},{:.2},{},{},{}",
            g.name, g.token, g.temperature, g.gravity, g.angle, g.battery, g.tx_power, g.rssi,
            g.interval
        ),
        ReadingData::Pressure(p) => format!(
            "{},{},{:.2},{:.4},{:.4},{:.2},{},{},{}",
            p.name,
            p.token,
            p.temperature,
            p.pressure,
            p.pressure1,
            p.battery,
            p.tx_power,
            p.rssi,
            p.interval
        ),
        ReadingData::Chamber(c) => format!(
            "{:.2},{:.2},{},,,,,,",
            c.chamber_temp, c.beer_temp, c.rssi
        ),
    };

    format!("{head},{tail}")
}

/// CSV formatter; the resolved name is not part of the row.
#[derive(Debug, Default)]
pub struct CsvFormatter;

impl OutputFormatter for CsvFormatter {
    fn format(&self, reading: &Reading, _name: &str) -> String {
        format_row(reading)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::{ReadingSource, TiltColor, TiltReading};
    use crate::test_utils::{sample_chamber, sample_gravity, sample_pressure};

    const CREATED: &str = "2024-03-05 07:08:09";

    fn reading(source: ReadingSource, data: ReadingData) -> Reading {
        Reading::with_created(source, data, CREATED.to_string())
    }

    fn columns(row: &str) -> usize {
        row.split(',').count()
    }

    #[test]
    fn test_tilt_row() {
        let mut tilt = TiltReading::from_values(TiltColor::Purple, 68.0, 1.050, false);
        tilt.rssi = -67;
        let row = format_row(&reading(ReadingSource::BleBeacon, ReadingData::Tilt(tilt)));
        assert_eq!(
            row,
            "1,Tilt,BLE Beacon,2024-03-05 07:08:09,Purple,Purple,20.00,1.0500,-59,-67,,,,"
        );
        assert_eq!(columns(&row), COLUMNS);
    }

    #[test]
    fn test_gravity_row() {
        let row = format_row(&reading(
            ReadingSource::BleEddystone,
            ReadingData::Gravity(sample_gravity()),
        ));
        assert_eq!(
            row,
            "1,Gravitymon,BLE Eddystone,2024-03-05 07:08:09,112233,my_device_name,my_token,\
             20.20,1.0500,34.4500,3.85,0,-76,900"
        );
        assert_eq!(columns(&row), COLUMNS);
    }

    #[test]
    fn test_pressure_row() {
        let row = format_row(&reading(
            ReadingSource::BleConnect,
            ReadingData::Pressure(sample_pressure()),
        ));
        assert_eq!(
            row,
            "1,Pressuremon,BLE Connect,2024-03-05 07:08:09,445566,keg_1,my_token,\
             12.50,2.5000,1.2500,4.10,0,-70,300"
        );
        assert_eq!(columns(&row), COLUMNS);
    }

    #[test]
    fn test_chamber_row() {
        let row = format_row(&reading(
            ReadingSource::BleBeacon,
            ReadingData::Chamber(sample_chamber()),
        ));
        assert_eq!(
            row,
            "1,Chamber Controller,BLE Beacon,2024-03-05 07:08:09,778899,4.25,18.50,-60,,,,,,"
        );
        assert_eq!(columns(&row), COLUMNS);
    }

    #[test]
    fn test_formatter_ignores_name() {
        let r = reading(ReadingSource::BleBeacon, ReadingData::Chamber(sample_chamber()));
        assert_eq!(CsvFormatter.format(&r, "Fridge"), format_row(&r));
    }
}
