//! Readings produced by fermentation sensors.
//!
//! A [`Reading`] wraps one decoded sample ([`ReadingData`]) together with the
//! provenance of the frame it came from and the wall-clock time it was decoded.
//! Each variant carries its own units:
//! - Tilt temperature in degrees Fahrenheit, integer scaled (x1, or x10 for Pro)
//! - Tilt gravity in SG, integer scaled (x1000, or x10000 for Pro)
//! - All other temperatures in Celsius
//! - Battery in Volts, pressure in PSI, interval in seconds

use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;
use time::macros::format_description;

/// Kind of sensor a reading came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadingType {
    Tilt,
    TiltPro,
    Gravitymon,
    Pressuremon,
    Chamber,
}

impl ReadingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadingType::Tilt => "Tilt",
            ReadingType::TiltPro => "Tilt Pro",
            ReadingType::Gravitymon => "Gravitymon",
            ReadingType::Pressuremon => "Pressuremon",
            ReadingType::Chamber => "Chamber Controller",
        }
    }
}

impl fmt::Display for ReadingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a reading reached the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadingSource {
    /// Self-contained manufacturer data frame (iBeacon layouts)
    BleBeacon,
    /// Eddystone TLM service data
    BleEddystone,
    /// Compact service data on the secondary channel
    BleExtended,
    /// Connect-and-read of the payload characteristic
    BleConnect,
    /// Pushed over the network by the sensor itself
    HttpPost,
}

impl ReadingSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadingSource::BleBeacon => "BLE Beacon",
            ReadingSource::BleEddystone => "BLE Eddystone",
            ReadingSource::BleExtended => "BLE Extended",
            ReadingSource::BleConnect => "BLE Connect",
            ReadingSource::HttpPost => "HTTP Post",
        }
    }
}

impl fmt::Display for ReadingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The eight Tilt hydrometer colours, in vendor order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TiltColor {
    Red,
    Green,
    Black,
    Purple,
    Orange,
    Blue,
    Yellow,
    Pink,
}

impl TiltColor {
    pub const ALL: [TiltColor; 8] = [
        TiltColor::Red,
        TiltColor::Green,
        TiltColor::Black,
        TiltColor::Purple,
        TiltColor::Orange,
        TiltColor::Blue,
        TiltColor::Yellow,
        TiltColor::Pink,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TiltColor::Red => "Red",
            TiltColor::Green => "Green",
            TiltColor::Black => "Black",
            TiltColor::Purple => "Purple",
            TiltColor::Orange => "Orange",
            TiltColor::Blue => "Blue",
            TiltColor::Yellow => "Yellow",
            TiltColor::Pink => "Pink",
        }
    }
}

impl fmt::Display for TiltColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TiltColor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TiltColor::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Unknown Tilt color: {s}"))
    }
}

/// Calibrated 1 m signal strength advertised by Tilt-compatible senders.
pub const TILT_TX_POWER: i8 = -59;

/// Tilt-compatible hydrometer sample, kept in the integer units of the beacon.
#[derive(Debug, Clone, PartialEq)]
pub struct TiltReading {
    pub color: TiltColor,
    /// Degrees F (x10 when `pro`)
    pub temp_raw: u16,
    /// SG x1000 (x10000 when `pro`)
    pub gravity_raw: u16,
    pub pro: bool,
    /// Calibrated tx power byte; recent Tilts use it as battery age
    pub tx_power: i8,
    pub rssi: i16,
}

impl TiltReading {
    /// Build a reading from floating point values, rounding to the beacon resolution.
    pub fn from_values(color: TiltColor, temp_f: f64, gravity: f64, pro: bool) -> Self {
        let (temp_scale, gravity_scale) = Self::scales(pro);
        Self {
            color,
            temp_raw: crate::codec::to_fixed(temp_f, temp_scale),
            gravity_raw: crate::codec::to_fixed(gravity, gravity_scale),
            pro,
            tx_power: TILT_TX_POWER,
            rssi: 0,
        }
    }

    fn scales(pro: bool) -> (f64, f64) {
        if pro { (10.0, 10000.0) } else { (1.0, 1000.0) }
    }

    pub fn temp_f(&self) -> f64 {
        f64::from(self.temp_raw) / Self::scales(self.pro).0
    }

    pub fn temp_c(&self) -> f64 {
        (self.temp_f() - 32.0) * 5.0 / 9.0
    }

    pub fn gravity(&self) -> f64 {
        f64::from(self.gravity_raw) / Self::scales(self.pro).1
    }
}

/// Gravitymon hydrometer sample.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GravityReading {
    pub id: String,
    pub name: String,
    pub token: String,
    pub temperature: f64,
    pub gravity: f64,
    pub angle: f64,
    pub battery: f64,
    pub tx_power: i8,
    pub rssi: i16,
    pub interval: u32,
}

/// Pressuremon sample with two pressure channels.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PressureReading {
    pub id: String,
    pub name: String,
    pub token: String,
    pub temperature: f64,
    pub pressure: f64,
    pub pressure1: f64,
    pub battery: f64,
    pub tx_power: i8,
    pub rssi: i16,
    pub interval: u32,
}

/// Fermentation chamber controller sample.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChamberReading {
    pub id: String,
    pub chamber_temp: f64,
    pub beer_temp: f64,
    pub rssi: i16,
}

/// One decoded sample, one variant per sensor family.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadingData {
    Tilt(TiltReading),
    Gravity(GravityReading),
    Pressure(PressureReading),
    Chamber(ChamberReading),
}

impl ReadingData {
    pub fn kind(&self) -> ReadingType {
        match self {
            ReadingData::Tilt(t) if t.pro => ReadingType::TiltPro,
            ReadingData::Tilt(_) => ReadingType::Tilt,
            ReadingData::Gravity(_) => ReadingType::Gravitymon,
            ReadingData::Pressure(_) => ReadingType::Pressuremon,
            ReadingData::Chamber(_) => ReadingType::Chamber,
        }
    }

    /// Logical sensor identity used as the aggregation key.
    pub fn id(&self) -> &str {
        match self {
            ReadingData::Tilt(t) => t.color.as_str(),
            ReadingData::Gravity(g) => &g.id,
            ReadingData::Pressure(p) => &p.id,
            ReadingData::Chamber(c) => &c.id,
        }
    }

    /// Display name advertised by the sensor, if it has one.
    pub fn display_name(&self) -> Option<&str> {
        let name = match self {
            ReadingData::Gravity(g) => &g.name,
            ReadingData::Pressure(p) => &p.name,
            ReadingData::Tilt(_) | ReadingData::Chamber(_) => return None,
        };
        (!name.is_empty()).then_some(name.as_str())
    }

    pub fn rssi(&self) -> i16 {
        match self {
            ReadingData::Tilt(t) => t.rssi,
            ReadingData::Gravity(g) => g.rssi,
            ReadingData::Pressure(p) => p.rssi,
            ReadingData::Chamber(c) => c.rssi,
        }
    }

    /// Replace the received signal strength with the one measured by the gateway.
    pub fn with_rssi(mut self, rssi: i16) -> Self {
        match &mut self {
            ReadingData::Tilt(t) => t.rssi = rssi,
            ReadingData::Gravity(g) => g.rssi = rssi,
            ReadingData::Pressure(p) => p.rssi = rssi,
            ReadingData::Chamber(c) => c.rssi = rssi,
        }
        self
    }
}

/// A decoded sample together with its provenance and creation time.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub source: ReadingSource,
    /// Wall-clock creation time, `YYYY-MM-DD HH:MM:SS`
    pub created: String,
    pub data: ReadingData,
}

impl Reading {
    /// Wrap decoded data, stamping it with the current wall-clock time.
    pub fn new(source: ReadingSource, data: ReadingData) -> Self {
        Self::with_created(source, data, wall_clock_now())
    }

    pub fn with_created(source: ReadingSource, data: ReadingData, created: String) -> Self {
        Self {
            source,
            created,
            data,
        }
    }

    pub fn kind(&self) -> ReadingType {
        self.data.kind()
    }

    pub fn id(&self) -> &str {
        self.data.id()
    }
}

/// Current wall-clock time formatted as `YYYY-MM-DD HH:MM:SS`.
///
/// Uses the local offset when the platform can report it, UTC otherwise.
pub fn wall_clock_now() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    format_timestamp(now)
}

pub fn format_timestamp(time: OffsetDateTime) -> String {
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    // The description only contains numeric components, which always format.
    time.format(&format).unwrap_or_default()
}
