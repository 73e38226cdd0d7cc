//! Beacon sender for sensor nodes.
//!
//! Builds the broadcast frame for a reading in one of the supported beacon
//! formats and keeps it on air for a bounded time through an [`Advertiser`].

use crate::classifier::{GRAVITYMON_NAME, PRESSUREMON_NAME};
use crate::codec::{EncodeError, eddystone, extended, ibeacon};
use crate::reading::{ReadingData, TiltReading};
use crate::scanner::{Advertiser, RadioError};
use log::{debug, info};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// How long one frame stays on air unless configured otherwise.
pub const DEFAULT_SEND_TIME: Duration = Duration::from_millis(500);

/// Everything an advertiser needs to put one frame on air.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BroadcastFrame {
    pub local_name: Option<String>,
    /// Manufacturer data including the little-endian company id prefix
    pub manufacturer_data: Option<Vec<u8>>,
    /// Service data keyed by 16-bit service id
    pub service_data: Vec<(u16, Vec<u8>)>,
    pub connectable: bool,
}

/// Beacon formats a sensor node can broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum BeaconFormat {
    /// Tilt iBeacon, whole degrees F and SG x1000
    Tilt,
    /// Tilt Pro iBeacon, tenths of degrees F and SG x10000
    TiltPro,
    /// Custom iBeacon carrying a gravity reading
    GravityBeacon,
    /// Custom iBeacon carrying a pressure reading
    PressureBeacon,
    /// Custom iBeacon carrying a chamber controller reading
    ChamberBeacon,
    /// Eddystone TLM-compatible service data
    Eddystone,
    /// Compact JSON on the secondary service
    Extended,
}

impl BeaconFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            BeaconFormat::Tilt => "tilt",
            BeaconFormat::TiltPro => "tilt-pro",
            BeaconFormat::GravityBeacon => "gravity-beacon",
            BeaconFormat::PressureBeacon => "pressure-beacon",
            BeaconFormat::ChamberBeacon => "chamber-beacon",
            BeaconFormat::Eddystone => "eddystone",
            BeaconFormat::Extended => "extended",
        }
    }
}

impl fmt::Display for BeaconFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for sending a beacon.
#[derive(Error, Debug)]
pub enum SendError {
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Radio(#[from] RadioError),
}

/// Build the frame that carries `data` in `format`.
pub fn frame_for(format: BeaconFormat, data: &ReadingData) -> Result<BroadcastFrame, EncodeError> {
    let unsupported = || EncodeError::Unsupported {
        reading: data.kind().as_str(),
        format: format.as_str(),
    };

    let frame = match (format, data) {
        (BeaconFormat::Tilt | BeaconFormat::TiltPro, ReadingData::Tilt(t)) => {
            let pro = format == BeaconFormat::TiltPro;
            let tilt = if t.pro == pro {
                t.clone()
            } else {
                TiltReading {
                    tx_power: t.tx_power,
                    ..TiltReading::from_values(t.color, t.temp_f(), t.gravity(), pro)
                }
            };
            beacon(ibeacon::encode_tilt(&tilt).to_vec())
        }
        (BeaconFormat::GravityBeacon, ReadingData::Gravity(g)) => {
            beacon(ibeacon::encode_gravity(g)?.to_vec())
        }
        (BeaconFormat::PressureBeacon, ReadingData::Pressure(p)) => {
            beacon(ibeacon::encode_pressure(p)?.to_vec())
        }
        (BeaconFormat::ChamberBeacon, ReadingData::Chamber(c)) => {
            beacon(ibeacon::encode_chamber(c)?.to_vec())
        }
        (BeaconFormat::Eddystone, ReadingData::Gravity(g)) => BroadcastFrame {
            local_name: Some(GRAVITYMON_NAME.to_string()),
            service_data: vec![(eddystone::SERVICE_ID, eddystone::encode(g)?.to_vec())],
            ..Default::default()
        },
        (BeaconFormat::Extended, ReadingData::Gravity(_) | ReadingData::Pressure(_)) => {
            let name = match data {
                ReadingData::Gravity(_) => GRAVITYMON_NAME,
                _ => PRESSUREMON_NAME,
            };
            BroadcastFrame {
                local_name: Some(name.to_string()),
                service_data: vec![(extended::SERVICE_ID, extended::encode_compact(data)?)],
                ..Default::default()
            }
        }
        _ => return Err(unsupported()),
    };

    Ok(frame)
}

fn beacon(manufacturer_data: Vec<u8>) -> BroadcastFrame {
    BroadcastFrame {
        manufacturer_data: Some(manufacturer_data),
        ..Default::default()
    }
}

/// Broadcasts readings through an [`Advertiser`], one bounded burst per call.
pub struct BeaconSender<A: Advertiser> {
    advertiser: A,
    send_time: Duration,
}

impl<A: Advertiser> BeaconSender<A> {
    pub fn new(advertiser: A) -> Self {
        Self {
            advertiser,
            send_time: DEFAULT_SEND_TIME,
        }
    }

    pub fn with_send_time(mut self, send_time: Duration) -> Self {
        self.send_time = send_time;
        self
    }

    pub fn send_time(&self) -> Duration {
        self.send_time
    }

    /// Encode `data` as `format` and keep it on air for the send time.
    pub async fn send(
        &mut self,
        format: BeaconFormat,
        data: &ReadingData,
    ) -> Result<BroadcastFrame, SendError> {
        let frame = frame_for(format, data)?;
        info!(
            "Sending {} reading for {} as {format} for {} ms",
            data.kind(),
            data.id(),
            self.send_time.as_millis()
        );
        debug!("Frame: {frame:?}");
        self.advertiser.emit(&frame, self.send_time).await?;
        Ok(frame)
    }

    pub fn into_inner(self) -> A {
        self.advertiser
    }
}
