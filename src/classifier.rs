//! Advertisement classification.
//!
//! Decides which beacon format a received advertisement carries and decodes
//! it. Classification is pure: it never touches the aggregation store or the
//! pending connection list, it only tells the caller what to do.

use crate::codec::{DecodeError, eddystone, extended, ibeacon};
use crate::mac_address::MacAddress;
use crate::reading::{ReadingData, ReadingSource};

/// Local name advertised by Gravitymon hydrometers.
pub const GRAVITYMON_NAME: &str = "gravitymon";
/// Local name advertised by Pressuremon sensors.
pub const PRESSUREMON_NAME: &str = "pressuremon";

/// One received broadcast frame.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Advertisement {
    pub name: Option<String>,
    pub address: MacAddress,
    /// Manufacturer data including the little-endian company id prefix
    pub manufacturer_data: Vec<u8>,
    /// Service data keyed by 16-bit service id
    pub service_data: Vec<(u16, Vec<u8>)>,
    pub rssi: i16,
}

impl Advertisement {
    pub fn service_data(&self, service: u16) -> Option<&[u8]> {
        self.service_data
            .iter()
            .find(|(id, _)| *id == service)
            .map(|(_, data)| data.as_slice())
    }

    fn has_name(&self, name: &str) -> bool {
        self.name.as_deref() == Some(name)
    }
}

/// Outcome of classifying one advertisement.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    /// Self-contained payload, decoded
    Decoded {
        source: ReadingSource,
        data: ReadingData,
    },
    /// Known sensor whose data must be read over a connection
    ConnectRequired(MacAddress),
    /// Signature matched but the body did not decode
    Unrecognized(DecodeError),
    /// Not a frame this gateway understands
    Ignored,
}

/// Classify an advertisement in priority order:
///
/// 1. Gravitymon name with Eddystone service data
/// 2. service data on the secondary (extended) channel
/// 3. Gravitymon or Pressuremon name without either: connect required
/// 4. iBeacon-compatible manufacturer data (Tilt or custom layouts)
pub fn classify(adv: &Advertisement) -> Classification {
    if adv.has_name(GRAVITYMON_NAME)
        && let Some(body) = adv.service_data(eddystone::SERVICE_ID)
    {
        return decoded(
            ReadingSource::BleEddystone,
            eddystone::decode(body).map(|g| ReadingData::Gravity(g).with_rssi(adv.rssi)),
        );
    }

    if let Some(body) = adv.service_data(extended::SERVICE_ID) {
        return decoded(ReadingSource::BleExtended, extended::decode_compact(body));
    }

    if adv.has_name(GRAVITYMON_NAME) || adv.has_name(PRESSUREMON_NAME) {
        return Classification::ConnectRequired(adv.address);
    }

    let data = &adv.manufacturer_data;
    if ibeacon::has_signature(data, ibeacon::TILT_SUBTYPE)
        || ibeacon::has_signature(data, ibeacon::CUSTOM_SUBTYPE)
    {
        return decoded(
            ReadingSource::BleBeacon,
            ibeacon::decode(data).map(|d| d.with_rssi(adv.rssi)),
        );
    }

    Classification::Ignored
}

fn decoded(source: ReadingSource, result: Result<ReadingData, DecodeError>) -> Classification {
    match result {
        Ok(data) => Classification::Decoded { source, data },
        Err(e) => Classification::Unrecognized(e),
    }
}
