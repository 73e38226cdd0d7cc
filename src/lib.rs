//! `brewbeacon` library.
//!
//! Decodes fermentation sensor beacons (Tilt, Gravitymon, Pressuremon and
//! chamber controllers), runs the scan/connect/aggregate gateway pipeline and
//! builds the frames a sensor node broadcasts.
//!
//! The binary (`src/main.rs`) is responsible for CLI parsing, logging setup
//! and process exit codes. The pipeline lives in [`crate::app`] where it can
//! be tested deterministically with an injected radio and output stream.

pub mod alias;
pub mod app;
pub mod classifier;
pub mod codec;
pub mod config;
pub mod discovery;
pub mod mac_address;
pub mod output;
pub mod reading;
pub mod scanner;
pub mod sender;
pub mod store;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use alias::{Alias, AliasMap, parse_alias, resolve_name, to_map};
pub use classifier::{Advertisement, Classification, classify};
pub use codec::{DecodeError, EncodeError};
pub use config::{GatewayConfig, parse_capacity, parse_duration};
pub use discovery::{Discovery, SessionError, SessionState};
pub use mac_address::MacAddress;
pub use output::OutputFormatter;
pub use output::csv::CsvFormatter;
pub use output::influxdb::InfluxDbFormatter;
pub use reading::{Reading, ReadingData, ReadingSource, ReadingType, TiltColor};
pub use scanner::{Advertiser, Link, Radio, RadioError};
pub use sender::{BeaconFormat, BeaconSender, BroadcastFrame};
pub use store::{Entry, RowSink, Store};
