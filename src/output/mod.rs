//! Output formatters for fermentation readings.
//!
//! Two formats are provided: a fixed-width CSV row used for the durable data
//! log, and InfluxDB line protocol used when reporting aggregated entries.

pub mod csv;
pub mod influxdb;

use crate::reading::Reading;

/// Trait for formatting readings into output strings.
pub trait OutputFormatter: Send + Sync {
    /// Format a reading.
    ///
    /// # Arguments
    /// * `reading` - The reading to format (includes its creation time)
    /// * `name` - Human-readable name resolved for the reading's id
    fn format(&self, reading: &Reading, name: &str) -> String;
}
