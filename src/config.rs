//! Gateway tuning knobs and duration parsing for the command line.

use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration of the gateway pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    /// Length of one scan window
    pub scan_window: Duration,
    /// Request scan responses (active scan) instead of listening passively
    pub active_scan: bool,
    /// Upper bound for a single connect attempt
    pub connect_timeout: Duration,
    /// Aggregation store capacity
    pub max_entries: usize,
    /// Devices queued for connect-and-read per pass
    pub max_pending: usize,
    /// Pooled client sessions
    pub max_sessions: usize,
    /// Minimum time between two reports of the same entry
    pub push_interval: Duration,
    /// Append-only CSV data log
    pub data_log: Option<PathBuf>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            scan_window: Duration::from_secs(5),
            active_scan: false,
            connect_timeout: Duration::from_secs(5),
            max_entries: 20,
            max_pending: 4,
            max_sessions: 3,
            push_interval: Duration::ZERO,
            data_log: None,
        }
    }
}

/// Parse a duration from a human-readable string.
///
/// Supports the following suffixes:
/// - `s` or no suffix: seconds
/// - `m`: minutes
/// - `h`: hours
/// - `ms`: milliseconds
///
/// # Examples
/// ```
/// use brewbeacon::config::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
/// assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
/// assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
/// ```
pub fn parse_duration(src: &str) -> Result<Duration, String> {
    let src = src.trim();

    if src.is_empty() {
        return Err("empty duration string".to_string());
    }

    let (num, unit, scale) = if let Some(num) = src.strip_suffix("ms") {
        (num, "milliseconds", Duration::from_millis(1))
    } else if let Some(num) = src.strip_suffix('h') {
        (num, "hours", Duration::from_secs(3600))
    } else if let Some(num) = src.strip_suffix('m') {
        (num, "minutes", Duration::from_secs(60))
    } else if let Some(num) = src.strip_suffix('s') {
        (num, "seconds", Duration::from_secs(1))
    } else {
        (src, "duration", Duration::from_secs(1))
    };

    let count: u32 = num
        .trim()
        .parse()
        .map_err(|_| format!("invalid {unit}: {num}"))?;
    Ok(scale * count)
}

/// Parse a store or pool size that must hold at least one element.
pub fn parse_capacity(src: &str) -> Result<usize, String> {
    match src.trim().parse::<usize>() {
        Ok(0) => Err("capacity must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(_) => Err(format!("invalid capacity: {src}")),
    }
}
