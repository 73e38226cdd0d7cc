//! Core application runner (business logic) for `brewbeacon`.
//!
//! This module is decoupled from CLI parsing and process exit codes so the
//! gateway loop can be driven deterministically with an injected radio and
//! output stream.

use crate::alias::{Alias, AliasMap};
use crate::classifier::{Classification, classify};
use crate::config::{GatewayConfig, parse_capacity, parse_duration};
use crate::discovery::Discovery;
use crate::output::OutputFormatter;
use crate::output::csv::CsvFormatter;
use crate::output::influxdb::InfluxDbFormatter;
use crate::reading::{
    ChamberReading, GravityReading, PressureReading, Reading, ReadingData, TiltColor, TiltReading,
};
use crate::scanner::{Advertiser, Radio, RadioError};
use crate::sender::{BeaconFormat, BeaconSender, BroadcastFrame, SendError};
use crate::store::{CsvFile, Store};
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::{debug, info, warn};
use std::io;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// How often the gateway checks whether the scan window has closed.
pub const SCAN_POLL: Duration = Duration::from_millis(100);

/// Command line of the `brewbeacon` binary.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    #[command(subcommand)]
    pub command: Command,

    /// Verbose output, log decode failures and session details
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Scan for sensors and print aggregated readings
    Gateway(GatewayArgs),
    /// Broadcast one reading as a beacon, the way a sensor node does
    Emit(EmitArgs),
}

/// Report format written to stdout by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// InfluxDB line protocol
    Influxdb,
    /// Data log rows
    Csv,
}

#[derive(Args, Debug, Clone)]
pub struct GatewayArgs {
    /// Length of each scan window.
    /// Accepts duration with suffix: 3s, 1m, 500ms, 2h.
    #[arg(long, default_value = "5s", value_parser = parse_duration)]
    pub scan_window: Duration,

    /// Request scan responses (active scan) instead of listening passively
    #[arg(long)]
    pub active: bool,

    /// Give up on a connection attempt after this long
    #[arg(long, default_value = "5s", value_parser = parse_duration)]
    pub connect_timeout: Duration,

    /// Number of sensors kept in the aggregation store (at least 1)
    #[arg(long, default_value = "20", value_parser = parse_capacity)]
    pub max_entries: usize,

    /// Devices queued for connect-and-read per scan pass
    #[arg(long, default_value_t = 4)]
    pub max_pending: usize,

    /// Pooled client sessions
    #[arg(long, default_value_t = 3)]
    pub max_sessions: usize,

    /// Append every received reading to this CSV file
    #[arg(long, value_name = "PATH")]
    pub data_log: Option<PathBuf>,

    /// Report a sensor at most once per interval
    #[arg(long, default_value = "0s", value_parser = parse_duration)]
    pub push_interval: Duration,

    /// Stop after this many scan passes (runs forever by default)
    #[arg(long)]
    pub passes: Option<u64>,

    /// Specify human-readable alias for a sensor id (chip id or Tilt colour).
    /// Format: --alias Purple=Stout
    #[arg(long = "alias", value_parser = crate::alias::parse_alias, value_name = "ALIAS")]
    pub aliases: Vec<Alias>,

    /// Report format
    #[arg(long, value_enum, default_value = "influxdb")]
    pub output: OutputFormat,

    /// The name of the measurement in InfluxDB line protocol.
    #[arg(long, default_value = "fermentation")]
    pub influxdb_measurement: String,
}

impl GatewayArgs {
    pub fn config(&self) -> GatewayConfig {
        GatewayConfig {
            scan_window: self.scan_window,
            active_scan: self.active,
            connect_timeout: self.connect_timeout,
            max_entries: self.max_entries,
            max_pending: self.max_pending,
            max_sessions: self.max_sessions,
            push_interval: self.push_interval,
            data_log: self.data_log.clone(),
        }
    }

    pub fn formatter(&self) -> Box<dyn OutputFormatter> {
        match self.output {
            OutputFormat::Influxdb => {
                Box::new(InfluxDbFormatter::new(self.influxdb_measurement.clone()))
            }
            OutputFormat::Csv => Box::new(CsvFormatter),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct EmitArgs {
    /// Beacon format to broadcast
    #[arg(value_enum)]
    pub format: BeaconFormat,

    /// Tilt colour (tilt formats only)
    #[arg(long, default_value = "purple")]
    pub color: TiltColor,

    /// Chip id, 1-8 hex digits
    #[arg(long, default_value = "112233")]
    pub id: String,

    /// Temperature in degrees Celsius (chamber temperature for chamber beacons)
    #[arg(long, default_value_t = 20.0, allow_negative_numbers = true)]
    pub temperature: f64,

    /// Specific gravity
    #[arg(long, default_value_t = 1.0)]
    pub gravity: f64,

    /// Tilt angle in degrees
    #[arg(long, default_value_t = 0.0)]
    pub angle: f64,

    /// Battery voltage
    #[arg(long, default_value_t = 0.0)]
    pub battery: f64,

    /// Pressure in PSI
    #[arg(long, default_value_t = 0.0)]
    pub pressure: f64,

    /// Second pressure sensor in PSI
    #[arg(long, default_value_t = 0.0)]
    pub pressure1: f64,

    /// Beer temperature in degrees Celsius (chamber beacons)
    #[arg(long, default_value_t = 20.0, allow_negative_numbers = true)]
    pub beer_temperature: f64,

    /// How long the frame stays on air
    #[arg(long, default_value = "500ms", value_parser = parse_duration)]
    pub duration: Duration,
}

impl EmitArgs {
    /// Reading described by the arguments, shaped for the chosen format.
    pub fn reading(&self) -> ReadingData {
        match self.format {
            BeaconFormat::Tilt | BeaconFormat::TiltPro => {
                let temp_f = self.temperature * 9.0 / 5.0 + 32.0;
                ReadingData::Tilt(TiltReading::from_values(
                    self.color,
                    temp_f,
                    self.gravity,
                    self.format == BeaconFormat::TiltPro,
                ))
            }
            BeaconFormat::ChamberBeacon => ReadingData::Chamber(ChamberReading {
                id: self.id.clone(),
                chamber_temp: self.temperature,
                beer_temp: self.beer_temperature,
                rssi: 0,
            }),
            BeaconFormat::PressureBeacon => ReadingData::Pressure(self.pressure_reading()),
            BeaconFormat::Extended if self.pressure != 0.0 || self.pressure1 != 0.0 => {
                ReadingData::Pressure(self.pressure_reading())
            }
            BeaconFormat::GravityBeacon | BeaconFormat::Eddystone | BeaconFormat::Extended => {
                ReadingData::Gravity(GravityReading {
                    id: self.id.clone(),
                    temperature: self.temperature,
                    gravity: self.gravity,
                    angle: self.angle,
                    battery: self.battery,
                    ..Default::default()
                })
            }
        }
    }

    fn pressure_reading(&self) -> PressureReading {
        PressureReading {
            id: self.id.clone(),
            temperature: self.temperature,
            pressure: self.pressure,
            pressure1: self.pressure1,
            battery: self.battery,
            ..Default::default()
        }
    }
}

/// Errors returned by the runners.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Radio(#[from] RadioError),
    #[error(transparent)]
    Send(#[from] SendError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Reasons a scan pass did not run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PassError {
    #[error("Scan already in progress")]
    Busy,
    #[error("Radio refused to start scanning")]
    Refused,
    #[error(transparent)]
    Radio(#[from] RadioError),
}

/// Counters for one scan pass.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PassSummary {
    pub advertisements: usize,
    pub decoded: usize,
    pub unrecognized: usize,
    pub queued: usize,
    pub sessions_failed: usize,
    pub upserted: usize,
}

/// Scan, classify, connect and aggregate, one pass at a time.
pub struct Gateway {
    radio: Box<dyn Radio>,
    discovery: Discovery,
    store: Store,
    config: GatewayConfig,
}

impl Gateway {
    pub fn new(radio: Box<dyn Radio>, config: GatewayConfig) -> Self {
        let mut store = Store::new(config.max_entries);
        if let Some(path) = &config.data_log {
            info!("Appending readings to {}", path.display());
            store = store.with_sink(Box::new(CsvFile::new(path)));
        }

        Self {
            radio,
            discovery: Discovery::new(
                config.max_pending,
                config.max_sessions,
                config.connect_timeout,
            ),
            store,
            config,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn discovery(&self) -> &Discovery {
        &self.discovery
    }

    /// Run one scan window followed by the pending connect-and-read sessions.
    pub async fn run_pass(&mut self) -> Result<PassSummary, PassError> {
        if self.radio.is_scanning() {
            return Err(PassError::Busy);
        }

        self.discovery.begin_pass();
        let started = self
            .radio
            .start_scan(self.config.scan_window, self.config.active_scan)
            .await?;
        if !started {
            return Err(PassError::Refused);
        }

        while self.radio.is_scanning() {
            tokio::time::sleep(SCAN_POLL).await;
        }

        let mut summary = PassSummary::default();
        let mut readings = Vec::new();

        for adv in self.radio.take_results() {
            summary.advertisements += 1;
            match classify(&adv) {
                Classification::Decoded { source, data } => {
                    summary.decoded += 1;
                    readings.push(Reading::new(source, data));
                }
                Classification::ConnectRequired(address) => {
                    self.discovery.enqueue(address);
                }
                Classification::Unrecognized(e) => {
                    summary.unrecognized += 1;
                    debug!("Unrecognized advertisement from {}: {e}", adv.address);
                }
                Classification::Ignored => {}
            }
        }

        summary.queued = self.discovery.pending().len();
        readings.extend(
            self.discovery
                .run_pending_connections(self.radio.as_mut())
                .await,
        );
        summary.sessions_failed = self
            .discovery
            .pending()
            .iter()
            .filter(|d| d.state.is_failure())
            .count();

        for reading in latest_per_sensor(readings) {
            debug!("{} reading from {} ({})", reading.kind(), reading.id(), reading.source);
            self.store.upsert(reading);
            summary.upserted += 1;
        }

        info!(
            "Scan pass done: {} advertisements, {} decoded, {} sessions ({} failed), {} sensors tracked",
            summary.advertisements,
            summary.decoded,
            summary.queued,
            summary.sessions_failed,
            self.store.len()
        );
        Ok(summary)
    }

    /// Write every updated entry whose push age has reached the push interval,
    /// then mark it pushed. Returns the number of lines written.
    pub fn report(
        &mut self,
        formatter: &dyn OutputFormatter,
        aliases: &AliasMap,
        out: &mut dyn Write,
    ) -> io::Result<usize> {
        let push_interval = self.config.push_interval.as_secs();
        let due: Vec<String> = self
            .store
            .iter()
            .filter(|e| e.is_updated() && e.push_age() >= push_interval)
            .map(|e| e.id().to_string())
            .collect();

        for id in &due {
            if let Some(entry) = self.store.get(id) {
                let reading = entry.reading();
                let name = crate::alias::resolve_name(id, reading.data.display_name(), aliases);
                writeln!(out, "{}", formatter.format(reading, name))?;
            }
            self.store.mark_pushed(id);
        }

        Ok(due.len())
    }
}

/// Keep the last reading of each sensor, in order of first sighting.
fn latest_per_sensor(readings: Vec<Reading>) -> Vec<Reading> {
    let mut latest: Vec<Reading> = Vec::with_capacity(readings.len());
    for reading in readings {
        match latest.iter_mut().find(|r| r.id() == reading.id()) {
            Some(slot) => *slot = reading,
            None => latest.push(reading),
        }
    }
    latest
}

/// Run the gateway loop, writing reported entries to `out`.
///
/// A busy or refusing radio skips the pass; radio errors end the run.
pub async fn run_with_io(
    args: GatewayArgs,
    radio: Box<dyn Radio>,
    out: &mut dyn Write,
) -> Result<(), RunError> {
    let aliases: AliasMap = crate::alias::to_map(&args.aliases);
    let formatter = args.formatter();
    let mut gateway = Gateway::new(radio, args.config());

    let mut pass: u64 = 0;
    while args.passes.is_none_or(|limit| pass < limit) {
        pass += 1;
        match gateway.run_pass().await {
            Ok(summary) => debug!("Pass {pass}: {summary:?}"),
            Err(PassError::Radio(e)) => return Err(e.into()),
            Err(e) => {
                warn!("Pass {pass} skipped: {e}");
                tokio::time::sleep(SCAN_POLL).await;
                continue;
            }
        }

        gateway.report(formatter.as_ref(), &aliases, out)?;
        out.flush()?;
    }

    Ok(())
}

/// Broadcast the reading described by `args` once.
pub async fn run_emit<A: Advertiser>(args: EmitArgs, advertiser: A) -> Result<BroadcastFrame, RunError> {
    let data = args.reading();
    let mut sender = BeaconSender::new(advertiser).with_send_time(args.duration);
    Ok(sender.send(args.format, &data).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{Advertisement, GRAVITYMON_NAME};
    use crate::codec::{extended, ibeacon};
    use crate::discovery::PAYLOAD_SERVICE;
    use crate::mac_address::MacAddress;
    use crate::reading::ReadingSource;
    use crate::test_utils::{FakeAdvertiser, FakeRadio, LinkScript, TEST_MAC, sample_gravity};

    const GRAVITYMON_MAC: MacAddress = MacAddress([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);

    fn tilt_adv(color: TiltColor, temp_f: f64) -> Advertisement {
        let tilt = TiltReading::from_values(color, temp_f, 1.050, false);
        Advertisement {
            address: TEST_MAC,
            manufacturer_data: ibeacon::encode_tilt(&tilt).to_vec(),
            rssi: -67,
            ..Default::default()
        }
    }

    fn gravitymon_adv() -> Advertisement {
        Advertisement {
            name: Some(GRAVITYMON_NAME.into()),
            address: GRAVITYMON_MAC,
            service_data: vec![(PAYLOAD_SERVICE, b"Scan me!".to_vec())],
            rssi: -80,
            ..Default::default()
        }
    }

    fn gateway(radio: FakeRadio, config: GatewayConfig) -> Gateway {
        Gateway::new(Box::new(radio), config)
    }

    fn args(passes: u64) -> GatewayArgs {
        let passes = passes.to_string();
        let Command::Gateway(args) = Options::parse_from([
            "brewbeacon",
            "gateway",
            "--scan-window",
            "1s",
            "--passes",
            passes.as_str(),
            "--alias",
            "Purple=Stout",
        ])
        .command
        else {
            panic!("expected gateway command");
        };
        args
    }

    #[test]
    fn test_gateway_rejects_empty_store() {
        let result = Options::try_parse_from(["brewbeacon", "gateway", "--max-entries", "0"]);
        assert!(result.is_err());

        let options = Options::parse_from(["brewbeacon", "gateway", "--max-entries", "1"]);
        let Command::Gateway(args) = options.command else {
            panic!("expected gateway command");
        };
        assert_eq!(args.max_entries, 1);
    }

    #[test]
    fn test_gateway_options_defaults() {
        let options = Options::parse_from(["brewbeacon", "gateway"]);
        let Command::Gateway(args) = options.command else {
            panic!("expected gateway command");
        };
        assert_eq!(args.config(), GatewayConfig::default());
        assert_eq!(args.influxdb_measurement, "fermentation");
        assert_eq!(args.output, OutputFormat::Influxdb);
        assert_eq!(args.passes, None);
        assert!(!options.verbose);
    }

    #[test]
    fn test_gateway_options_parse() {
        let options = Options::parse_from([
            "brewbeacon",
            "gateway",
            "--scan-window",
            "10s",
            "--active",
            "--max-entries",
            "5",
            "--push-interval",
            "1m",
            "--data-log",
            "/tmp/data.csv",
            "--alias",
            "112233=Stout",
            "-v",
        ]);
        assert!(options.verbose);
        let Command::Gateway(args) = options.command else {
            panic!("expected gateway command");
        };
        let config = args.config();
        assert_eq!(config.scan_window, Duration::from_secs(10));
        assert!(config.active_scan);
        assert_eq!(config.max_entries, 5);
        assert_eq!(config.push_interval, Duration::from_secs(60));
        assert_eq!(config.data_log, Some(PathBuf::from("/tmp/data.csv")));
        assert_eq!(args.aliases[0].id, "112233");
    }

    #[test]
    fn test_emit_options_build_readings() {
        let options = Options::parse_from([
            "brewbeacon",
            "emit",
            "tilt-pro",
            "--color",
            "red",
            "--temperature",
            "20",
            "--gravity",
            "1.05",
        ]);
        let Command::Emit(args) = options.command else {
            panic!("expected emit command");
        };
        let ReadingData::Tilt(tilt) = args.reading() else {
            panic!("expected tilt reading");
        };
        assert_eq!(tilt.color, TiltColor::Red);
        assert!(tilt.pro);
        assert_eq!(tilt.temp_raw, 680);
        assert_eq!(tilt.gravity_raw, 10500);

        let options = Options::parse_from([
            "brewbeacon",
            "emit",
            "chamber-beacon",
            "--temperature",
            "-1.5",
            "--beer-temperature",
            "18.5",
        ]);
        let Command::Emit(args) = options.command else {
            panic!("expected emit command");
        };
        let ReadingData::Chamber(chamber) = args.reading() else {
            panic!("expected chamber reading");
        };
        assert_eq!(chamber.chamber_temp, -1.5);
        assert_eq!(chamber.beer_temp, 18.5);
    }

    #[test]
    fn test_extended_emit_with_pressure_is_a_pressure_reading() {
        let options = Options::parse_from(["brewbeacon", "emit", "extended", "--pressure", "2.5"]);
        let Command::Emit(args) = options.command else {
            panic!("expected emit command");
        };
        assert!(matches!(args.reading(), ReadingData::Pressure(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pass_decodes_beacons_into_store() {
        let mut radio = FakeRadio::new();
        radio.push_batch(vec![
            tilt_adv(TiltColor::Purple, 68.0),
            Advertisement::default(),
        ]);
        let mut gateway = gateway(radio, GatewayConfig::default());

        let summary = gateway.run_pass().await.unwrap();
        assert_eq!(summary.advertisements, 2);
        assert_eq!(summary.decoded, 1);
        assert_eq!(summary.upserted, 1);

        let entry = gateway.store().get("Purple").unwrap();
        assert!(entry.is_updated());
        assert_eq!(entry.reading().source, ReadingSource::BleBeacon);
        let ReadingData::Tilt(tilt) = &entry.reading().data else {
            panic!("expected tilt reading");
        };
        assert_eq!(tilt.temp_raw, 68);
        assert_eq!(tilt.gravity_raw, 1050);
        assert_eq!(tilt.rssi, -67);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pass_keeps_last_sighting_per_sensor() {
        let dir = std::env::temp_dir().join(format!("brewbeacon-pass-{}", std::process::id()));
        let log = dir.join("data.csv");
        let _ = std::fs::remove_file(&log);

        let mut radio = FakeRadio::new();
        radio.push_batch(vec![
            tilt_adv(TiltColor::Purple, 68.0),
            tilt_adv(TiltColor::Red, 60.0),
            tilt_adv(TiltColor::Purple, 69.0),
            tilt_adv(TiltColor::Purple, 70.0),
        ]);
        let config = GatewayConfig {
            data_log: Some(log.clone()),
            ..Default::default()
        };
        let mut gateway = gateway(radio, config);

        let summary = gateway.run_pass().await.unwrap();
        assert_eq!(summary.decoded, 4);
        assert_eq!(summary.upserted, 2);

        let ids: Vec<&str> = gateway.store().iter().map(|e| e.id()).collect();
        assert_eq!(ids, ["Purple", "Red"]);
        let ReadingData::Tilt(tilt) = &gateway.store().get("Purple").unwrap().reading().data
        else {
            panic!("expected tilt reading");
        };
        assert_eq!(tilt.temp_raw, 70);

        let rows = std::fs::read_to_string(&log).unwrap();
        assert_eq!(rows.lines().count(), 2);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pass_connects_to_named_sensors() {
        let mut radio = FakeRadio::new();
        let payload =
            extended::encode_characteristic(&ReadingData::Gravity(sample_gravity())).unwrap();
        radio.script(GRAVITYMON_MAC, LinkScript::Payload(payload));
        radio.push_batch(vec![gravitymon_adv(), gravitymon_adv()]);
        let mut gateway = gateway(radio, GatewayConfig::default());

        let summary = gateway.run_pass().await.unwrap();
        assert_eq!(summary.queued, 1);
        assert_eq!(summary.sessions_failed, 0);

        let entry = gateway.store().get("112233").unwrap();
        assert_eq!(entry.reading().source, ReadingSource::BleConnect);
        assert_eq!(entry.reading().data, ReadingData::Gravity(sample_gravity()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_session_does_not_update_store() {
        let mut radio = FakeRadio::new();
        radio.script(GRAVITYMON_MAC, LinkScript::NoService);
        radio.push_batch(vec![gravitymon_adv(), tilt_adv(TiltColor::Blue, 60.0)]);
        let mut gateway = gateway(radio, GatewayConfig::default());

        let summary = gateway.run_pass().await.unwrap();
        assert_eq!(summary.sessions_failed, 1);
        assert_eq!(gateway.store().len(), 1);
        assert!(gateway.store().get("Blue").is_some());
        assert!(
            gateway
                .discovery()
                .pending()
                .get(GRAVITYMON_MAC)
                .unwrap()
                .state
                .is_failure()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_pass_counts_unrecognized_frames() {
        let mut radio = FakeRadio::new();
        let mut adv = tilt_adv(TiltColor::Purple, 68.0);
        adv.manufacturer_data[19] = 0x00;
        radio.push_batch(vec![adv]);
        let mut gateway = gateway(radio, GatewayConfig::default());

        let summary = gateway.run_pass().await.unwrap();
        assert_eq!(summary.unrecognized, 1);
        assert!(gateway.store().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pass_refused_while_scanning() {
        let mut radio = FakeRadio::new();
        radio.hold_scan(Duration::from_secs(5));
        let mut gateway = gateway(radio, GatewayConfig::default());
        assert_eq!(gateway.run_pass().await, Err(PassError::Busy));

        let mut radio = FakeRadio::new();
        radio.refuse_scan = true;
        let mut gateway = Gateway::new(Box::new(radio), GatewayConfig::default());
        assert_eq!(gateway.run_pass().await, Err(PassError::Refused));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pass_waits_for_scan_window() {
        let mut radio = FakeRadio::new();
        radio.push_batch(vec![tilt_adv(TiltColor::Purple, 68.0)]);
        let config = GatewayConfig {
            scan_window: Duration::from_secs(5),
            ..Default::default()
        };
        let mut gateway = gateway(radio, config);

        let start = tokio::time::Instant::now();
        gateway.run_pass().await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_marks_entries_pushed() {
        let mut radio = FakeRadio::new();
        radio.push_batch(vec![tilt_adv(TiltColor::Purple, 68.0)]);
        let mut gateway = gateway(radio, GatewayConfig::default());
        gateway.run_pass().await.unwrap();

        let formatter = InfluxDbFormatter::new("fermentation".into());
        let aliases = crate::alias::to_map(&[crate::alias::parse_alias("Purple=Stout").unwrap()]);
        let mut out = Vec::new();

        assert_eq!(gateway.report(&formatter, &aliases, &mut out).unwrap(), 1);
        let output = String::from_utf8(out).unwrap();
        assert!(output.starts_with("fermentation,id=Purple,name=Stout,"));
        assert!(output.ends_with('\n'));
        assert!(!gateway.store().get("Purple").unwrap().is_updated());

        // Nothing changed since the last push
        let mut out = Vec::new();
        assert_eq!(gateway.report(&formatter, &aliases, &mut out).unwrap(), 0);
        assert!(out.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_respects_push_interval() {
        let mut radio = FakeRadio::new();
        radio.push_batch(vec![tilt_adv(TiltColor::Purple, 68.0)]);
        radio.push_batch(vec![tilt_adv(TiltColor::Purple, 69.0)]);
        radio.push_batch(vec![tilt_adv(TiltColor::Purple, 70.0)]);
        let config = GatewayConfig {
            scan_window: Duration::from_secs(1),
            push_interval: Duration::from_secs(60),
            ..Default::default()
        };
        let mut gateway = gateway(radio, config);
        let formatter = InfluxDbFormatter::new("fermentation".into());
        let aliases = AliasMap::new();

        // Push age counts from gateway start, so the first report waits too
        gateway.run_pass().await.unwrap();
        assert_eq!(gateway.report(&formatter, &aliases, &mut io::sink()).unwrap(), 0);

        tokio::time::advance(Duration::from_secs(60)).await;
        gateway.run_pass().await.unwrap();
        assert_eq!(gateway.report(&formatter, &aliases, &mut io::sink()).unwrap(), 1);

        gateway.run_pass().await.unwrap();
        assert_eq!(gateway.report(&formatter, &aliases, &mut io::sink()).unwrap(), 0);
        assert!(gateway.store().get("Purple").unwrap().is_updated());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_with_io_prints_each_pass() {
        let mut radio = FakeRadio::new();
        radio.push_batch(vec![tilt_adv(TiltColor::Purple, 68.0)]);
        radio.push_batch(vec![]);
        radio.push_batch(vec![tilt_adv(TiltColor::Purple, 70.0)]);

        let mut out = Vec::new();
        run_with_io(args(3), Box::new(radio), &mut out).await.unwrap();

        let output = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|l| l.contains("name=Stout")));
        assert!(lines[0].contains("temperature_f=68"));
        assert!(lines[1].contains("temperature_f=70"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_with_io_csv_output() {
        let mut radio = FakeRadio::new();
        radio.push_batch(vec![tilt_adv(TiltColor::Purple, 68.0)]);

        let mut args = args(1);
        args.output = OutputFormat::Csv;
        let mut out = Vec::new();
        run_with_io(args, Box::new(radio), &mut out).await.unwrap();

        let output = String::from_utf8(out).unwrap();
        let row = output.trim_end();
        assert!(row.starts_with("1,Tilt,BLE Beacon,"));
        assert!(row.ends_with(",Purple,Purple,20.00,1.0500,-59,-67,,,,"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_with_io_skips_refused_passes() {
        let mut radio = FakeRadio::new();
        radio.refuse_scan = true;
        let mut out = Vec::new();
        run_with_io(args(2), Box::new(radio), &mut out).await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_emit_broadcasts_frame() {
        let advertiser = FakeAdvertiser::default();
        let emitted = advertiser.emitted.clone();
        let Command::Emit(args) =
            Options::parse_from(["brewbeacon", "emit", "eddystone", "--duration", "2s"]).command
        else {
            panic!("expected emit command");
        };

        let frame = run_emit(args, advertiser).await.unwrap();
        assert_eq!(frame.local_name.as_deref(), Some(GRAVITYMON_NAME));
        assert_eq!(emitted.lock().unwrap()[0].1, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_run_emit_rejects_bad_id() {
        let Command::Emit(args) =
            Options::parse_from(["brewbeacon", "emit", "gravity-beacon", "--id", "not-hex"]).command
        else {
            panic!("expected emit command");
        };
        let result = run_emit(args, FakeAdvertiser::default()).await;
        assert!(matches!(result, Err(RunError::Send(SendError::Encode(_)))));
    }
}
