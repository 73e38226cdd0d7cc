use crate::classifier::Advertisement;
use crate::mac_address::MacAddress;
use crate::reading::{ChamberReading, GravityReading, PressureReading};
use crate::scanner::{Advertiser, BoxFuture, Link, Radio, RadioError};
use crate::sender::BroadcastFrame;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// A stable MAC address for unit tests.
pub const TEST_MAC: MacAddress = MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);

/// Gravity reading whose values survive every gravity-capable codec.
pub fn sample_gravity() -> GravityReading {
    GravityReading {
        id: "112233".into(),
        name: "my_device_name".into(),
        token: "my_token".into(),
        temperature: 20.2,
        gravity: 1.05,
        angle: 34.45,
        battery: 3.85,
        tx_power: 0,
        rssi: -76,
        interval: 900,
    }
}

pub fn sample_pressure() -> PressureReading {
    PressureReading {
        id: "445566".into(),
        name: "keg_1".into(),
        token: "my_token".into(),
        temperature: 12.5,
        pressure: 2.5,
        pressure1: 1.25,
        battery: 4.1,
        tx_power: 0,
        rssi: -70,
        interval: 300,
    }
}

pub fn sample_chamber() -> ChamberReading {
    ChamberReading {
        id: "778899".into(),
        chamber_temp: 4.25,
        beer_temp: 18.5,
        rssi: -60,
    }
}

/// What a [`FakeLink`] does when asked to connect to a given peer.
#[derive(Debug, Clone)]
pub enum LinkScript {
    /// Connect succeeds and the payload characteristic holds these bytes
    Payload(Vec<u8>),
    /// Connect succeeds but the payload service is missing
    NoService,
    /// Connect never completes
    Hang,
}

#[derive(Default)]
struct FakeState {
    scripts: HashMap<MacAddress, LinkScript>,
    links_created: usize,
    connects: Vec<MacAddress>,
    disconnects: usize,
}

/// In-memory radio driven by per-address scripts.
///
/// Each scan window hands out the next queued batch of advertisements.
pub struct FakeRadio {
    state: Arc<Mutex<FakeState>>,
    batches: Vec<Vec<Advertisement>>,
    results: Vec<Advertisement>,
    scan_until: Option<Instant>,
    pub refuse_scan: bool,
}

impl FakeRadio {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState::default())),
            batches: Vec::new(),
            results: Vec::new(),
            scan_until: None,
            refuse_scan: false,
        }
    }

    pub fn script(&mut self, address: MacAddress, script: LinkScript) {
        self.state.lock().unwrap().scripts.insert(address, script);
    }

    /// Queue the advertisements seen by the next scan window.
    pub fn push_batch(&mut self, batch: Vec<Advertisement>) {
        self.batches.push(batch);
    }

    /// Pretend a scan window is already open.
    pub fn hold_scan(&mut self, window: Duration) {
        self.scan_until = Some(Instant::now() + window);
    }

    pub fn links_created(&self) -> usize {
        self.state.lock().unwrap().links_created
    }

    pub fn connects(&self) -> Vec<MacAddress> {
        self.state.lock().unwrap().connects.clone()
    }

    pub fn disconnects(&self) -> usize {
        self.state.lock().unwrap().disconnects
    }
}

impl Radio for FakeRadio {
    fn start_scan(
        &mut self,
        window: Duration,
        _active: bool,
    ) -> BoxFuture<'_, Result<bool, RadioError>> {
        Box::pin(async move {
            if self.refuse_scan {
                return Ok(false);
            }
            self.scan_until = Some(Instant::now() + window);
            if !self.batches.is_empty() {
                let batch = self.batches.remove(0);
                self.results.extend(batch);
            }
            Ok(true)
        })
    }

    fn is_scanning(&self) -> bool {
        self.scan_until.is_some_and(|until| Instant::now() < until)
    }

    fn take_results(&mut self) -> Vec<Advertisement> {
        std::mem::take(&mut self.results)
    }

    fn create_link(&mut self) -> Result<Box<dyn Link>, RadioError> {
        self.state.lock().unwrap().links_created += 1;
        Ok(Box::new(FakeLink {
            state: Arc::clone(&self.state),
            peer: None,
            connected: false,
        }))
    }
}

pub struct FakeLink {
    state: Arc<Mutex<FakeState>>,
    peer: Option<MacAddress>,
    connected: bool,
}

impl FakeLink {
    fn script(&self) -> Option<LinkScript> {
        let peer = self.peer?;
        self.state.lock().unwrap().scripts.get(&peer).cloned()
    }
}

impl Link for FakeLink {
    fn peer(&self) -> Option<MacAddress> {
        self.peer
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn connect(
        &mut self,
        address: MacAddress,
        _timeout: Duration,
    ) -> BoxFuture<'_, Result<(), RadioError>> {
        Box::pin(async move {
            self.peer = Some(address);
            self.state.lock().unwrap().connects.push(address);
            match self.script() {
                None => Err(RadioError::Bluetooth(format!("{address} not found"))),
                Some(LinkScript::Hang) => std::future::pending().await,
                Some(_) => {
                    self.connected = true;
                    Ok(())
                }
            }
        })
    }

    fn read_characteristic(
        &mut self,
        service: u16,
        _characteristic: u16,
    ) -> BoxFuture<'_, Result<Vec<u8>, RadioError>> {
        Box::pin(async move {
            if !self.connected {
                return Err(RadioError::NotConnected);
            }
            match self.script() {
                Some(LinkScript::Payload(bytes)) => Ok(bytes),
                _ => Err(RadioError::ServiceNotFound(service)),
            }
        })
    }

    fn disconnect(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.connected = false;
            self.state.lock().unwrap().disconnects += 1;
        })
    }
}

/// Records every frame it is asked to broadcast.
#[derive(Clone, Default)]
pub struct FakeAdvertiser {
    pub emitted: Arc<Mutex<Vec<(BroadcastFrame, Duration)>>>,
    pub fail: bool,
}

impl Advertiser for FakeAdvertiser {
    fn emit<'a>(
        &'a mut self,
        frame: &'a BroadcastFrame,
        duration: Duration,
    ) -> BoxFuture<'a, Result<(), RadioError>> {
        Box::pin(async move {
            if self.fail {
                return Err(RadioError::Bluetooth("advertising not supported".into()));
            }
            self.emitted.lock().unwrap().push((frame.clone(), duration));
            tokio::time::sleep(duration).await;
            Ok(())
        })
    }
}
