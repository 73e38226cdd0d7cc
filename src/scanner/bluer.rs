//! BlueZ D-Bus backend.
//!
//! This backend uses the `bluer` crate to communicate with the BlueZ daemon
//! via D-Bus. It requires the `bluetoothd` daemon to be running; passive scans
//! additionally need the advertisement monitor API (`bluetoothd --experimental`).

use super::{Advertiser, BoxFuture, Link, Radio, RadioError, expand_uuid16, shorten_uuid};
use crate::classifier::{Advertisement, GRAVITYMON_NAME, PRESSUREMON_NAME};
use crate::codec::{eddystone, extended, ibeacon};
use crate::mac_address::MacAddress;
use crate::sender::BroadcastFrame;
use bluer::adv::Type as AdvertisementType;
use bluer::monitor::{Monitor, MonitorEvent, Pattern};
use bluer::{Adapter, AdapterEvent, Address, Device, DiscoveryFilter, DiscoveryTransport, Session, Uuid};
use futures::{Stream, StreamExt};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// AD type of manufacturer specific data
const MANUFACTURER_DATA_TYPE: u8 = 0xFF;
/// AD type of 16-bit service data
const SERVICE_DATA_TYPE: u8 = 0x16;
/// AD type of the complete local name
const COMPLETE_NAME_TYPE: u8 = 0x09;

/// How often to check whether BlueZ has resolved the services of a new connection.
const SERVICES_POLL: Duration = Duration::from_millis(100);
const SERVICES_POLL_ATTEMPTS: u32 = 30;

impl From<bluer::Error> for RadioError {
    fn from(err: bluer::Error) -> Self {
        RadioError::Bluetooth(err.to_string())
    }
}

async fn powered_adapter() -> Result<(Session, Adapter), RadioError> {
    let session = Session::new().await?;
    let adapter = session.default_adapter().await?;
    adapter.set_powered(true).await?;
    info!("Using Bluetooth adapter {}", adapter.name());
    Ok((session, adapter))
}

/// Advertisement monitor patterns for every frame the classifier understands.
fn monitor_patterns() -> Vec<Pattern> {
    let service = |id: u16| Pattern {
        data_type: SERVICE_DATA_TYPE,
        start_position: 0,
        content: id.to_le_bytes().to_vec(),
    };
    let name = |name: &str| Pattern {
        data_type: COMPLETE_NAME_TYPE,
        start_position: 0,
        content: name.as_bytes().to_vec(),
    };

    vec![
        Pattern {
            data_type: MANUFACTURER_DATA_TYPE,
            start_position: 0,
            content: ibeacon::COMPANY_ID_BYTES.to_vec(),
        },
        service(eddystone::SERVICE_ID),
        service(extended::SERVICE_ID),
        name(GRAVITYMON_NAME),
        name(PRESSUREMON_NAME),
    ]
}

/// Scanning and connecting through BlueZ.
pub struct BluerRadio {
    _session: Session,
    adapter: Adapter,
    scanning: Arc<AtomicBool>,
    tx: mpsc::UnboundedSender<Advertisement>,
    rx: mpsc::UnboundedReceiver<Advertisement>,
}

impl BluerRadio {
    pub async fn new() -> Result<Self, RadioError> {
        let (session, adapter) = powered_adapter().await?;
        let (tx, rx) = mpsc::unbounded_channel();
        Ok(Self {
            _session: session,
            adapter,
            scanning: Arc::new(AtomicBool::new(false)),
            tx,
            rx,
        })
    }

    async fn open_window(&self, window: Duration, active: bool) -> Result<(), RadioError> {
        let adapter = self.adapter.clone();
        let tx = self.tx.clone();
        let scanning = Arc::clone(&self.scanning);
        let deadline = Instant::now() + window;

        if active {
            let filter = DiscoveryFilter {
                transport: DiscoveryTransport::Le,
                duplicate_data: true,
                ..Default::default()
            };
            adapter.set_discovery_filter(filter).await?;
            let events = adapter.discover_devices_with_changes().await?;

            scanning.store(true, Ordering::SeqCst);
            tokio::spawn(async move {
                let addresses = events.filter_map(|event| async move {
                    match event {
                        AdapterEvent::DeviceAdded(address) => Some(address),
                        _ => None,
                    }
                });
                collect(&adapter, Box::pin(addresses), deadline, &tx).await;
                scanning.store(false, Ordering::SeqCst);
            });
        } else {
            let monitor_manager = adapter.monitor().await?;
            let monitor_handle = monitor_manager
                .register(Monitor {
                    patterns: Some(monitor_patterns()),
                    ..Default::default()
                })
                .await?;

            scanning.store(true, Ordering::SeqCst);
            tokio::spawn(async move {
                // Unregisters the monitor when dropped at the end of the window
                let _monitor_manager = monitor_manager;
                let addresses = monitor_handle.filter_map(|event| async move {
                    match event {
                        MonitorEvent::DeviceFound(id) => Some(id.device),
                        _ => None,
                    }
                });
                collect(&adapter, Box::pin(addresses), deadline, &tx).await;
                scanning.store(false, Ordering::SeqCst);
            });
        }

        Ok(())
    }
}

/// Snapshot every reported device into `tx` until `deadline`.
async fn collect<S>(
    adapter: &Adapter,
    mut addresses: S,
    deadline: Instant,
    tx: &mpsc::UnboundedSender<Advertisement>,
) where
    S: Stream<Item = Address> + Unpin,
{
    while let Ok(Some(address)) = tokio::time::timeout_at(deadline, addresses.next()).await {
        match snapshot(adapter, address).await {
            Ok(adv) => {
                let _ = tx.send(adv);
            }
            Err(e) => debug!("Skipping {address}: {e}"),
        }
    }
}

/// Read the advertisement properties BlueZ cached for `address`.
async fn snapshot(adapter: &Adapter, address: Address) -> Result<Advertisement, RadioError> {
    let device = adapter.device(address)?;

    let manufacturer_data = device
        .manufacturer_data()
        .await?
        .and_then(|data| {
            data.get_key_value(&ibeacon::COMPANY_ID)
                .or_else(|| data.iter().next())
                .map(|(company, payload)| {
                    let mut bytes = company.to_le_bytes().to_vec();
                    bytes.extend_from_slice(payload);
                    bytes
                })
        })
        .unwrap_or_default();

    let service_data = device
        .service_data()
        .await?
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(uuid, data)| shorten_uuid(uuid.as_u128()).map(|id| (id, data)))
        .collect();

    Ok(Advertisement {
        name: device.name().await?,
        address: address.into(),
        manufacturer_data,
        service_data,
        rssi: device.rssi().await?.unwrap_or_default(),
    })
}

impl Radio for BluerRadio {
    fn start_scan(
        &mut self,
        window: Duration,
        active: bool,
    ) -> BoxFuture<'_, Result<bool, RadioError>> {
        Box::pin(async move {
            if self.is_scanning() {
                warn!("Scan already running");
                return Ok(false);
            }
            debug!(
                "Starting {} scan for {} ms",
                if active { "active" } else { "passive" },
                window.as_millis()
            );
            self.open_window(window, active).await?;
            Ok(true)
        })
    }

    fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    fn take_results(&mut self) -> Vec<Advertisement> {
        let mut results = Vec::new();
        while let Ok(adv) = self.rx.try_recv() {
            results.push(adv);
        }
        results
    }

    fn create_link(&mut self) -> Result<Box<dyn Link>, RadioError> {
        Ok(Box::new(BluerLink {
            adapter: self.adapter.clone(),
            device: None,
            connected: false,
        }))
    }
}

/// GATT client session on top of a BlueZ device object.
pub struct BluerLink {
    adapter: Adapter,
    device: Option<Device>,
    connected: bool,
}

impl BluerLink {
    fn connected_device(&self) -> Result<&Device, RadioError> {
        self.device
            .as_ref()
            .filter(|_| self.connected)
            .ok_or(RadioError::NotConnected)
    }

    async fn wait_for_services(device: &Device) -> Result<(), RadioError> {
        for _ in 0..SERVICES_POLL_ATTEMPTS {
            if device.is_services_resolved().await? {
                return Ok(());
            }
            tokio::time::sleep(SERVICES_POLL).await;
        }
        debug!("Services of {} not resolved, trying anyway", device.address());
        Ok(())
    }
}

impl Link for BluerLink {
    fn peer(&self) -> Option<MacAddress> {
        self.device.as_ref().map(|d| d.address().into())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn connect(
        &mut self,
        address: MacAddress,
        timeout: Duration,
    ) -> BoxFuture<'_, Result<(), RadioError>> {
        Box::pin(async move {
            let device = self.adapter.device(address.into())?;
            self.device = Some(device.clone());
            self.connected = false;

            match tokio::time::timeout(timeout, device.connect()).await {
                Ok(result) => result?,
                Err(_) => return Err(RadioError::ConnectTimeout(address)),
            }
            self.connected = true;
            Ok(())
        })
    }

    fn read_characteristic(
        &mut self,
        service: u16,
        characteristic: u16,
    ) -> BoxFuture<'_, Result<Vec<u8>, RadioError>> {
        Box::pin(async move {
            let device = self.connected_device()?;
            Self::wait_for_services(device).await?;

            let service_uuid = Uuid::from_u128(expand_uuid16(service));
            let characteristic_uuid = Uuid::from_u128(expand_uuid16(characteristic));

            for remote_service in device.services().await? {
                if remote_service.uuid().await? != service_uuid {
                    continue;
                }
                for remote in remote_service.characteristics().await? {
                    if remote.uuid().await? != characteristic_uuid {
                        continue;
                    }
                    if !remote.flags().await?.read {
                        return Err(RadioError::NotReadable(characteristic));
                    }
                    return Ok(remote.read().await?);
                }
                return Err(RadioError::CharacteristicNotFound(characteristic));
            }

            Err(RadioError::ServiceNotFound(service))
        })
    }

    fn disconnect(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if let Some(device) = &self.device
                && self.connected
                && let Err(e) = device.disconnect().await
            {
                debug!("Disconnect from {} failed: {e}", device.address());
            }
            self.connected = false;
        })
    }
}

/// Broadcasting through the BlueZ LE advertising manager.
pub struct BluerAdvertiser {
    _session: Session,
    adapter: Adapter,
}

impl BluerAdvertiser {
    pub async fn new() -> Result<Self, RadioError> {
        let (session, adapter) = powered_adapter().await?;
        Ok(Self {
            _session: session,
            adapter,
        })
    }
}

fn to_advertisement(frame: &BroadcastFrame) -> bluer::adv::Advertisement {
    let mut manufacturer_data = BTreeMap::new();
    if let Some(data) = &frame.manufacturer_data
        && let [lo, hi, payload @ ..] = data.as_slice()
    {
        manufacturer_data.insert(u16::from_le_bytes([*lo, *hi]), payload.to_vec());
    }

    let service_data = frame
        .service_data
        .iter()
        .map(|(id, data)| (Uuid::from_u128(expand_uuid16(*id)), data.clone()))
        .collect();

    bluer::adv::Advertisement {
        advertisement_type: if frame.connectable {
            AdvertisementType::Peripheral
        } else {
            AdvertisementType::Broadcast
        },
        manufacturer_data,
        service_data,
        local_name: frame.local_name.clone(),
        ..Default::default()
    }
}

impl Advertiser for BluerAdvertiser {
    fn emit<'a>(
        &'a mut self,
        frame: &'a BroadcastFrame,
        duration: Duration,
    ) -> BoxFuture<'a, Result<(), RadioError>> {
        Box::pin(async move {
            let handle = self.adapter.advertise(to_advertisement(frame)).await?;
            tokio::time::sleep(duration).await;
            // Advertising stops when the handle is dropped
            drop(handle);
            Ok(())
        })
    }
}
