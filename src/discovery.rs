//! Connect-and-read sessions for sensors whose payload does not fit a beacon.
//!
//! During a scan pass the classifier reports devices that need a connection.
//! They are queued in a bounded [`PendingList`] and, after the scan window has
//! closed, visited one at a time: acquire a link from the [`SessionPool`],
//! connect with a timeout, read the payload characteristic, disconnect.
//!
//! ```text
//! Discovered -> Connecting -> Connected -> Reading -> Disconnected(Success)
//!                   \______________\___________\----> Disconnected(Failure)
//! ```
//!
//! A failing device is logged and skipped; it never aborts the other sessions.

use crate::codec::{DecodeError, extended};
use crate::mac_address::MacAddress;
use crate::reading::{Reading, ReadingSource};
use crate::scanner::{Link, Radio, RadioError};
use log::{debug, info, warn};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Service exposing the sensor payload (Device Information).
pub const PAYLOAD_SERVICE: u16 = 0x180A;
/// Characteristic holding the JSON payload.
pub const PAYLOAD_CHARACTERISTIC: u16 = 0x2900;

/// Error type for a single discovery session.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    /// Every pooled link is busy and the pool is full
    #[error("Max sessions reached ({0}), no more connections available")]
    MaxSessions(usize),
    #[error(transparent)]
    Radio(#[from] RadioError),
    /// Characteristic was read but did not decode
    #[error("Payload error: {0}")]
    Payload(#[from] DecodeError),
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    Success,
    Failure(SessionError),
}

/// Lifecycle of one pending device within a pass.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Discovered,
    Connecting,
    Connected,
    Reading,
    Disconnected(SessionOutcome),
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Disconnected(_))
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            SessionState::Disconnected(SessionOutcome::Failure(_))
        )
    }
}

/// A device discovered during the current pass that needs a connection.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingDevice {
    pub address: MacAddress,
    pub state: SessionState,
    /// Cleared when the session reaches a terminal state
    pub needs_data: bool,
    /// Raw characteristic value, when the read succeeded
    pub payload: Option<Vec<u8>>,
}

/// Bounded list of devices waiting for a connect-and-read session.
#[derive(Debug)]
pub struct PendingList {
    devices: Vec<PendingDevice>,
    capacity: usize,
}

impl PendingList {
    pub fn new(capacity: usize) -> Self {
        Self {
            devices: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Queue `address` for a session.
    ///
    /// Returns `true` when the device is queued (or already was), `false` when
    /// the list is full.
    pub fn enqueue(&mut self, address: MacAddress) -> bool {
        if self.devices.iter().any(|d| d.address == address) {
            return true;
        }
        if self.devices.len() >= self.capacity {
            warn!("Pending list full ({}), not queueing {address}", self.capacity);
            return false;
        }
        debug!("Queued {address} for connect-and-read");
        self.devices.push(PendingDevice {
            address,
            state: SessionState::Discovered,
            needs_data: true,
            payload: None,
        });
        true
    }

    pub fn clear(&mut self) {
        self.devices.clear();
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingDevice> {
        self.devices.iter()
    }

    pub fn get(&self, address: MacAddress) -> Option<&PendingDevice> {
        self.devices.iter().find(|d| d.address == address)
    }
}

struct PooledLink {
    link: Box<dyn Link>,
    last_used: u64,
}

/// Bounded pool of reusable radio links.
///
/// Acquire prefers, in order: the link last used for the same peer, the least
/// recently used disconnected link, a newly created link while below the
/// bound. Otherwise it fails with [`SessionError::MaxSessions`].
pub struct SessionPool {
    links: Vec<PooledLink>,
    max_sessions: usize,
    uses: u64,
}

impl SessionPool {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            links: Vec::new(),
            max_sessions,
            uses: 0,
        }
    }

    /// Acquire a link for `address`, returning its slot in the pool.
    pub fn acquire(
        &mut self,
        radio: &mut dyn Radio,
        address: MacAddress,
    ) -> Result<usize, SessionError> {
        let same_peer = self
            .links
            .iter()
            .position(|l| l.link.peer() == Some(address));

        let idle = || {
            self.links
                .iter()
                .enumerate()
                .filter(|(_, l)| !l.link.is_connected())
                .min_by_key(|(_, l)| l.last_used)
                .map(|(i, _)| i)
        };

        let slot = match same_peer.or_else(idle) {
            Some(slot) => {
                debug!("Reusing link #{slot} for {address}");
                slot
            }
            None if self.links.len() < self.max_sessions => {
                let link = radio.create_link()?;
                self.links.push(PooledLink { link, last_used: 0 });
                debug!("Created link #{} for {address}", self.links.len() - 1);
                self.links.len() - 1
            }
            None => return Err(SessionError::MaxSessions(self.max_sessions)),
        };

        self.uses += 1;
        self.links[slot].last_used = self.uses;
        Ok(slot)
    }

    pub fn link_mut(&mut self, slot: usize) -> &mut Box<dyn Link> {
        &mut self.links[slot].link
    }

    /// Disconnect the link in `slot`; it stays pooled for reuse.
    pub async fn release(&mut self, slot: usize) {
        self.links[slot].link.disconnect().await;
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

/// Pending list plus link pool, driven once per scan pass.
pub struct Discovery {
    pending: PendingList,
    pool: SessionPool,
    connect_timeout: Duration,
}

impl Discovery {
    pub fn new(max_pending: usize, max_sessions: usize, connect_timeout: Duration) -> Self {
        Self {
            pending: PendingList::new(max_pending),
            pool: SessionPool::new(max_sessions),
            connect_timeout,
        }
    }

    /// Forget the devices queued by the previous pass.
    pub fn begin_pass(&mut self) {
        self.pending.clear();
    }

    pub fn enqueue(&mut self, address: MacAddress) -> bool {
        self.pending.enqueue(address)
    }

    pub fn pending(&self) -> &PendingList {
        &self.pending
    }

    pub fn pool(&self) -> &SessionPool {
        &self.pool
    }

    /// Visit every pending device that still needs data, sequentially.
    ///
    /// Returns the readings decoded from successful sessions.
    pub async fn run_pending_connections(&mut self, radio: &mut dyn Radio) -> Vec<Reading> {
        let Self {
            pending,
            pool,
            connect_timeout,
        } = self;
        let mut readings = Vec::new();

        for device in pending.devices.iter_mut().filter(|d| d.needs_data) {
            let start = Instant::now();
            let result =
                run_session(pool, radio, device.address, *connect_timeout, &mut device.state).await;

            let outcome = match result.and_then(|payload| {
                let data = extended::decode_characteristic(&payload);
                device.payload = Some(payload);
                Ok(data?)
            }) {
                Ok(data) => {
                    readings.push(Reading::new(ReadingSource::BleConnect, data));
                    SessionOutcome::Success
                }
                Err(e) => {
                    warn!("Session with {} failed: {e}", device.address);
                    SessionOutcome::Failure(e)
                }
            };

            info!(
                "Session with {} finished, took {} ms",
                device.address,
                start.elapsed().as_millis()
            );
            device.state = SessionState::Disconnected(outcome);
            device.needs_data = false;
        }

        readings
    }
}

/// Connect, read the payload characteristic and always disconnect.
async fn run_session(
    pool: &mut SessionPool,
    radio: &mut dyn Radio,
    address: MacAddress,
    connect_timeout: Duration,
    state: &mut SessionState,
) -> Result<Vec<u8>, SessionError> {
    *state = SessionState::Connecting;
    let slot = pool.acquire(radio, address)?;

    let result = read_payload(pool.link_mut(slot), address, connect_timeout, state).await;
    pool.release(slot).await;
    result
}

async fn read_payload(
    link: &mut Box<dyn Link>,
    address: MacAddress,
    connect_timeout: Duration,
    state: &mut SessionState,
) -> Result<Vec<u8>, SessionError> {
    if !(link.is_connected() && link.peer() == Some(address)) {
        // The radio is given the timeout too, but a stuck backend must not hang the pass.
        match tokio::time::timeout(connect_timeout, link.connect(address, connect_timeout)).await {
            Ok(result) => result?,
            Err(_) => return Err(RadioError::ConnectTimeout(address).into()),
        }
    }
    *state = SessionState::Connected;
    debug!("Connected to {address}");

    *state = SessionState::Reading;
    let payload = link
        .read_characteristic(PAYLOAD_SERVICE, PAYLOAD_CHARACTERISTIC)
        .await?;
    debug!(
        "Read {} bytes from {address}: {}",
        payload.len(),
        String::from_utf8_lossy(&payload)
    );
    Ok(payload)
}
