//! Radio collaborator contracts.
//!
//! The gateway never talks to Bluetooth directly. It drives a [`Radio`] for
//! scan windows and connect-and-read sessions, and sensor nodes drive an
//! [`Advertiser`] to put frames on air. The BlueZ implementation lives in
//! [`bluer`]; tests use in-memory fakes.

#[cfg(feature = "bluer")]
pub mod bluer;

use crate::classifier::Advertisement;
use crate::mac_address::MacAddress;
use crate::sender::BroadcastFrame;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Boxed future returned by the radio traits so they stay object safe.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Error type for radio operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RadioError {
    /// Bluetooth/adapter related error
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
    /// Connection attempt did not complete in time
    #[error("Connect to {0} timed out")]
    ConnectTimeout(MacAddress),
    /// Peer does not expose the expected service
    #[error("Service {0:04X} not found")]
    ServiceNotFound(u16),
    /// Service does not expose the expected characteristic
    #[error("Characteristic {0:04X} not found")]
    CharacteristicNotFound(u16),
    /// Characteristic exists but cannot be read
    #[error("Characteristic {0:04X} is not readable")]
    NotReadable(u16),
    /// Operation needs an established connection
    #[error("Not connected")]
    NotConnected,
}

/// Scanning side of the radio.
///
/// Advertisements received while a scan window is open are buffered by the
/// implementation and handed out by [`Radio::take_results`] once the window
/// has closed; no decoding happens in the delivery path.
pub trait Radio: Send {
    /// Open a scan window. Returns `false` when the radio refused to start.
    fn start_scan(&mut self, window: Duration, active: bool)
    -> BoxFuture<'_, Result<bool, RadioError>>;

    fn is_scanning(&self) -> bool;

    /// Drain the advertisements buffered since the last call.
    fn take_results(&mut self) -> Vec<Advertisement>;

    /// Create a new, unconnected session object.
    fn create_link(&mut self) -> Result<Box<dyn Link>, RadioError>;
}

/// One client session object. It may be reconnected to any peer.
pub trait Link: Send {
    /// Address of the last peer this link connected to.
    fn peer(&self) -> Option<MacAddress>;

    fn is_connected(&self) -> bool;

    fn connect(
        &mut self,
        address: MacAddress,
        timeout: Duration,
    ) -> BoxFuture<'_, Result<(), RadioError>>;

    /// Locate `service`/`characteristic` on the connected peer and read it.
    fn read_characteristic(
        &mut self,
        service: u16,
        characteristic: u16,
    ) -> BoxFuture<'_, Result<Vec<u8>, RadioError>>;

    fn disconnect(&mut self) -> BoxFuture<'_, ()>;
}

/// Broadcasting side of the radio, used by sensor nodes.
pub trait Advertiser: Send {
    /// Put `frame` on air for `duration`, then stop.
    fn emit<'a>(
        &'a mut self,
        frame: &'a BroadcastFrame,
        duration: Duration,
    ) -> BoxFuture<'a, Result<(), RadioError>>;
}

/// Bluetooth base UUID (`0000xxxx-0000-1000-8000-00805F9B34FB`) with the short id zeroed.
pub const BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_0080_5F9B_34FB;

/// Expand a 16-bit assigned number to its 128-bit form.
pub fn expand_uuid16(short: u16) -> u128 {
    BASE_UUID | (u128::from(short) << 96)
}

/// Shorten a 128-bit UUID to its 16-bit form when it is based on the Bluetooth base UUID.
pub fn shorten_uuid(uuid: u128) -> Option<u16> {
    let short_mask = 0xFFFF_FFFFu128 << 96;
    if uuid & !short_mask == BASE_UUID && uuid >> 112 == 0 {
        Some((uuid >> 96) as u16)
    } else {
        None
    }
}
