//! Peripheral Link
//!
//! Transport boundary between the connection manager and a BLE stack.
//! Callbacks are not closures: the link pushes [`LinkEvent`]s into the
//! sender it is handed, and the manager drains them on its own task.

use crate::domain::models::LinkEvent;
use thiserror::Error;
use tokio::sync::mpsc;

pub type LinkEventSender = mpsc::UnboundedSender<LinkEvent>;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Invalid peripheral address: {0}")]
    InvalidAddress(String),

    #[error("Invalid UUID: {0}")]
    InvalidUuid(String),

    #[error("Peripheral {0} not found")]
    NotFound(String),

    #[error("Link reports not connected")]
    NotConnected,

    #[error("Service {0} not found")]
    ServiceNotFound(String),

    #[error("Characteristic {0} not found")]
    CharacteristicNotFound(String),

    #[error("GATT operation failed: {0}")]
    Gatt(String),

    #[cfg(windows)]
    #[error("WinRT error: {0}")]
    WinRt(#[from] windows::core::Error),
}

/// Operations the gateway needs from a BLE central.
///
/// A `Handle` identifies one discovered peripheral; it stays valid across
/// connection attempts until the manager releases it.
#[allow(async_fn_in_trait)]
pub trait PeripheralLink {
    type Handle: Clone;

    /// Locate the peripheral with the given address
    async fn scan(&self, address: &str) -> Result<Self::Handle, LinkError>;

    async fn connect(&self, handle: &Self::Handle) -> Result<(), LinkError>;

    async fn is_connected(&self, handle: &Self::Handle) -> bool;

    /// Start notifications on `characteristic`; payloads arrive as `LinkEvent::Notification`
    async fn subscribe(
        &self,
        handle: &Self::Handle,
        characteristic: &str,
        events: LinkEventSender,
    ) -> Result<(), LinkError>;

    /// Report a dropped connection as `LinkEvent::Disconnected`
    fn on_disconnect(&self, handle: &Self::Handle, events: LinkEventSender)
        -> Result<(), LinkError>;

    async fn write(
        &self,
        handle: &Self::Handle,
        characteristic: &str,
        payload: &[u8],
    ) -> Result<(), LinkError>;

    /// Tear the connection down and release transport resources. Safe to repeat.
    async fn disconnect(&self, handle: &Self::Handle) -> Result<(), LinkError>;
}
