//! Bluetooth Module
//!
//! Keeps the gateway attached to its peripheral.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                 ConnectionManager                     │
//! │  (discovery, reconnects, frame delivery to the sink)  │
//! └──────────────────────┬───────────────────────────────┘
//!                        │ PeripheralLink
//!          ┌─────────────┴─────────────┐
//!          ▼                           ▼
//!   ┌─────────────┐            ┌──────────────┐
//!   │  WinRtLink  │            │   Scanner    │
//!   │ - GATT      │───────────►│ - advertise  │
//!   │ - notify    │            │   watcher    │
//!   └─────────────┘            └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`link`] - Transport trait and its error type
//! - [`connection`] - Connection lifecycle state machine
//! - [`protocol`] - Address and UUID parsing
//! - `scanner`, `winrt` - Windows backend

pub mod connection;
pub mod link;
pub mod protocol;
#[cfg(windows)]
pub mod scanner;
#[cfg(windows)]
pub mod winrt;

#[cfg(test)]
pub(crate) mod testing;

pub use connection::{ConnectionConfig, ConnectionManager};
pub use link::{LinkError, PeripheralLink};
#[cfg(windows)]
pub use winrt::WinRtLink;
