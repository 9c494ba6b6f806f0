//! Gateway client for a camera peripheral that streams images and
//! inference results over BLE notifications.

pub mod domain;
pub mod infrastructure;
