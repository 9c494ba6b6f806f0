//! BLE Scanner Module
//!
//! Waits for the configured peripheral to show up in advertisements.

use crate::infrastructure::bluetooth::link::LinkError;
use crate::infrastructure::bluetooth::protocol::format_address;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};
use windows::Devices::Bluetooth::Advertisement::{
    BluetoothLEAdvertisementReceivedEventArgs, BluetoothLEAdvertisementWatcher,
    BluetoothLEScanningMode,
};
use windows::Foundation::TypedEventHandler;

pub struct BleScanner {
    watcher: Option<BluetoothLEAdvertisementWatcher>,
}

impl BleScanner {
    pub fn new() -> Self {
        Self { watcher: None }
    }

    /// Scan until `address` advertises or `timeout` elapses.
    /// Returns the signal strength of the first advertisement seen.
    pub async fn find(&mut self, address: u64, timeout: Duration) -> Result<i16, LinkError> {
        self.stop()?;
        info!("Scanning for {}", format_address(address));

        let watcher = BluetoothLEAdvertisementWatcher::new()?;
        watcher.SetScanningMode(BluetoothLEScanningMode::Active)?;

        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        let handler = TypedEventHandler::new(
            move |_: windows::core::Ref<BluetoothLEAdvertisementWatcher>,
                  args: windows::core::Ref<BluetoothLEAdvertisementReceivedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    if args.BluetoothAddress()? == address {
                        let _ = seen_tx.send(args.RawSignalStrengthInDBm()?);
                    }
                }
                Ok(())
            },
        );

        watcher.Received(&handler)?;
        watcher.Start()?;
        self.watcher = Some(watcher);

        let seen = tokio::time::timeout(timeout, seen_rx.recv()).await;
        self.stop()?;

        match seen {
            Ok(Some(rssi)) => {
                debug!("{} advertising at {} dBm", format_address(address), rssi);
                Ok(rssi)
            }
            _ => Err(LinkError::NotFound(format_address(address))),
        }
    }

    pub fn stop(&mut self) -> Result<(), LinkError> {
        if let Some(watcher) = self.watcher.take() {
            debug!("Stopping BLE scan");
            watcher.Stop()?;
        }
        Ok(())
    }
}

impl Drop for BleScanner {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
