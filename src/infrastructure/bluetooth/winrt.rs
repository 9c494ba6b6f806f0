//! WinRT Link
//!
//! [`PeripheralLink`] on top of the Windows Bluetooth LE APIs.

use crate::domain::models::LinkEvent;
use crate::domain::settings::LinkSettings;
use crate::infrastructure::bluetooth::link::{LinkError, LinkEventSender, PeripheralLink};
use crate::infrastructure::bluetooth::protocol::{parse_address, parse_uuid, read_buffer};
use crate::infrastructure::bluetooth::scanner::BleScanner;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};
use windows::Devices::Bluetooth::GenericAttributeProfile::{
    GattCharacteristic, GattClientCharacteristicConfigurationDescriptorValue,
    GattCommunicationStatus, GattSession, GattValueChangedEventArgs,
};
use windows::Devices::Bluetooth::{
    BluetoothCacheMode, BluetoothConnectionStatus, BluetoothLEDevice,
};
use windows::Foundation::TypedEventHandler;
use windows::Storage::Streams::DataWriter;

const NOTIFY_ATTEMPTS: u32 = 3;

/// GATT state for the current connection
#[derive(Default)]
struct LinkSession {
    gatt_session: Option<GattSession>,
    characteristics: Vec<GattCharacteristic>,
    value_handlers: Vec<(GattCharacteristic, i64)>,
    status_handler: Option<i64>,
}

pub struct WinRtLink {
    service_uuid: String,
    scan_timeout: Duration,
    session: Mutex<Option<LinkSession>>,
}

impl WinRtLink {
    pub fn new(settings: &LinkSettings) -> Self {
        Self {
            service_uuid: settings.service_uuid.clone(),
            scan_timeout: Duration::from_millis(settings.scan_timeout_ms),
            session: Mutex::new(None),
        }
    }

    fn with_session<T>(
        &self,
        f: impl FnOnce(&mut Option<LinkSession>) -> Result<T, LinkError>,
    ) -> Result<T, LinkError> {
        let mut guard = self
            .session
            .lock()
            .map_err(|_| LinkError::Gatt("Session lock poisoned".to_string()))?;
        f(&mut guard)
    }

    fn find_characteristic(&self, uuid: &str) -> Result<GattCharacteristic, LinkError> {
        let target = parse_uuid(uuid)?;
        self.with_session(|session| {
            let session = session.as_ref().ok_or(LinkError::NotConnected)?;
            for characteristic in &session.characteristics {
                if characteristic.Uuid()? == target {
                    return Ok(characteristic.clone());
                }
            }
            Err(LinkError::CharacteristicNotFound(uuid.to_string()))
        })
    }

    /// Open a GATT session that keeps the link up while it is held
    async fn open_gatt_session(device: &BluetoothLEDevice) -> Result<GattSession, LinkError> {
        let device_id = device.BluetoothDeviceId()?;
        let session = GattSession::FromDeviceIdAsync(&device_id)?.await?;
        session.SetMaintainConnection(true)?;
        Ok(session)
    }

    /// Enable notifications through the CCCD, with retries
    async fn enable_notifications(&self, characteristic: &GattCharacteristic) -> Result<(), LinkError> {
        for attempt in 1..=NOTIFY_ATTEMPTS {
            let status = characteristic
                .WriteClientCharacteristicConfigurationDescriptorAsync(
                    GattClientCharacteristicConfigurationDescriptorValue::Notify,
                )?
                .await;

            match status {
                Ok(GattCommunicationStatus::Success) => {
                    info!("Notifications enabled");
                    return Ok(());
                }
                Ok(other) => warn!(
                    "Notification attempt {}/{} returned {:?}",
                    attempt, NOTIFY_ATTEMPTS, other
                ),
                Err(e) => warn!(
                    "Notification attempt {}/{} failed: {}",
                    attempt, NOTIFY_ATTEMPTS, e
                ),
            }

            if attempt < NOTIFY_ATTEMPTS {
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }

        Err(LinkError::Gatt(format!(
            "Failed to enable notifications after {} attempts",
            NOTIFY_ATTEMPTS
        )))
    }
}

impl PeripheralLink for WinRtLink {
    type Handle = BluetoothLEDevice;

    async fn scan(&self, address: &str) -> Result<BluetoothLEDevice, LinkError> {
        let raw = parse_address(address)?;

        let mut scanner = BleScanner::new();
        scanner.find(raw, self.scan_timeout).await?;

        let device = BluetoothLEDevice::FromBluetoothAddressAsync(raw)?.await?;
        info!("Device found: {:?}", device.Name()?);
        Ok(device)
    }

    async fn connect(&self, device: &BluetoothLEDevice) -> Result<(), LinkError> {
        let service_uuid = parse_uuid(&self.service_uuid)?;

        let gatt_session = match Self::open_gatt_session(device).await {
            Ok(session) => {
                info!("GattSession created, MaintainConnection set to true");
                Some(session)
            }
            Err(e) => {
                warn!("Failed to create GattSession: {}", e);
                None
            }
        };

        // Cached lookups can answer without ever opening the link
        let services_result = device
            .GetGattServicesForUuidWithCacheModeAsync(
                service_uuid,
                BluetoothCacheMode::Uncached,
            )?
            .await?;

        let status = services_result.Status()?;
        if status != GattCommunicationStatus::Success {
            return Err(LinkError::Gatt(format!(
                "Service lookup returned {:?}",
                status
            )));
        }

        let services = services_result.Services()?;
        if services.Size()? == 0 {
            return Err(LinkError::ServiceNotFound(self.service_uuid.clone()));
        }
        let service = services.GetAt(0)?;

        let chars_result = service.GetCharacteristicsAsync()?.await?;
        let status = chars_result.Status()?;
        if status != GattCommunicationStatus::Success {
            return Err(LinkError::Gatt(format!(
                "Characteristic lookup returned {:?}",
                status
            )));
        }

        let found = chars_result.Characteristics()?;
        let mut characteristics = Vec::new();
        for i in 0..found.Size()? {
            characteristics.push(found.GetAt(i)?);
        }
        info!("Found {} characteristics", characteristics.len());

        self.with_session(|session| {
            *session = Some(LinkSession {
                gatt_session,
                characteristics,
                ..Default::default()
            });
            Ok(())
        })
    }

    async fn is_connected(&self, device: &BluetoothLEDevice) -> bool {
        device
            .ConnectionStatus()
            .map(|s| s == BluetoothConnectionStatus::Connected)
            .unwrap_or(false)
    }

    async fn subscribe(
        &self,
        _device: &BluetoothLEDevice,
        characteristic: &str,
        events: LinkEventSender,
    ) -> Result<(), LinkError> {
        let characteristic = self.find_characteristic(characteristic)?;

        // Register before enabling so the first notification is not missed
        let handler = TypedEventHandler::new(
            move |_: windows::core::Ref<GattCharacteristic>,
                  args: windows::core::Ref<GattValueChangedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let payload = read_buffer(&args.CharacteristicValue()?)?;
                    let _ = events.send(LinkEvent::Notification(payload));
                }
                Ok(())
            },
        );
        let token = characteristic.ValueChanged(&handler)?;
        self.with_session(|session| {
            if let Some(session) = session.as_mut() {
                session.value_handlers.push((characteristic.clone(), token));
            }
            Ok(())
        })?;

        self.enable_notifications(&characteristic).await
    }

    fn on_disconnect(
        &self,
        device: &BluetoothLEDevice,
        events: LinkEventSender,
    ) -> Result<(), LinkError> {
        let handler =
            TypedEventHandler::new(move |dev: windows::core::Ref<BluetoothLEDevice>, _| {
                if let Some(dev) = dev.as_ref() {
                    if dev.ConnectionStatus()? == BluetoothConnectionStatus::Disconnected {
                        let _ = events.send(LinkEvent::Disconnected);
                    }
                }
                Ok(())
            });
        let token = device.ConnectionStatusChanged(&handler)?;

        self.with_session(|session| {
            if let Some(session) = session.as_mut() {
                session.status_handler = Some(token);
            }
            Ok(())
        })
    }

    async fn write(
        &self,
        _device: &BluetoothLEDevice,
        characteristic: &str,
        payload: &[u8],
    ) -> Result<(), LinkError> {
        let characteristic = self.find_characteristic(characteristic)?;

        let writer = DataWriter::new()?;
        writer.WriteBytes(payload)?;
        let buffer = writer.DetachBuffer()?;

        let status = characteristic.WriteValueAsync(&buffer)?.await?;
        if status != GattCommunicationStatus::Success {
            return Err(LinkError::Gatt(format!("Write returned {:?}", status)));
        }
        Ok(())
    }

    async fn disconnect(&self, device: &BluetoothLEDevice) -> Result<(), LinkError> {
        let session = self.with_session(|session| Ok(session.take()))?;

        if let Some(session) = session {
            for (characteristic, token) in session.value_handlers {
                let _ = characteristic.RemoveValueChanged(token);
            }
            if let Some(token) = session.status_handler {
                let _ = device.RemoveConnectionStatusChanged(token);
            }
            if let Some(gatt_session) = session.gatt_session {
                let _ = gatt_session.SetMaintainConnection(false);
                let _ = gatt_session.Close();
            }
        }

        let _ = device.Close();
        debug!("Device closed");
        Ok(())
    }
}
