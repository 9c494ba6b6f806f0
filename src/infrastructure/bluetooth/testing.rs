//! In-memory link and sink for exercising the connection manager

use crate::domain::models::{Frame, LinkEvent};
use crate::infrastructure::bluetooth::link::{LinkError, LinkEventSender, PeripheralLink};
use crate::infrastructure::sink::FrameSink;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct MockState {
    scans: usize,
    connects: usize,
    subscriptions: usize,
    disconnects: usize,
    fail_scans: usize,
    fail_connects: usize,
    unconnected: usize,
    fail_writes: bool,
    connected: bool,
    notify_tx: Option<LinkEventSender>,
    disconnect_tx: Option<LinkEventSender>,
    writes: Vec<(String, Vec<u8>)>,
}

/// Scriptable peripheral. Clones share state so a test can drive the
/// link while the manager owns it.
#[derive(Clone, Default)]
pub struct MockLink {
    state: Arc<Mutex<MockState>>,
}

impl MockLink {
    fn with<T>(&self, f: impl FnOnce(&mut MockState) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }

    pub fn fail_next_scans(&self, count: usize) {
        self.with(|s| s.fail_scans = count);
    }

    pub fn fail_next_connects(&self, count: usize) {
        self.with(|s| s.fail_connects = count);
    }

    /// Connect succeeds but the link reports itself down afterwards
    pub fn report_unconnected(&self, count: usize) {
        self.with(|s| s.unconnected = count);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.with(|s| s.fail_writes = fail);
    }

    /// Push a notification from the peripheral
    pub fn notify(&self, payload: &[u8]) {
        self.with(|s| {
            if let Some(tx) = &s.notify_tx {
                let _ = tx.send(LinkEvent::Notification(payload.to_vec()));
            }
        });
    }

    /// Simulate the peripheral going away
    pub fn drop_connection(&self) {
        self.with(|s| {
            s.connected = false;
            s.notify_tx = None;
            if let Some(tx) = s.disconnect_tx.take() {
                let _ = tx.send(LinkEvent::Disconnected);
            }
        });
    }

    /// Report a disconnect, then push `trailing` notifications on the same
    /// connection as a stack would when callbacks race the status change
    pub fn drop_connection_then_notify(&self, trailing: &[Vec<u8>]) {
        self.with(|s| {
            s.connected = false;
            if let Some(tx) = s.disconnect_tx.take() {
                let _ = tx.send(LinkEvent::Disconnected);
            }
            if let Some(tx) = s.notify_tx.take() {
                for payload in trailing {
                    let _ = tx.send(LinkEvent::Notification(payload.clone()));
                }
            }
        });
    }

    pub fn scans(&self) -> usize {
        self.with(|s| s.scans)
    }

    pub fn connects(&self) -> usize {
        self.with(|s| s.connects)
    }

    pub fn subscriptions(&self) -> usize {
        self.with(|s| s.subscriptions)
    }

    pub fn disconnects(&self) -> usize {
        self.with(|s| s.disconnects)
    }

    pub fn is_link_up(&self) -> bool {
        self.with(|s| s.connected)
    }

    pub fn writes(&self) -> Vec<(String, Vec<u8>)> {
        self.with(|s| s.writes.clone())
    }
}

impl PeripheralLink for MockLink {
    type Handle = usize;

    async fn scan(&self, address: &str) -> Result<usize, LinkError> {
        self.with(|s| {
            s.scans += 1;
            if s.fail_scans > 0 {
                s.fail_scans -= 1;
                return Err(LinkError::NotFound(address.to_string()));
            }
            Ok(s.scans)
        })
    }

    async fn connect(&self, _handle: &usize) -> Result<(), LinkError> {
        self.with(|s| {
            s.connects += 1;
            if s.fail_connects > 0 {
                s.fail_connects -= 1;
                return Err(LinkError::Gatt("connection refused".to_string()));
            }
            if s.unconnected > 0 {
                s.unconnected -= 1;
                s.connected = false;
            } else {
                s.connected = true;
            }
            Ok(())
        })
    }

    async fn is_connected(&self, _handle: &usize) -> bool {
        self.with(|s| s.connected)
    }

    async fn subscribe(
        &self,
        _handle: &usize,
        _characteristic: &str,
        events: LinkEventSender,
    ) -> Result<(), LinkError> {
        self.with(|s| {
            s.subscriptions += 1;
            s.notify_tx = Some(events);
        });
        Ok(())
    }

    fn on_disconnect(&self, _handle: &usize, events: LinkEventSender) -> Result<(), LinkError> {
        self.with(|s| s.disconnect_tx = Some(events));
        Ok(())
    }

    async fn write(
        &self,
        _handle: &usize,
        characteristic: &str,
        payload: &[u8],
    ) -> Result<(), LinkError> {
        self.with(|s| {
            if s.fail_writes {
                return Err(LinkError::Gatt("write rejected".to_string()));
            }
            s.writes.push((characteristic.to_string(), payload.to_vec()));
            Ok(())
        })
    }

    async fn disconnect(&self, _handle: &usize) -> Result<(), LinkError> {
        self.with(|s| {
            s.disconnects += 1;
            s.connected = false;
            s.notify_tx = None;
            s.disconnect_tx = None;
        });
        Ok(())
    }
}

/// Sink that keeps every frame and optionally answers images
#[derive(Clone, Default)]
pub struct RecordingSink {
    frames: Arc<Mutex<Vec<Frame>>>,
    reply: Option<Vec<u8>>,
}

impl RecordingSink {
    pub fn replying(reply: &[u8]) -> Self {
        Self {
            frames: Arc::default(),
            reply: Some(reply.to_vec()),
        }
    }

    pub fn frames(&self) -> Vec<Frame> {
        self.frames.lock().unwrap().clone()
    }
}

impl FrameSink for RecordingSink {
    fn consume(&mut self, frame: Frame) -> Option<Vec<u8>> {
        let is_image = frame.image_bytes().is_some();
        self.frames.lock().unwrap().push(frame);
        if is_image {
            self.reply.clone()
        } else {
            None
        }
    }
}

/// Yield to the runtime until `condition` holds
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    while !condition() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}
