//! Connection Manager
//!
//! Keeps a single peripheral connected and turns its notification stream
//! into frames for the sink.
//!
//! ```text
//! Idle ──► Scanning ──► Connecting ──► Connected
//!             ▲              │              │
//!             └──────────────┴──────────────┘
//!            failed attempt / link lost (+ backoff)
//! ```
//!
//! Notifications and disconnects reach the manager as [`LinkEvent`]s on a
//! channel created per connection, so they are handled one at a time on the
//! supervisory task in the order the link produced them.

use crate::domain::models::{ConnectionState, LinkEvent};
use crate::domain::reassembly::FrameReassembler;
use crate::domain::settings::{FrameProtocol, GatewaySettings};
use crate::infrastructure::bluetooth::link::{LinkError, PeripheralLink};
use crate::infrastructure::sink::FrameSink;
use std::future::Future;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Configuration for connection behavior
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Address of the peripheral to keep connected
    pub address: String,
    /// Characteristic carrying image chunks and status digits
    pub notify_char_uuid: String,
    /// Characteristic replies are written to, if any
    pub write_char_uuid: Option<String>,
    /// Pause after a failed attempt or a lost link
    pub reconnect_backoff: Duration,
    /// Pause before each discovery
    pub discovery_warmup: Duration,
}

impl ConnectionConfig {
    pub fn from_settings(settings: &GatewaySettings) -> Self {
        Self {
            address: settings.link.address.clone(),
            notify_char_uuid: settings.link.notify_char_uuid.clone(),
            write_char_uuid: settings.link.write_char_uuid.clone(),
            reconnect_backoff: settings.timing.reconnect_backoff(),
            discovery_warmup: settings.timing.discovery_warmup(),
        }
    }
}

pub struct ConnectionManager<L: PeripheralLink, S: FrameSink> {
    link: L,
    sink: S,
    config: ConnectionConfig,
    reassembler: FrameReassembler,
    handle: Option<L::Handle>,
    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
}

impl<L: PeripheralLink, S: FrameSink> ConnectionManager<L, S> {
    pub fn new(link: L, sink: S, config: ConnectionConfig, protocol: FrameProtocol) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        Self {
            link,
            sink,
            config,
            reassembler: FrameReassembler::new(protocol),
            handle: None,
            state: ConnectionState::Idle,
            state_tx,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Observe state transitions from outside the supervisory task
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Keep the peripheral connected until `shutdown` resolves, then release the link.
    pub async fn run<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        info!("Starting connection manager for {}", self.config.address);
        tokio::pin!(shutdown);

        tokio::select! {
            _ = &mut shutdown => info!("Shutdown requested"),
            _ = self.supervise() => {}
        }

        self.shutdown().await;
    }

    async fn supervise(&mut self) {
        loop {
            if self.handle.is_none() {
                self.discover().await;
                continue;
            }

            match self.connect_and_serve().await {
                Ok(()) => info!("Link to {} lost, rediscovering", self.config.address),
                Err(e) => warn!("Connection attempt failed: {}", e),
            }

            self.release_handle().await;
            self.set_state(ConnectionState::Scanning);
            tokio::time::sleep(self.config.reconnect_backoff).await;
        }
    }

    async fn discover(&mut self) {
        self.set_state(ConnectionState::Scanning);
        debug!("Bluetooth LE hardware warming up...");
        tokio::time::sleep(self.config.discovery_warmup).await;

        match self.link.scan(&self.config.address).await {
            Ok(handle) => {
                info!("Found peripheral {}", self.config.address);
                self.handle = Some(handle);
            }
            Err(e) => {
                warn!("Discovery failed: {}", e);
                tokio::time::sleep(self.config.reconnect_backoff).await;
            }
        }
    }

    /// One connection generation: connect, subscribe, then serve events until the link drops
    async fn connect_and_serve(&mut self) -> Result<(), LinkError> {
        let Some(handle) = self.handle.clone() else {
            return Ok(());
        };

        self.set_state(ConnectionState::Connecting);
        self.link.connect(&handle).await?;
        if !self.link.is_connected(&handle).await {
            return Err(LinkError::NotConnected);
        }

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        self.reassembler.reset();
        self.link.on_disconnect(&handle, events_tx.clone())?;
        self.link
            .subscribe(&handle, &self.config.notify_char_uuid, events_tx)
            .await?;

        self.set_state(ConnectionState::Connected);
        info!("Connected to {}", self.config.address);

        while let Some(event) = events_rx.recv().await {
            match event {
                LinkEvent::Notification(payload) => self.on_notification(&handle, &payload).await,
                LinkEvent::Disconnected => {
                    self.on_link_lost();
                    Self::discard_pending(&mut events_rx);
                    return Ok(());
                }
            }
        }

        // The link dropped every sender without reporting a disconnect
        self.on_link_lost();
        Ok(())
    }

    async fn on_notification(&mut self, handle: &L::Handle, payload: &[u8]) {
        if self.state != ConnectionState::Connected {
            warn!(
                "Discarding {} byte notification received while {}",
                payload.len(),
                self.state
            );
            return;
        }

        let Some(frame) = self.reassembler.ingest(payload) else {
            return;
        };
        let Some(reply) = self.sink.consume(frame) else {
            return;
        };
        self.send_reply(handle, &reply).await;
    }

    async fn send_reply(&self, handle: &L::Handle, reply: &[u8]) {
        let Some(characteristic) = self.config.write_char_uuid.as_deref() else {
            debug!(
                "No write characteristic configured, dropping {} byte reply",
                reply.len()
            );
            return;
        };

        match self.link.write(handle, characteristic, reply).await {
            Ok(()) => debug!("Reply sent: {} bytes", reply.len()),
            Err(e) => warn!("Failed to send reply: {}", e),
        }
    }

    fn on_link_lost(&mut self) {
        self.set_state(ConnectionState::Scanning);
        self.reassembler.abandon();
    }

    fn discard_pending(events_rx: &mut mpsc::UnboundedReceiver<LinkEvent>) {
        while let Ok(event) = events_rx.try_recv() {
            if let LinkEvent::Notification(payload) = event {
                warn!(
                    "Discarding {} byte notification received after disconnect",
                    payload.len()
                );
            }
        }
    }

    async fn release_handle(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = self.link.disconnect(&handle).await {
                debug!("Releasing link failed: {}", e);
            }
        }
    }

    /// Drop any partial image and release the link if one is held
    pub async fn shutdown(&mut self) {
        self.reassembler.abandon();

        if let Some(handle) = self.handle.take() {
            self.set_state(ConnectionState::Disconnecting);
            info!("Disconnecting from {}", self.config.address);
            if let Err(e) = self.link.disconnect(&handle).await {
                warn!("Failed to disconnect cleanly: {}", e);
            }
        }

        self.set_state(ConnectionState::Idle);
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        info!("Connection state: {} -> {}", self.state, state);
        self.state = state;
        self.state_tx.send_replace(state);
    }
}
