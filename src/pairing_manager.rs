//! Pairing manager for discovering and bonding with Q devices.
//!
//! This module owns the background event loop. Adapter events and user
//! commands are fed, one at a time, to a single
//! [`ConnectionController`]; observers read the published snapshots.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::ble::adapter::{event_channel, DeviceId, EventReceiver, RadioAdapter, RadioEvent};
use crate::ble::platform::BtleplugAdapter;
use crate::ble::scanner::DiscoveredDevice;
use crate::config::PairingConfig;
use crate::controller::{Command, ConnectionController};
use crate::error::{Error, Result};
use crate::state::{CallbackHandle, SessionSnapshot, SessionStateStore};

/// Message delivered to the event loop.
enum Message {
    Command(Command, oneshot::Sender<Result<()>>),
    Shutdown(oneshot::Sender<()>),
}

/// Central manager for pairing with a Q device.
pub struct PairingManager {
    /// Command queue into the event loop.
    command_tx: mpsc::UnboundedSender<Message>,
    /// Published session state.
    store: SessionStateStore,
    /// Background task handle.
    background_handle: RwLock<Option<tokio::task::JoinHandle<()>>>,
    /// Running flag.
    is_running: Arc<AtomicBool>,
}

impl PairingManager {
    /// Create a manager on the first system Bluetooth adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new() -> Result<Self> {
        Self::with_config(PairingConfig::default()).await
    }

    /// Create a manager on the first system Bluetooth adapter with options.
    pub async fn with_config(config: PairingConfig) -> Result<Self> {
        let (events_tx, events_rx) = event_channel();
        let adapter = BtleplugAdapter::new(events_tx).await?;

        Ok(Self::spawn(adapter, events_rx, config))
    }

    /// Run a manager over any adapter whose events arrive on `events`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<A>(adapter: A, events: EventReceiver, config: PairingConfig) -> Self
    where
        A: RadioAdapter + 'static,
    {
        let store = SessionStateStore::new(config.snapshot_capacity);
        let controller = ConnectionController::new(Arc::new(adapter), config, store.clone());

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let is_running = Arc::new(AtomicBool::new(true));

        let handle = tokio::spawn(Self::run(
            controller,
            events,
            command_rx,
            is_running.clone(),
        ));

        Self {
            command_tx,
            store,
            background_handle: RwLock::new(Some(handle)),
            is_running,
        }
    }

    /// Start scanning for devices.
    pub async fn start_scanning(&self) -> Result<()> {
        self.send(Command::StartScanning).await
    }

    /// Stop scanning.
    pub async fn stop_scanning(&self) -> Result<()> {
        self.send(Command::StopScanning).await
    }

    /// Connect to a device and trigger pairing.
    ///
    /// Returns once the connect request is issued; progress is reported
    /// through snapshots.
    pub async fn connect(&self, id: DeviceId) -> Result<()> {
        self.send(Command::Connect(id)).await
    }

    /// Disconnect the current session, if any.
    pub async fn disconnect(&self) -> Result<()> {
        self.send(Command::Disconnect).await
    }

    /// Get the latest snapshot.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.store.snapshot()
    }

    /// Get the discovered devices in first-seen order.
    pub fn devices(&self) -> Vec<DiscoveredDevice> {
        self.store.snapshot().devices
    }

    /// Check if scanning is active.
    pub fn is_scanning(&self) -> bool {
        self.store.snapshot().is_scanning
    }

    /// Check if a device is connected.
    pub fn is_connected(&self) -> bool {
        self.store.snapshot().is_connected
    }

    /// Get the connected device's name.
    pub fn connected_name(&self) -> Option<String> {
        self.store.snapshot().connected_name
    }

    /// Subscribe to snapshot changes.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionSnapshot> {
        self.store.subscribe()
    }

    /// Register a callback for snapshot changes.
    pub fn on_state_changed<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&SessionSnapshot) + Send + Sync + 'static,
    {
        self.store.on_state_changed(callback)
    }

    /// Check if the event loop is running.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Clean shutdown: disconnect, stop scanning, and end the event loop.
    pub async fn shutdown(&self) -> Result<()> {
        if !self.is_running() {
            return Ok(());
        }

        info!("Shutting down pairing manager");

        let (reply_tx, reply_rx) = oneshot::channel();
        if self.command_tx.send(Message::Shutdown(reply_tx)).is_ok() {
            let _ = reply_rx.await;
        }

        let handle = self.background_handle.write().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        Ok(())
    }

    async fn send(&self, command: Command) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.command_tx
            .send(Message::Command(command, reply_tx))
            .map_err(|_| Error::ManagerStopped)?;

        reply_rx.await.map_err(|_| Error::ManagerStopped)?
    }

    /// Event loop: the only place controller state is touched.
    async fn run(
        mut controller: ConnectionController,
        mut events: EventReceiver,
        mut commands: mpsc::UnboundedReceiver<Message>,
        is_running: Arc<AtomicBool>,
    ) {
        let initial_state = controller.adapter().state().await;
        match initial_state {
            Ok(state) => {
                controller
                    .handle_event(RadioEvent::StateChanged(state))
                    .await
            }
            Err(e) => warn!("Failed to query initial adapter state: {}", e),
        }

        loop {
            tokio::select! {
                message = commands.recv() => match message {
                    Some(Message::Command(command, reply)) => {
                        let result = controller.execute(command).await;
                        let _ = reply.send(result);
                    }
                    Some(Message::Shutdown(reply)) => {
                        controller.shutdown().await;
                        let _ = reply.send(());
                        break;
                    }
                    None => break,
                },
                Some(event) = events.recv() => {
                    controller.handle_event(event).await;
                }
            }
        }

        is_running.store(false, Ordering::SeqCst);
        debug!("Pairing manager event loop ended");
    }
}

impl Drop for PairingManager {
    fn drop(&mut self) {
        self.is_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.background_handle.write().take() {
            handle.abort();
        }
    }
}
