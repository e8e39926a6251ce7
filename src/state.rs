//! Externally observable session state.
//!
//! The coordinator publishes an immutable [`SessionSnapshot`] after every
//! processed event. Observers read the latest snapshot from any thread or
//! receive each change through a broadcast channel.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;

use crate::ble::adapter::AdapterState;
use crate::ble::connection::ConnectionState;
use crate::ble::scanner::DiscoveredDevice;

/// Callback handle for unregistering callbacks.
pub struct CallbackHandle {
    id: u64,
    unregister_fn: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl CallbackHandle {
    /// Create a new callback handle.
    pub(crate) fn new(id: u64, unregister_fn: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            id,
            unregister_fn: Some(Box::new(unregister_fn)),
        }
    }

    /// Unregister this callback.
    pub fn unregister(mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }

    /// Get the callback ID.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for CallbackHandle {
    fn drop(&mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }
}

/// Point-in-time view of the pairing session.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SessionSnapshot {
    /// Last reported adapter state.
    pub adapter_state: AdapterState,
    /// Discovered Q devices in first-seen order.
    pub devices: Vec<DiscoveredDevice>,
    /// Whether a scan was last requested.
    pub is_scanning: bool,
    /// Whether a link is established.
    pub is_connected: bool,
    /// Name of the connected device.
    pub connected_name: Option<String>,
    /// Connection lifecycle phase.
    pub connection_state: ConnectionState,
    /// Whether notifications are active on the target characteristic.
    pub is_notifying: bool,
}

/// Holds and broadcasts the latest [`SessionSnapshot`].
#[derive(Clone)]
pub struct SessionStateStore {
    current: Arc<RwLock<SessionSnapshot>>,
    change_tx: broadcast::Sender<SessionSnapshot>,
    callback_counter: Arc<AtomicU64>,
}

impl SessionStateStore {
    /// Create a store whose change channel buffers `capacity` snapshots.
    pub fn new(capacity: usize) -> Self {
        let (change_tx, _) = broadcast::channel(capacity.max(1));

        Self {
            current: Arc::new(RwLock::new(SessionSnapshot::default())),
            change_tx,
            callback_counter: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Get the latest snapshot.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.current.read().clone()
    }

    /// Replace the snapshot, notifying observers if it changed.
    ///
    /// Returns `true` if observers were notified.
    pub fn publish(&self, snapshot: SessionSnapshot) -> bool {
        {
            let mut current = self.current.write();
            if *current == snapshot {
                return false;
            }
            *current = snapshot.clone();
        }

        trace!(
            "Publishing snapshot: state={}, devices={}, scanning={}",
            snapshot.connection_state,
            snapshot.devices.len(),
            snapshot.is_scanning
        );

        let _ = self.change_tx.send(snapshot);
        true
    }

    /// Subscribe to snapshot changes.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionSnapshot> {
        self.change_tx.subscribe()
    }

    /// Register a callback invoked with every changed snapshot.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn on_state_changed<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&SessionSnapshot) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.change_tx.subscribe();

        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(snapshot) => callback(&snapshot),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        CallbackHandle::new(callback_id, move || {
            handle.abort();
        })
    }
}

impl Default for SessionStateStore {
    fn default() -> Self {
        Self::new(32)
    }
}
