//! Adapter power-state tracking.

use tracing::{debug, info, warn};

use crate::ble::adapter::{AdapterState, DeviceId, RadioAdapter};
use crate::ble::uuids::TARGET_SERVICE_UUID;
use crate::error::{Error, Result};

/// Tracks the adapter state and gates scanning and connecting on it.
#[derive(Debug, Default)]
pub struct AdapterStateMonitor {
    state: AdapterState,
}

impl AdapterStateMonitor {
    /// Create a monitor in the `Unknown` state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the last reported state.
    pub fn state(&self) -> AdapterState {
        self.state
    }

    /// Check if the adapter permits scanning and connecting.
    pub fn is_powered_on(&self) -> bool {
        self.state.is_powered_on()
    }

    /// Record a reported state.
    ///
    /// Returns `true` if the adapter is now powered on.
    pub fn update(&mut self, state: AdapterState) -> bool {
        if self.state != state {
            debug!("Adapter state changed: {} -> {}", self.state, state);
        }
        self.state = state;

        match state {
            AdapterState::PoweredOn => info!("Bluetooth is powered on"),
            AdapterState::PoweredOff => warn!("Bluetooth is powered off"),
            AdapterState::Unsupported => warn!("Bluetooth is unsupported"),
            AdapterState::Unauthorized => warn!("Bluetooth is unauthorized"),
            AdapterState::Resetting => warn!("Bluetooth is resetting"),
            AdapterState::Unknown => warn!("Bluetooth state is unknown"),
        }

        state.is_powered_on()
    }

    /// Fail unless the adapter is powered on.
    pub fn ensure_powered_on(&self) -> Result<()> {
        if self.is_powered_on() {
            Ok(())
        } else {
            Err(Error::AdapterUnavailable { state: self.state })
        }
    }

    /// Find a device already connected to the system that exposes the
    /// target service.
    pub async fn bonded_device<A>(&self, adapter: &A) -> Result<Option<DeviceId>>
    where
        A: RadioAdapter + ?Sized,
    {
        self.ensure_powered_on()?;

        let devices = adapter.connected_peripherals(TARGET_SERVICE_UUID).await?;
        debug!("{} connected peripherals expose the target service", devices.len());

        Ok(devices.into_iter().next())
    }
}
