//! BLE scanning functionality.
//!
//! Tracks the ordered list of discovered Q devices. The radio scan runs
//! without a service filter; devices are filtered locally by name.

use chrono::{DateTime, Utc};
use tracing::{debug, info, trace};

use crate::ble::adapter::{AdapterState, DeviceId, RadioAdapter};
use crate::ble::uuids::is_device_name;
use crate::error::{Error, Result};

/// A Q device seen during the current scan.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DiscoveredDevice {
    /// Peripheral identity.
    pub id: DeviceId,
    /// Advertised name.
    pub name: Option<String>,
    /// Signal strength in dBm when first seen.
    pub rssi: Option<i16>,
    /// When the device was first seen.
    pub first_seen: DateTime<Utc>,
}

/// Scanner for Q devices.
#[derive(Debug, Default)]
pub struct Scanner {
    /// Whether the last explicit request was a start.
    is_scanning: bool,
    /// Discovered devices in first-seen order.
    discovered: Vec<DiscoveredDevice>,
}

impl Scanner {
    /// Create an idle scanner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start scanning, clearing the previously discovered devices.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AdapterUnavailable`] if the adapter is not powered
    /// on, or the adapter's error if the scan could not be started.
    pub async fn start<A>(&mut self, adapter: &A, state: AdapterState) -> Result<()>
    where
        A: RadioAdapter + ?Sized,
    {
        if !state.is_powered_on() {
            return Err(Error::AdapterUnavailable { state });
        }

        self.discovered.clear();
        adapter.start_scan().await?;
        self.is_scanning = true;

        info!("Scanning started");
        Ok(())
    }

    /// Stop scanning. Does nothing if not scanning.
    pub async fn stop<A>(&mut self, adapter: &A) -> Result<()>
    where
        A: RadioAdapter + ?Sized,
    {
        if !self.is_scanning {
            debug!("Not scanning, ignoring stop request");
            return Ok(());
        }

        self.is_scanning = false;
        adapter.stop_scan().await?;

        info!("Scanning stopped");
        Ok(())
    }

    /// Check if currently scanning.
    pub fn is_scanning(&self) -> bool {
        self.is_scanning
    }

    /// Get the discovered devices in first-seen order.
    pub fn discovered(&self) -> &[DiscoveredDevice] {
        &self.discovered
    }

    /// Find a discovered device by identity.
    pub fn find(&self, id: &DeviceId) -> Option<&DiscoveredDevice> {
        self.discovered.iter().find(|d| d.id == *id)
    }

    /// Handle an advertisement.
    ///
    /// Returns `true` if a new device was added to the list.
    pub fn on_advertisement(
        &mut self,
        id: DeviceId,
        name: Option<String>,
        rssi: Option<i16>,
    ) -> bool {
        if !self.is_scanning {
            trace!("Ignoring advertisement from {} while not scanning", id);
            return false;
        }

        let Some(device_name) = name.as_deref().filter(|n| is_device_name(n)) else {
            return false;
        };

        if self.find(&id).is_some() {
            return false;
        }

        info!("Discovered device: {} ({})", device_name, id);

        self.discovered.push(DiscoveredDevice {
            id,
            name,
            rssi,
            first_seen: Utc::now(),
        });
        true
    }
}
