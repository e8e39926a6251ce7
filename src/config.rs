//! Pairing manager configuration.

/// Runtime options for [`PairingManager`](crate::PairingManager).
///
/// The target service, characteristic and name filter are fixed
/// constants in [`ble::uuids`](crate::ble::uuids) and are not configurable.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PairingConfig {
    /// Connect automatically to an already-connected device exposing the
    /// target service when the adapter powers on.
    pub auto_connect_bonded: bool,
    /// Number of snapshots buffered per observer.
    pub snapshot_capacity: usize,
}

impl PairingConfig {
    /// Default number of buffered snapshots.
    pub const DEFAULT_SNAPSHOT_CAPACITY: usize = 32;

    /// Set whether bonded devices are connected automatically.
    pub fn with_auto_connect_bonded(mut self, enabled: bool) -> Self {
        self.auto_connect_bonded = enabled;
        self
    }

    /// Set the snapshot buffer size.
    pub fn with_snapshot_capacity(mut self, capacity: usize) -> Self {
        self.snapshot_capacity = capacity;
        self
    }
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            auto_connect_bonded: true,
            snapshot_capacity: Self::DEFAULT_SNAPSHOT_CAPACITY,
        }
    }
}
