//! Error types for the qpair-ble crate.

use thiserror::Error;

use crate::ble::adapter::AdapterState;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// No Bluetooth adapter could be found on this system.
    #[error("Bluetooth not available")]
    BluetoothUnavailable,

    /// The adapter is not powered on, so scanning and connecting are disabled.
    #[error("Bluetooth adapter unavailable (state: {state})")]
    AdapterUnavailable {
        /// The adapter state at the time of the request.
        state: AdapterState,
    },

    /// The device identity is unknown to the adapter.
    #[error("Device not found: {identifier}")]
    DeviceNotFound {
        /// The identifier that was searched for.
        identifier: String,
    },

    /// Failed to establish a connection to the device.
    #[error("Connection failed: {reason}")]
    ConnectFailed {
        /// Description of why the connection failed.
        reason: String,
    },

    /// The link dropped without being requested.
    #[error("Unexpected disconnect: {}", cause.as_deref().unwrap_or("no cause reported"))]
    UnexpectedDisconnect {
        /// The underlying cause, if the adapter reported one.
        cause: Option<String>,
    },

    /// Service discovery reported an error.
    #[error("Service discovery failed: {reason}")]
    ServiceDiscoveryFailed {
        /// Description of the failure.
        reason: String,
    },

    /// Characteristic discovery reported an error.
    #[error("Characteristic discovery failed: {reason}")]
    CharacteristicDiscoveryFailed {
        /// Description of the failure.
        reason: String,
    },

    /// Enabling notifications on the target characteristic failed.
    #[error("Subscription failed: {reason}")]
    SubscriptionFailed {
        /// Description of the failure.
        reason: String,
    },

    /// The pairing manager's event loop is no longer running.
    #[error("Pairing manager stopped")]
    ManagerStopped,

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error tears down the session and restarts scanning.
    pub fn restarts_scan(&self) -> bool {
        matches!(
            self,
            Self::ConnectFailed { .. } | Self::UnexpectedDisconnect { .. }
        )
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
