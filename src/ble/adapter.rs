//! Radio adapter capability.
//!
//! The pairing core never talks to a platform Bluetooth stack directly.
//! It issues requests through [`RadioAdapter`] and receives every outcome
//! later as a [`RadioEvent`] on a single ordered queue.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::Result;

/// Power and authorization state of the local radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AdapterState {
    /// State not yet reported.
    #[default]
    Unknown,
    /// The radio stack is restarting.
    Resetting,
    /// This platform has no BLE central support.
    Unsupported,
    /// The application may not use Bluetooth.
    Unauthorized,
    /// The radio is switched off.
    PoweredOff,
    /// The radio is ready for scanning and connecting.
    PoweredOn,
}

impl AdapterState {
    /// Check if the adapter permits scanning and connecting.
    pub fn is_powered_on(&self) -> bool {
        matches!(self, Self::PoweredOn)
    }
}

impl std::fmt::Display for AdapterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "Unknown"),
            Self::Resetting => write!(f, "Resetting"),
            Self::Unsupported => write!(f, "Unsupported"),
            Self::Unauthorized => write!(f, "Unauthorized"),
            Self::PoweredOff => write!(f, "PoweredOff"),
            Self::PoweredOn => write!(f, "PoweredOn"),
        }
    }
}

impl From<btleplug::api::CentralState> for AdapterState {
    fn from(state: btleplug::api::CentralState) -> Self {
        use btleplug::api::CentralState;

        match state {
            CentralState::PoweredOn => Self::PoweredOn,
            CentralState::PoweredOff => Self::PoweredOff,
            CentralState::Unknown => Self::Unknown,
        }
    }
}

/// Opaque, stable identity of a remote peripheral.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceId(String);

impl DeviceId {
    /// Wrap a platform identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the identifier as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&btleplug::platform::PeripheralId> for DeviceId {
    fn from(id: &btleplug::platform::PeripheralId) -> Self {
        Self(id.to_string())
    }
}

/// A service reported by service discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    /// Service UUID.
    pub uuid: Uuid,
    /// Whether this is a primary service.
    pub primary: bool,
}

/// A characteristic reported by characteristic discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicRecord {
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// UUID of the service this characteristic belongs to.
    pub service_uuid: Uuid,
    /// Whether notifications are currently enabled.
    pub is_notifying: bool,
}

/// Outcome of an adapter operation as reported by the radio stack.
///
/// Failures carry the stack's own description; they are reported, not
/// propagated as crate errors, because the core only logs them.
pub type RadioResult<T> = std::result::Result<T, String>;

/// An asynchronous event delivered by the adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum RadioEvent {
    /// The adapter power/authorization state changed.
    StateChanged(AdapterState),
    /// A peripheral advertisement was received.
    Advertisement {
        /// Peripheral identity.
        id: DeviceId,
        /// Advertised local name, if any.
        name: Option<String>,
        /// Signal strength in dBm.
        rssi: Option<i16>,
    },
    /// A connect request succeeded.
    Connected {
        /// Peripheral identity.
        id: DeviceId,
        /// Peripheral name at connect time.
        name: Option<String>,
    },
    /// A connect request failed.
    ConnectFailed {
        /// Peripheral identity.
        id: DeviceId,
        /// Stack error, if one was given.
        error: Option<String>,
    },
    /// An established link went down.
    Disconnected {
        /// Peripheral identity.
        id: DeviceId,
        /// Stack error, if one was given.
        error: Option<String>,
    },
    /// Service discovery completed.
    ServicesDiscovered {
        /// Peripheral identity.
        id: DeviceId,
        /// Discovered services or the stack error.
        result: RadioResult<Vec<ServiceRecord>>,
    },
    /// Characteristic discovery for one service completed.
    CharacteristicsDiscovered {
        /// Peripheral identity.
        id: DeviceId,
        /// The service that was walked.
        service: Uuid,
        /// Discovered characteristics or the stack error.
        result: RadioResult<Vec<CharacteristicRecord>>,
    },
    /// A notify-enable request completed.
    NotificationStateChanged {
        /// Peripheral identity.
        id: DeviceId,
        /// The characteristic whose state changed.
        characteristic: Uuid,
        /// New notifying flag or the stack error.
        result: RadioResult<bool>,
    },
    /// A value arrived on a subscribed characteristic.
    ValueReceived {
        /// Peripheral identity.
        id: DeviceId,
        /// The characteristic that delivered the value.
        characteristic: Uuid,
        /// Raw payload or the stack error.
        result: RadioResult<Bytes>,
    },
}

/// Sending half of the adapter event queue.
pub type EventSender = mpsc::UnboundedSender<RadioEvent>;
/// Receiving half of the adapter event queue.
pub type EventReceiver = mpsc::UnboundedReceiver<RadioEvent>;

/// Create the ordered queue adapters deliver their events on.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Capabilities the pairing core needs from a BLE central.
///
/// `connect`, `disconnect`, `discover_services`, `discover_characteristics`
/// and `set_notify` are requests: returning `Ok` means the request was
/// issued, and its outcome arrives later as a [`RadioEvent`]. An `Err`
/// means the request could not be issued at all.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RadioAdapter: Send + Sync {
    /// Query the current adapter state.
    async fn state(&self) -> Result<AdapterState>;

    /// Begin a continuous scan without a service filter.
    async fn start_scan(&self) -> Result<()>;

    /// Halt the scan.
    async fn stop_scan(&self) -> Result<()>;

    /// List peripherals already connected to the system that expose `service`.
    async fn connected_peripherals(&self, service: Uuid) -> Result<Vec<DeviceId>>;

    /// Request a connection.
    async fn connect(&self, id: &DeviceId) -> Result<()>;

    /// Request cancellation of a connection or pending connection attempt.
    async fn disconnect(&self, id: &DeviceId) -> Result<()>;

    /// Request discovery of all services.
    async fn discover_services(&self, id: &DeviceId) -> Result<()>;

    /// Request discovery of the listed characteristics within `service`.
    async fn discover_characteristics(
        &self,
        id: &DeviceId,
        service: Uuid,
        characteristics: Vec<Uuid>,
    ) -> Result<()>;

    /// Request enabling or disabling notifications on a characteristic.
    async fn set_notify(
        &self,
        id: &DeviceId,
        characteristic: &CharacteristicRecord,
        enabled: bool,
    ) -> Result<()>;
}
