//! Connection session state.
//!
//! A [`Session`] follows one connection attempt from the connect request
//! to the notification subscription that triggers bonding.

use tracing::debug;

use crate::ble::adapter::{CharacteristicRecord, DeviceId};

/// Lifecycle phase of the pairing connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConnectionState {
    /// Neither scanning nor connected.
    #[default]
    Idle,
    /// Scanning for devices.
    Scanning,
    /// Connect request issued.
    Connecting,
    /// Link established.
    Connected,
    /// Service discovery requested.
    DiscoveringServices,
    /// Target characteristic discovery requested.
    DiscoveringCharacteristics,
    /// Notify-enable requested; bonding in progress.
    Subscribing,
    /// Notifications enabled on the target characteristic.
    Ready,
    /// The last session ended through failure or disconnect.
    Disconnected,
}

impl ConnectionState {
    /// Check if a link is established.
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            Self::Connected
                | Self::DiscoveringServices
                | Self::DiscoveringCharacteristics
                | Self::Subscribing
                | Self::Ready
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Scanning => write!(f, "Scanning"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::DiscoveringServices => write!(f, "Discovering services"),
            Self::DiscoveringCharacteristics => write!(f, "Discovering characteristics"),
            Self::Subscribing => write!(f, "Subscribing"),
            Self::Ready => write!(f, "Ready"),
            Self::Disconnected => write!(f, "Disconnected"),
        }
    }
}

/// The single active connection session.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    /// Target device.
    device: DeviceId,
    /// Device name, once known.
    name: Option<String>,
    /// Current phase.
    state: ConnectionState,
    /// The subscribed characteristic.
    characteristic: Option<CharacteristicRecord>,
    /// Whether the local side asked for the disconnect.
    disconnect_requested: bool,
}

impl Session {
    /// Start a session for a connect attempt.
    pub fn new(device: DeviceId, name: Option<String>) -> Self {
        Self {
            device,
            name,
            state: ConnectionState::Connecting,
            characteristic: None,
            disconnect_requested: false,
        }
    }

    /// Get the target device.
    pub fn device(&self) -> &DeviceId {
        &self.device
    }

    /// Check if this session targets `id`.
    pub fn targets(&self, id: &DeviceId) -> bool {
        self.device == *id
    }

    /// Get the device name.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Replace the device name when the adapter reports one.
    pub fn update_name(&mut self, name: Option<String>) {
        if name.is_some() {
            self.name = name;
        }
    }

    /// Get the current phase.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Move to a new phase.
    pub fn set_state(&mut self, new_state: ConnectionState) {
        if self.state != new_state {
            debug!(
                "Session {} state changed: {} -> {}",
                self.device, self.state, new_state
            );
            self.state = new_state;
        }
    }

    /// Get the subscribed characteristic.
    pub fn characteristic(&self) -> Option<&CharacteristicRecord> {
        self.characteristic.as_ref()
    }

    /// Hold the characteristic being subscribed.
    pub fn set_characteristic(&mut self, characteristic: CharacteristicRecord) {
        self.characteristic = Some(characteristic);
    }

    /// Record the notifying flag reported for the held characteristic.
    pub fn set_notifying(&mut self, notifying: bool) {
        if let Some(characteristic) = self.characteristic.as_mut() {
            characteristic.is_notifying = notifying;
        }
    }

    /// Check if notifications are active.
    pub fn is_notifying(&self) -> bool {
        self.characteristic
            .as_ref()
            .map(|c| c.is_notifying)
            .unwrap_or(false)
    }

    /// Mark that the local side requested the disconnect.
    pub fn mark_disconnect_requested(&mut self) {
        self.disconnect_requested = true;
    }

    /// Check if the local side requested the disconnect.
    pub fn disconnect_requested(&self) -> bool {
        self.disconnect_requested
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::uuids::{TARGET_CHARACTERISTIC_UUID, TARGET_SERVICE_UUID};

    #[test]
    fn test_connection_state() {
        assert!(!ConnectionState::Idle.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());
        assert!(ConnectionState::Connected.is_connected());
        assert!(ConnectionState::Ready.is_connected());
        assert!(!ConnectionState::Disconnected.is_connected());
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(format!("{}", ConnectionState::Ready), "Ready");
        assert_eq!(
            format!("{}", ConnectionState::DiscoveringServices),
            "Discovering services"
        );
    }

    #[test]
    fn test_session_lifecycle() {
        let mut session = Session::new(DeviceId::new("a"), None);
        assert_eq!(session.state(), ConnectionState::Connecting);
        assert!(session.targets(&DeviceId::new("a")));
        assert!(!session.targets(&DeviceId::new("b")));

        session.update_name(Some("Q 1234567890".into()));
        session.update_name(None);
        assert_eq!(session.name(), Some("Q 1234567890"));

        session.set_characteristic(CharacteristicRecord {
            uuid: TARGET_CHARACTERISTIC_UUID,
            service_uuid: TARGET_SERVICE_UUID,
            is_notifying: false,
        });
        assert!(!session.is_notifying());

        session.set_notifying(true);
        assert!(session.is_notifying());
    }
}
