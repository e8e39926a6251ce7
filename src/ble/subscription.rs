//! Notification subscription used to trigger bonding.
//!
//! The target characteristic requires an encrypted link, so enabling
//! notifications on it makes the platform start secure pairing. Values
//! delivered afterwards are logged and dropped.

use bytes::Bytes;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ble::adapter::{CharacteristicRecord, DeviceId, RadioAdapter, RadioResult};
use crate::ble::uuids::is_target_characteristic;
use crate::error::{Error, Result};

/// Subscribes to the target characteristic once it has been discovered.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionTrigger;

impl SubscriptionTrigger {
    /// Create a trigger for the target characteristic.
    pub fn new() -> Self {
        Self
    }

    /// Handle a characteristic discovery result.
    ///
    /// Returns the discovered characteristics that match the target.
    pub fn on_characteristics_discovered(
        &self,
        service: Uuid,
        result: RadioResult<Vec<CharacteristicRecord>>,
    ) -> Result<Vec<CharacteristicRecord>> {
        let characteristics =
            result.map_err(|reason| Error::CharacteristicDiscoveryFailed { reason })?;

        debug!(
            "Discovered {} characteristics for service {}",
            characteristics.len(),
            service
        );

        Ok(characteristics
            .into_iter()
            .inspect(|c| debug!("Characteristic: {}", c.uuid))
            .filter(|c| is_target_characteristic(&c.uuid))
            .collect())
    }

    /// Request notify-enable on a characteristic held by the session.
    pub async fn subscribe<A>(
        &self,
        adapter: &A,
        id: &DeviceId,
        characteristic: &CharacteristicRecord,
    ) -> Result<()>
    where
        A: RadioAdapter + ?Sized,
    {
        info!(
            "Enabling notifications on {} to trigger pairing",
            characteristic.uuid
        );

        adapter
            .set_notify(id, characteristic, true)
            .await
            .map_err(|e| Error::SubscriptionFailed {
                reason: e.to_string(),
            })
    }

    /// Handle a notify-state change and return the notifying flag.
    pub fn on_notification_state(
        &self,
        characteristic: Uuid,
        result: RadioResult<bool>,
    ) -> Result<bool> {
        let notifying = result.map_err(|reason| Error::SubscriptionFailed { reason })?;

        info!(
            "Notification state updated for {}. Is notifying: {}",
            characteristic, notifying
        );

        Ok(notifying)
    }

    /// Log a value received on a subscribed characteristic.
    pub fn on_value(&self, characteristic: Uuid, result: &RadioResult<Bytes>) {
        match result {
            Ok(value) => debug!(
                "Received {} bytes on characteristic {}",
                value.len(),
                characteristic
            ),
            Err(e) => warn!("Error reading characteristic {}: {}", characteristic, e),
        }
    }
}
