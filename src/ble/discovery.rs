//! GATT service discovery.
//!
//! Walks the services of a connected device looking for the target
//! service, then asks for exactly the target characteristic inside it.

use tracing::{debug, info, warn};

use crate::ble::adapter::{DeviceId, RadioAdapter, RadioResult, ServiceRecord};
use crate::ble::uuids::{is_target_service, TARGET_CHARACTERISTIC_UUID, TARGET_SERVICE_UUID};
use crate::error::{Error, Result};

/// Locates the target service/characteristic pair on a connected device.
#[derive(Debug, Clone, Default)]
pub struct ServiceDiscoverer;

impl ServiceDiscoverer {
    /// Create a discoverer for the target service.
    pub fn new() -> Self {
        Self
    }

    /// Request discovery of all services on `id`.
    pub async fn discover<A>(&self, adapter: &A, id: &DeviceId) -> Result<()>
    where
        A: RadioAdapter + ?Sized,
    {
        info!("Discovering services on {}", id);

        adapter
            .discover_services(id)
            .await
            .map_err(|e| Error::ServiceDiscoveryFailed {
                reason: e.to_string(),
            })
    }

    /// Handle a service discovery result.
    ///
    /// Requests characteristic discovery for every matching service and
    /// returns how many requests were issued.
    pub async fn on_services_discovered<A>(
        &self,
        adapter: &A,
        id: &DeviceId,
        result: RadioResult<Vec<ServiceRecord>>,
    ) -> Result<usize>
    where
        A: RadioAdapter + ?Sized,
    {
        let services = result.map_err(|reason| Error::ServiceDiscoveryFailed { reason })?;

        if services.is_empty() {
            info!("No services found on {}", id);
            return Ok(0);
        }

        let mut requested = 0;

        for service in &services {
            debug!("Service: {} (primary: {})", service.uuid, service.primary);

            if !is_target_service(&service.uuid) {
                continue;
            }

            info!("Discovering characteristics for target service {}", service.uuid);

            adapter
                .discover_characteristics(id, service.uuid, vec![TARGET_CHARACTERISTIC_UUID])
                .await
                .map_err(|e| Error::CharacteristicDiscoveryFailed {
                    reason: e.to_string(),
                })?;

            requested += 1;
        }

        if requested == 0 {
            warn!(
                "Target service {} not found among {} services on {}",
                TARGET_SERVICE_UUID,
                services.len(),
                id
            );
        }

        Ok(requested)
    }
}
