//! `btleplug` implementation of [`RadioAdapter`].
//!
//! Every request is issued on a spawned task and its outcome is posted to
//! the event queue, so callers never wait on the radio.

use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use bytes::Bytes;
use futures::stream::StreamExt;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::ble::adapter::{
    AdapterState, CharacteristicRecord, DeviceId, EventSender, RadioAdapter, RadioEvent,
    ServiceRecord,
};
use crate::ble::uuids::is_device_name;
use crate::error::{Error, Result};

type PeripheralCache = Arc<RwLock<HashMap<DeviceId, Peripheral>>>;
type ListenerMap = Arc<Mutex<HashMap<DeviceId, JoinHandle<()>>>>;

/// Radio adapter backed by the platform Bluetooth stack.
pub struct BtleplugAdapter {
    /// The BLE adapter in use.
    adapter: Adapter,
    /// Queue that receives every outcome.
    events: EventSender,
    /// Q peripherals seen since the last scan started, by identity.
    peripherals: PeripheralCache,
    /// Notification listener tasks, one per subscribed device.
    listeners: ListenerMap,
    /// Handle to the central event task.
    event_handle: RwLock<Option<JoinHandle<()>>>,
}

impl BtleplugAdapter {
    /// Open the first Bluetooth adapter and start forwarding its events.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new(events: EventSender) -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Self::with_adapter(adapter, events).await
    }

    /// Wrap a specific adapter and start forwarding its events.
    pub async fn with_adapter(adapter: Adapter, events: EventSender) -> Result<Self> {
        let mut central_events = adapter.events().await.map_err(Error::Bluetooth)?;

        let peripherals: PeripheralCache = Arc::new(RwLock::new(HashMap::new()));
        let listeners: ListenerMap = Arc::new(Mutex::new(HashMap::new()));

        let task_adapter = adapter.clone();
        let task_events = events.clone();
        let task_peripherals = peripherals.clone();
        let task_listeners = listeners.clone();

        let handle = tokio::spawn(async move {
            while let Some(event) = central_events.next().await {
                Self::handle_central_event(
                    event,
                    &task_adapter,
                    &task_events,
                    &task_peripherals,
                    &task_listeners,
                )
                .await;
            }

            debug!("Central event loop ended");
        });

        Ok(Self {
            adapter,
            events,
            peripherals,
            listeners,
            event_handle: RwLock::new(Some(handle)),
        })
    }

    /// Translate a central event into radio events.
    async fn handle_central_event(
        event: CentralEvent,
        adapter: &Adapter,
        events: &EventSender,
        peripherals: &PeripheralCache,
        listeners: &ListenerMap,
    ) {
        match event {
            CentralEvent::DeviceDiscovered(id) => {
                trace!("Device discovered: {:?}", id);
                Self::report_advertisement(adapter, id, events, peripherals).await;
            }
            CentralEvent::DeviceUpdated(id) => {
                trace!("Device updated: {:?}", id);
                Self::report_advertisement(adapter, id, events, peripherals).await;
            }
            CentralEvent::DeviceConnected(id) => {
                debug!("Device connected: {:?}", id);
            }
            CentralEvent::DeviceDisconnected(id) => {
                debug!("Device disconnected: {:?}", id);
                let id = DeviceId::from(&id);
                if let Some(listener) = listeners.lock().remove(&id) {
                    listener.abort();
                }
                let _ = events.send(RadioEvent::Disconnected { id, error: None });
            }
            CentralEvent::StateUpdate(state) => {
                let _ = events.send(RadioEvent::StateChanged(state.into()));
            }
            CentralEvent::ManufacturerDataAdvertisement { .. } => {}
            CentralEvent::ServiceDataAdvertisement { .. } => {}
            CentralEvent::ServicesAdvertisement { .. } => {}
        }
    }

    /// Look up a peripheral's advertised properties and post them.
    async fn report_advertisement(
        adapter: &Adapter,
        id: PeripheralId,
        events: &EventSender,
        peripherals: &PeripheralCache,
    ) {
        let peripheral = match adapter.peripheral(&id).await {
            Ok(p) => p,
            Err(e) => {
                trace!("Failed to get peripheral: {}", e);
                return;
            }
        };

        let properties = match peripheral.properties().await {
            Ok(Some(p)) => p,
            _ => return,
        };

        let device_id = DeviceId::from(&id);
        if is_cacheable(properties.local_name.as_deref()) {
            peripherals.write().insert(device_id.clone(), peripheral);
        }

        let _ = events.send(RadioEvent::Advertisement {
            id: device_id,
            name: properties.local_name,
            rssi: properties.rssi,
        });
    }

    /// Resolve an identity to a peripheral, refreshing the cache on a miss.
    async fn peripheral(&self, id: &DeviceId) -> Result<Peripheral> {
        if let Some(peripheral) = self.peripherals.read().get(id).cloned() {
            return Ok(peripheral);
        }

        let peripherals = self.adapter.peripherals().await.map_err(Error::Bluetooth)?;
        let found = peripherals
            .into_iter()
            .find(|p| DeviceId::from(&p.id()) == *id)
            .ok_or_else(|| Error::DeviceNotFound {
                identifier: id.to_string(),
            })?;

        self.peripherals.write().insert(id.clone(), found.clone());
        Ok(found)
    }

    /// Forward notification values from a device until it disconnects.
    fn start_notification_listener(&self, id: &DeviceId, peripheral: Peripheral) {
        let mut listeners = self.listeners.lock();
        if listeners.contains_key(id) {
            return;
        }

        let events = self.events.clone();
        let device_id = id.clone();

        let handle = tokio::spawn(async move {
            let mut notifications = match peripheral.notifications().await {
                Ok(n) => n,
                Err(e) => {
                    error!("Failed to get notifications stream: {}", e);
                    return;
                }
            };

            while let Some(notification) = notifications.next().await {
                let _ = events.send(RadioEvent::ValueReceived {
                    id: device_id.clone(),
                    characteristic: notification.uuid,
                    result: Ok(Bytes::from(notification.value)),
                });
            }

            debug!("Notification listener for {} stopped", device_id);
        });

        listeners.insert(id.clone(), handle);
    }
}

#[async_trait::async_trait]
impl RadioAdapter for BtleplugAdapter {
    async fn state(&self) -> Result<AdapterState> {
        let state = self.adapter.adapter_state().await.map_err(Error::Bluetooth)?;
        Ok(state.into())
    }

    async fn start_scan(&self) -> Result<()> {
        evict_unsubscribed(&mut self.peripherals.write(), &self.listeners.lock());

        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(Error::Bluetooth)
    }

    async fn stop_scan(&self) -> Result<()> {
        self.adapter.stop_scan().await.map_err(Error::Bluetooth)
    }

    async fn connected_peripherals(&self, service: Uuid) -> Result<Vec<DeviceId>> {
        let peripherals = self.adapter.peripherals().await.map_err(Error::Bluetooth)?;
        let mut found = Vec::new();

        for peripheral in peripherals {
            if !peripheral.is_connected().await.unwrap_or(false) {
                continue;
            }

            let exposes_service = match peripheral.properties().await {
                Ok(Some(properties)) => properties.services.contains(&service),
                Ok(None) => false,
                Err(e) => {
                    warn!("Could not query peripheral for properties: {}", e);
                    false
                }
            };

            if exposes_service {
                let id = DeviceId::from(&peripheral.id());
                self.peripherals.write().insert(id.clone(), peripheral);
                found.push(id);
            }
        }

        Ok(found)
    }

    async fn connect(&self, id: &DeviceId) -> Result<()> {
        let peripheral = self.peripheral(id).await?;
        let events = self.events.clone();
        let id = id.clone();

        tokio::spawn(async move {
            match peripheral.connect().await {
                Ok(()) => {
                    let name = peripheral
                        .properties()
                        .await
                        .ok()
                        .flatten()
                        .and_then(|p| p.local_name);
                    let _ = events.send(RadioEvent::Connected { id, name });
                }
                Err(e) => {
                    let _ = events.send(RadioEvent::ConnectFailed {
                        id,
                        error: Some(e.to_string()),
                    });
                }
            }
        });

        Ok(())
    }

    async fn disconnect(&self, id: &DeviceId) -> Result<()> {
        let peripheral = self.peripheral(id).await?;
        let id = id.clone();

        // The outcome arrives as a DeviceDisconnected central event.
        tokio::spawn(async move {
            if let Err(e) = peripheral.disconnect().await {
                warn!("Failed to disconnect from {}: {}", id, e);
            }
        });

        Ok(())
    }

    async fn discover_services(&self, id: &DeviceId) -> Result<()> {
        let peripheral = self.peripheral(id).await?;
        let events = self.events.clone();
        let id = id.clone();

        tokio::spawn(async move {
            let result = match peripheral.discover_services().await {
                Ok(()) => Ok(peripheral
                    .services()
                    .into_iter()
                    .map(|s| ServiceRecord {
                        uuid: s.uuid,
                        primary: s.primary,
                    })
                    .collect()),
                Err(e) => Err(e.to_string()),
            };

            let _ = events.send(RadioEvent::ServicesDiscovered { id, result });
        });

        Ok(())
    }

    async fn discover_characteristics(
        &self,
        id: &DeviceId,
        service: Uuid,
        characteristics: Vec<Uuid>,
    ) -> Result<()> {
        let peripheral = self.peripheral(id).await?;

        // btleplug walks characteristics during service discovery, so this
        // filters the cached tree instead of issuing another radio request.
        let result = peripheral
            .services()
            .into_iter()
            .find(|s| s.uuid == service)
            .map(|s| {
                s.characteristics
                    .into_iter()
                    .filter(|c| characteristics.contains(&c.uuid))
                    .map(|c| CharacteristicRecord {
                        uuid: c.uuid,
                        service_uuid: c.service_uuid,
                        is_notifying: false,
                    })
                    .collect()
            })
            .ok_or_else(|| format!("service {} not present", service));

        let _ = self.events.send(RadioEvent::CharacteristicsDiscovered {
            id: id.clone(),
            service,
            result,
        });

        Ok(())
    }

    async fn set_notify(
        &self,
        id: &DeviceId,
        characteristic: &CharacteristicRecord,
        enabled: bool,
    ) -> Result<()> {
        let peripheral = self.peripheral(id).await?;

        let target = peripheral
            .characteristics()
            .into_iter()
            .find(|c| {
                c.uuid == characteristic.uuid && c.service_uuid == characteristic.service_uuid
            })
            .ok_or_else(|| {
                Error::Internal(format!(
                    "characteristic {} not discovered",
                    characteristic.uuid
                ))
            })?;

        debug!(
            "Found characteristic {}, properties: {:?}",
            target.uuid, target.properties
        );

        if enabled {
            self.start_notification_listener(id, peripheral.clone());
        }

        let events = self.events.clone();
        let id = id.clone();

        tokio::spawn(async move {
            let outcome = if enabled {
                peripheral.subscribe(&target).await
            } else {
                peripheral.unsubscribe(&target).await
            };

            let _ = events.send(RadioEvent::NotificationStateChanged {
                id,
                characteristic: target.uuid,
                result: outcome.map(|()| enabled).map_err(|e| e.to_string()),
            });
        });

        Ok(())
    }
}

/// Check if an advertised peripheral belongs in the cache.
fn is_cacheable(name: Option<&str>) -> bool {
    name.is_some_and(is_device_name)
}

/// Drop cached entries for devices without a notification listener.
fn evict_unsubscribed<P, L>(
    cache: &mut HashMap<DeviceId, P>,
    listeners: &HashMap<DeviceId, L>,
) {
    cache.retain(|id, _| listeners.contains_key(id));
}

impl Drop for BtleplugAdapter {
    fn drop(&mut self) {
        if let Some(handle) = self.event_handle.write().take() {
            handle.abort();
        }
        for (_, listener) in self.listeners.lock().drain() {
            listener.abort();
        }
    }
}
