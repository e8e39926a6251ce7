//! Connection lifecycle coordinator.
//!
//! [`ConnectionController`] consumes every adapter event and user command
//! in order and is the only owner of the scanner, the adapter-state monitor
//! and the session. After each step it publishes a fresh snapshot to the
//! [`SessionStateStore`].
//!
//! Lifecycle:
//!
//! ```text
//! Idle -> Scanning -> Connecting -> Connected -> DiscoveringServices
//!      -> DiscoveringCharacteristics -> Subscribing -> Ready
//! any -> Disconnected -> Scanning
//! ```

use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::ble::adapter::{
    AdapterState, CharacteristicRecord, DeviceId, RadioAdapter, RadioEvent, RadioResult,
    ServiceRecord,
};
use crate::ble::connection::{ConnectionState, Session};
use crate::ble::discovery::ServiceDiscoverer;
use crate::ble::monitor::AdapterStateMonitor;
use crate::ble::scanner::Scanner;
use crate::ble::subscription::SubscriptionTrigger;
use crate::config::PairingConfig;
use crate::error::{Error, Result};
use crate::state::{SessionSnapshot, SessionStateStore};

/// A request from the UI side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start scanning for devices.
    StartScanning,
    /// Stop scanning.
    StopScanning,
    /// Connect to a device.
    Connect(DeviceId),
    /// Disconnect the current session.
    Disconnect,
}

/// Drives the single pairing session.
pub struct ConnectionController {
    adapter: Arc<dyn RadioAdapter>,
    config: PairingConfig,
    monitor: AdapterStateMonitor,
    scanner: Scanner,
    discoverer: ServiceDiscoverer,
    trigger: SubscriptionTrigger,
    session: Option<Session>,
    /// Phase reported while no session exists.
    idle_state: ConnectionState,
    store: SessionStateStore,
}

impl ConnectionController {
    /// Create a controller over an adapter.
    pub fn new(
        adapter: Arc<dyn RadioAdapter>,
        config: PairingConfig,
        store: SessionStateStore,
    ) -> Self {
        Self {
            adapter,
            config,
            monitor: AdapterStateMonitor::new(),
            scanner: Scanner::new(),
            discoverer: ServiceDiscoverer::default(),
            trigger: SubscriptionTrigger::default(),
            session: None,
            idle_state: ConnectionState::Idle,
            store,
        }
    }

    /// Get the adapter.
    pub fn adapter(&self) -> &Arc<dyn RadioAdapter> {
        &self.adapter
    }

    /// Get the current lifecycle phase.
    pub fn state(&self) -> ConnectionState {
        self.session
            .as_ref()
            .map(|s| s.state())
            .unwrap_or(self.idle_state)
    }

    /// Get the active session.
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Get the scanner.
    pub fn scanner(&self) -> &Scanner {
        &self.scanner
    }

    /// Get the last reported adapter state.
    pub fn adapter_state(&self) -> AdapterState {
        self.monitor.state()
    }

    /// Execute a command, publishing the resulting state.
    pub async fn execute(&mut self, command: Command) -> Result<()> {
        let result = match command {
            Command::StartScanning => self.start_scanning().await,
            Command::StopScanning => self.stop_scanning().await,
            Command::Connect(id) => self.connect(id).await,
            Command::Disconnect => self.disconnect().await,
        };

        if let Err(ref e) = result {
            report(e);
        }

        self.publish();
        result
    }

    /// Start scanning, clearing the discovered list.
    pub async fn start_scanning(&mut self) -> Result<()> {
        self.scanner
            .start(&*self.adapter, self.monitor.state())
            .await?;

        if self.session.is_none() {
            self.idle_state = ConnectionState::Scanning;
        }
        self.publish();
        Ok(())
    }

    /// Stop scanning. Does nothing if not scanning.
    pub async fn stop_scanning(&mut self) -> Result<()> {
        self.scanner.stop(&*self.adapter).await?;

        if self.idle_state == ConnectionState::Scanning {
            self.idle_state = ConnectionState::Idle;
        }
        self.publish();
        Ok(())
    }

    /// Connect to a device, stopping any scan first.
    pub async fn connect(&mut self, id: DeviceId) -> Result<()> {
        self.monitor.ensure_powered_on()?;

        if let Err(e) = self.stop_scanning().await {
            warn!("Failed to stop scanning before connecting: {}", e);
        }

        if let Some(previous) = self.session.take() {
            if previous.state().is_connected() {
                warn!(
                    "Superseding established session with {} without disconnecting",
                    previous.device()
                );
            } else if !previous.targets(&id) {
                debug!("Cancelling pending connection to {}", previous.device());
                if let Err(e) = self.adapter.disconnect(previous.device()).await {
                    warn!("Failed to cancel connection to {}: {}", previous.device(), e);
                }
            }
        }

        let name = self.scanner.find(&id).and_then(|d| d.name.clone());
        info!(
            "Connecting to {}",
            name.as_deref().unwrap_or_else(|| id.as_str())
        );

        self.session = Some(Session::new(id.clone(), name));
        self.publish();

        if let Err(e) = self.adapter.connect(&id).await {
            let error = Error::ConnectFailed {
                reason: e.to_string(),
            };
            self.end_session().await;
            return Err(error);
        }

        Ok(())
    }

    /// Request cancellation of the current session. Does nothing without one.
    pub async fn disconnect(&mut self) -> Result<()> {
        let Some(session) = self.session.as_mut() else {
            debug!("No session, ignoring disconnect request");
            return Ok(());
        };

        session.mark_disconnect_requested();
        info!("Disconnecting from {}", session.device());

        let id = session.device().clone();
        self.adapter.disconnect(&id).await
    }

    /// Cancel the session and stop scanning before the event loop exits.
    pub async fn shutdown(&mut self) {
        info!("Shutting down pairing controller");

        if let Err(e) = self.disconnect().await {
            warn!("Error disconnecting during shutdown: {}", e);
        }
        if let Err(e) = self.stop_scanning().await {
            warn!("Error stopping scan during shutdown: {}", e);
        }
    }

    /// Process one adapter event, publishing the resulting state.
    pub async fn handle_event(&mut self, event: RadioEvent) {
        match event {
            RadioEvent::StateChanged(state) => self.on_adapter_state(state).await,
            RadioEvent::Advertisement { id, name, rssi } => {
                self.scanner.on_advertisement(id, name, rssi);
            }
            RadioEvent::Connected { id, name } => self.on_connected(id, name).await,
            RadioEvent::ConnectFailed { id, error } => self.on_connect_failed(id, error).await,
            RadioEvent::Disconnected { id, error } => self.on_disconnected(id, error).await,
            RadioEvent::ServicesDiscovered { id, result } => {
                self.on_services_discovered(id, result).await
            }
            RadioEvent::CharacteristicsDiscovered {
                id,
                service,
                result,
            } => self.on_characteristics_discovered(id, service, result).await,
            RadioEvent::NotificationStateChanged {
                id,
                characteristic,
                result,
            } => self.on_notification_state(id, characteristic, result),
            RadioEvent::ValueReceived {
                characteristic,
                result,
                ..
            } => self.trigger.on_value(characteristic, &result),
        }

        self.publish();
    }

    async fn on_adapter_state(&mut self, state: AdapterState) {
        let was_powered_on = self.monitor.is_powered_on();

        if !self.monitor.update(state) {
            self.drop_session();
            return;
        }

        if was_powered_on {
            debug!("Adapter already powered on, ignoring repeated state");
            return;
        }

        if let Err(e) = self.start_scanning().await {
            report(&e);
        }

        if !self.config.auto_connect_bonded {
            return;
        }

        match self.monitor.bonded_device(&*self.adapter).await {
            Ok(Some(id)) => {
                info!("Found already connected device {}", id);
                if let Err(e) = self.connect(id).await {
                    report(&e);
                }
            }
            Ok(None) => {}
            Err(e) => report(&e),
        }
    }

    async fn on_connected(&mut self, id: DeviceId, name: Option<String>) {
        let Some(session) = self.session.as_mut().filter(|s| s.targets(&id)) else {
            warn!("Connected to {} without a matching session, ignoring", id);
            return;
        };

        session.update_name(name);
        session.set_state(ConnectionState::Connected);
        info!(
            "Connected to device: {}",
            session.name().unwrap_or("Unknown")
        );

        match self.discoverer.discover(&*self.adapter, &id).await {
            Ok(()) => session.set_state(ConnectionState::DiscoveringServices),
            Err(e) => report(&e),
        }
    }

    async fn on_connect_failed(&mut self, id: DeviceId, error: Option<String>) {
        if !self.is_session_for(&id) {
            debug!("Ignoring connect failure for {} with no matching session", id);
            return;
        }

        self.fail(Error::ConnectFailed {
            reason: error.unwrap_or_else(|| "no error reported".to_string()),
        })
        .await;
    }

    async fn on_disconnected(&mut self, id: DeviceId, error: Option<String>) {
        let Some(session) = self.session.as_ref().filter(|s| s.targets(&id)) else {
            debug!("Ignoring disconnect of {} with no matching session", id);
            return;
        };

        // A late event from a previous link must not end a fresh attempt.
        if session.state() == ConnectionState::Connecting && !session.disconnect_requested() {
            debug!("Ignoring stale disconnect of {} while connecting", id);
            return;
        }

        if session.disconnect_requested() && error.is_none() {
            info!(
                "Disconnected from device: {}",
                session.name().unwrap_or("Unknown")
            );
            self.end_session().await;
        } else {
            self.fail(Error::UnexpectedDisconnect { cause: error }).await;
        }
    }

    async fn on_services_discovered(
        &mut self,
        id: DeviceId,
        result: RadioResult<Vec<ServiceRecord>>,
    ) {
        let Some(session) = self.session.as_mut().filter(|s| s.targets(&id)) else {
            debug!("Ignoring services of {} with no matching session", id);
            return;
        };

        match self
            .discoverer
            .on_services_discovered(&*self.adapter, &id, result)
            .await
        {
            Ok(0) => {}
            Ok(_) => session.set_state(ConnectionState::DiscoveringCharacteristics),
            Err(e) => report(&e),
        }
    }

    async fn on_characteristics_discovered(
        &mut self,
        id: DeviceId,
        service: Uuid,
        result: RadioResult<Vec<CharacteristicRecord>>,
    ) {
        let Some(session) = self.session.as_mut().filter(|s| s.targets(&id)) else {
            debug!("Ignoring characteristics of {} with no matching session", id);
            return;
        };

        let targets = match self.trigger.on_characteristics_discovered(service, result) {
            Ok(targets) => targets,
            Err(e) => {
                report(&e);
                return;
            }
        };

        if targets.is_empty() {
            warn!("Target characteristic not found in service {}", service);
            return;
        }

        for characteristic in targets {
            session.set_characteristic(characteristic.clone());

            match self
                .trigger
                .subscribe(&*self.adapter, &id, &characteristic)
                .await
            {
                Ok(()) => session.set_state(ConnectionState::Subscribing),
                Err(e) => report(&e),
            }
        }
    }

    fn on_notification_state(
        &mut self,
        id: DeviceId,
        characteristic: Uuid,
        result: RadioResult<bool>,
    ) {
        let Some(session) = self.session.as_mut().filter(|s| s.targets(&id)) else {
            debug!("Ignoring notify state of {} with no matching session", id);
            return;
        };

        let notifying = match self.trigger.on_notification_state(characteristic, result) {
            Ok(notifying) => notifying,
            Err(e) => {
                report(&e);
                return;
            }
        };

        if session.characteristic().map(|c| c.uuid) != Some(characteristic) {
            return;
        }

        session.set_notifying(notifying);
        if notifying {
            session.set_state(ConnectionState::Ready);
            info!("Notifications active on {}, device is paired", characteristic);
        }
    }

    fn is_session_for(&self, id: &DeviceId) -> bool {
        self.session.as_ref().map(|s| s.targets(id)).unwrap_or(false)
    }

    /// Report an error, ending the session if its kind requires it.
    async fn fail(&mut self, error: Error) {
        report(&error);

        if error.restarts_scan() {
            self.end_session().await;
        }
    }

    /// Tear down the session and restart scanning.
    async fn end_session(&mut self) {
        if let Some(session) = self.session.take() {
            debug!("Session with {} ended in {}", session.device(), session.state());
        }

        self.idle_state = ConnectionState::Disconnected;
        self.publish();

        if let Err(e) = self.start_scanning().await {
            report(&e);
        }
    }

    /// Forget the session once the adapter stops being usable. Scanning
    /// resumes on the next PoweredOn.
    fn drop_session(&mut self) {
        if let Some(session) = self.session.take() {
            warn!(
                "Adapter became {}, dropping session with {}",
                self.monitor.state(),
                session.device()
            );
            self.idle_state = ConnectionState::Disconnected;
        }
    }

    /// Build the externally visible snapshot.
    pub fn snapshot(&self) -> SessionSnapshot {
        let connected = self
            .session
            .as_ref()
            .filter(|s| s.state().is_connected());

        SessionSnapshot {
            adapter_state: self.monitor.state(),
            devices: self.scanner.discovered().to_vec(),
            is_scanning: self.scanner.is_scanning(),
            is_connected: connected.is_some(),
            connected_name: connected.and_then(|s| s.name().map(str::to_string)),
            connection_state: self.state(),
            is_notifying: self
                .session
                .as_ref()
                .map(|s| s.is_notifying())
                .unwrap_or(false),
        }
    }

    fn publish(&self) {
        self.store.publish(self.snapshot());
    }
}

/// Log an error at the level its kind warrants.
fn report(error: &Error) {
    match error {
        Error::AdapterUnavailable { .. }
        | Error::ConnectFailed { .. }
        | Error::UnexpectedDisconnect { .. } => warn!("{}", error),
        _ => error!("{}", error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::adapter::MockRadioAdapter;
    use crate::ble::uuids::{TARGET_CHARACTERISTIC_UUID, TARGET_SERVICE_UUID};
    use mockall::Sequence;
    use pretty_assertions::assert_eq;

    fn controller(adapter: MockRadioAdapter) -> ConnectionController {
        ConnectionController::new(
            Arc::new(adapter),
            PairingConfig::default(),
            SessionStateStore::default(),
        )
    }

    fn scanning_adapter() -> MockRadioAdapter {
        let mut adapter = MockRadioAdapter::new();
        adapter.expect_start_scan().returning(|| Ok(()));
        adapter.expect_stop_scan().returning(|| Ok(()));
        adapter
            .expect_connected_peripherals()
            .returning(|_| Ok(Vec::new()));
        adapter
    }

    async fn powered_on(controller: &mut ConnectionController) {
        controller
            .handle_event(RadioEvent::StateChanged(AdapterState::PoweredOn))
            .await;
    }

    /// Drive a fresh session up to the characteristic discovery request.
    async fn connect_and_find_service(controller: &mut ConnectionController, id: &DeviceId) {
        controller.connect(id.clone()).await.unwrap();
        controller
            .handle_event(RadioEvent::Connected {
                id: id.clone(),
                name: Some("Q 1234567890".into()),
            })
            .await;
        controller
            .handle_event(RadioEvent::ServicesDiscovered {
                id: id.clone(),
                result: Ok(vec![ServiceRecord {
                    uuid: TARGET_SERVICE_UUID,
                    primary: true,
                }]),
            })
            .await;
    }

    fn target_characteristic_found(id: &DeviceId) -> RadioEvent {
        RadioEvent::CharacteristicsDiscovered {
            id: id.clone(),
            service: TARGET_SERVICE_UUID,
            result: Ok(vec![CharacteristicRecord {
                uuid: TARGET_CHARACTERISTIC_UUID,
                service_uuid: TARGET_SERVICE_UUID,
                is_notifying: false,
            }]),
        }
    }

    fn pairing_adapter() -> MockRadioAdapter {
        let mut adapter = scanning_adapter();
        adapter.expect_connect().returning(|_| Ok(()));
        adapter.expect_discover_services().returning(|_| Ok(()));
        adapter
            .expect_discover_characteristics()
            .returning(|_, _, _| Ok(()));
        adapter
    }

    #[tokio::test]
    async fn test_connect_stops_scanning_first() {
        let mut adapter = MockRadioAdapter::new();
        let mut seq = Sequence::new();
        adapter
            .expect_start_scan()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));
        adapter
            .expect_connected_peripherals()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(Vec::new()));
        adapter
            .expect_stop_scan()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));
        adapter
            .expect_connect()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let mut controller = controller(adapter);
        powered_on(&mut controller).await;
        assert!(controller.scanner().is_scanning());

        controller.connect(DeviceId::new("dev")).await.unwrap();

        assert!(!controller.scanner().is_scanning());
        assert_eq!(controller.state(), ConnectionState::Connecting);
    }

    #[tokio::test]
    async fn test_connect_requires_powered_on() {
        let mut adapter = MockRadioAdapter::new();
        adapter.expect_connect().never();

        let mut controller = controller(adapter);
        let result = controller.connect(DeviceId::new("dev")).await;

        assert!(matches!(result, Err(Error::AdapterUnavailable { .. })));
        assert!(controller.session().is_none());
    }

    #[tokio::test]
    async fn test_connect_request_error_restarts_scan() {
        let mut adapter = scanning_adapter();
        adapter.expect_connect().returning(|id| {
            Err(Error::DeviceNotFound {
                identifier: id.to_string(),
            })
        });

        let mut controller = controller(adapter);
        powered_on(&mut controller).await;

        let result = controller.connect(DeviceId::new("gone")).await;

        assert!(matches!(result, Err(Error::ConnectFailed { .. })));
        assert!(controller.session().is_none());
        assert!(controller.scanner().is_scanning());
        assert_eq!(controller.state(), ConnectionState::Scanning);
    }

    #[tokio::test]
    async fn test_full_pairing_flow() {
        let mut adapter = scanning_adapter();
        adapter.expect_connect().times(1).returning(|_| Ok(()));
        adapter
            .expect_discover_services()
            .times(1)
            .returning(|_| Ok(()));
        adapter
            .expect_discover_characteristics()
            .times(1)
            .returning(|_, _, _| Ok(()));
        adapter
            .expect_set_notify()
            .times(1)
            .returning(|_, _, _| Ok(()));

        let mut controller = controller(adapter);
        powered_on(&mut controller).await;

        let id = DeviceId::new("dev");
        controller
            .handle_event(RadioEvent::Advertisement {
                id: id.clone(),
                name: Some("Q 1234567890".into()),
                rssi: Some(-55),
            })
            .await;

        controller.connect(id.clone()).await.unwrap();

        controller
            .handle_event(RadioEvent::Connected {
                id: id.clone(),
                name: None,
            })
            .await;
        assert_eq!(controller.state(), ConnectionState::DiscoveringServices);

        let snapshot = controller.snapshot();
        assert!(snapshot.is_connected);
        assert_eq!(snapshot.connected_name.as_deref(), Some("Q 1234567890"));

        controller
            .handle_event(RadioEvent::ServicesDiscovered {
                id: id.clone(),
                result: Ok(vec![ServiceRecord {
                    uuid: TARGET_SERVICE_UUID,
                    primary: true,
                }]),
            })
            .await;
        assert_eq!(
            controller.state(),
            ConnectionState::DiscoveringCharacteristics
        );

        controller
            .handle_event(RadioEvent::CharacteristicsDiscovered {
                id: id.clone(),
                service: TARGET_SERVICE_UUID,
                result: Ok(vec![CharacteristicRecord {
                    uuid: TARGET_CHARACTERISTIC_UUID,
                    service_uuid: TARGET_SERVICE_UUID,
                    is_notifying: false,
                }]),
            })
            .await;
        assert_eq!(controller.state(), ConnectionState::Subscribing);

        controller
            .handle_event(RadioEvent::NotificationStateChanged {
                id: id.clone(),
                characteristic: TARGET_CHARACTERISTIC_UUID,
                result: Ok(true),
            })
            .await;

        assert_eq!(controller.state(), ConnectionState::Ready);
        assert!(controller.snapshot().is_notifying);
    }

    #[tokio::test]
    async fn test_service_discovery_failure_keeps_session() {
        let mut adapter = scanning_adapter();
        adapter.expect_connect().returning(|_| Ok(()));
        adapter.expect_discover_services().returning(|_| Ok(()));
        adapter.expect_disconnect().never();

        let mut controller = controller(adapter);
        powered_on(&mut controller).await;

        let id = DeviceId::new("dev");
        controller.connect(id.clone()).await.unwrap();
        controller
            .handle_event(RadioEvent::Connected {
                id: id.clone(),
                name: Some("Q 1234567890".into()),
            })
            .await;
        controller
            .handle_event(RadioEvent::ServicesDiscovered {
                id,
                result: Err("GATT error".into()),
            })
            .await;

        assert_eq!(controller.state(), ConnectionState::DiscoveringServices);
        assert!(controller.snapshot().is_connected);
        assert!(!controller.scanner().is_scanning());
    }

    #[tokio::test]
    async fn test_disconnect_without_session_is_noop() {
        let mut adapter = MockRadioAdapter::new();
        adapter.expect_disconnect().never();

        let mut controller = controller(adapter);
        controller.disconnect().await.unwrap();
        assert_eq!(controller.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_events_for_other_devices_ignored() {
        let mut adapter = scanning_adapter();
        adapter.expect_connect().returning(|_| Ok(()));
        adapter.expect_discover_services().never();

        let mut controller = controller(adapter);
        powered_on(&mut controller).await;

        controller.connect(DeviceId::new("dev")).await.unwrap();
        controller
            .handle_event(RadioEvent::Connected {
                id: DeviceId::new("stranger"),
                name: None,
            })
            .await;
        controller
            .handle_event(RadioEvent::Disconnected {
                id: DeviceId::new("stranger"),
                error: None,
            })
            .await;

        assert_eq!(controller.state(), ConnectionState::Connecting);
    }

    #[tokio::test]
    async fn test_superseding_pending_connect_cancels_it() {
        let mut adapter = scanning_adapter();
        adapter.expect_connect().times(2).returning(|_| Ok(()));
        adapter
            .expect_disconnect()
            .withf(|id| id.as_str() == "first")
            .times(1)
            .returning(|_| Ok(()));

        let mut controller = controller(adapter);
        powered_on(&mut controller).await;

        controller.connect(DeviceId::new("first")).await.unwrap();
        controller.connect(DeviceId::new("second")).await.unwrap();

        let session = controller.session().unwrap();
        assert_eq!(session.device(), &DeviceId::new("second"));
    }

    #[tokio::test]
    async fn test_powered_off_disallows_scanning() {
        let mut adapter = MockRadioAdapter::new();
        adapter.expect_start_scan().never();
        adapter.expect_connected_peripherals().never();

        let mut controller = controller(adapter);
        controller
            .handle_event(RadioEvent::StateChanged(AdapterState::PoweredOff))
            .await;

        assert_eq!(controller.adapter_state(), AdapterState::PoweredOff);
        assert!(matches!(
            controller.execute(Command::StartScanning).await,
            Err(Error::AdapterUnavailable { .. })
        ));
        assert!(!controller.scanner().is_scanning());
    }

    #[tokio::test]
    async fn test_power_cycle_drops_session_and_rescans() {
        let mut adapter = MockRadioAdapter::new();
        adapter.expect_start_scan().times(2).returning(|| Ok(()));
        adapter.expect_stop_scan().returning(|| Ok(()));
        adapter
            .expect_connected_peripherals()
            .times(2)
            .returning(|_| Ok(Vec::new()));
        adapter.expect_connect().times(1).returning(|_| Ok(()));
        adapter.expect_discover_services().returning(|_| Ok(()));
        adapter.expect_disconnect().never();

        let mut controller = controller(adapter);
        powered_on(&mut controller).await;

        let id = DeviceId::new("dev");
        controller.connect(id.clone()).await.unwrap();
        controller
            .handle_event(RadioEvent::Connected {
                id,
                name: Some("Q 1234567890".into()),
            })
            .await;
        assert!(controller.snapshot().is_connected);

        controller
            .handle_event(RadioEvent::StateChanged(AdapterState::PoweredOff))
            .await;

        let snapshot = controller.snapshot();
        assert!(controller.session().is_none());
        assert!(!snapshot.is_connected);
        assert_eq!(snapshot.connected_name, None);
        assert!(!snapshot.is_notifying);
        assert!(!snapshot.is_scanning);
        assert_eq!(snapshot.connection_state, ConnectionState::Disconnected);

        powered_on(&mut controller).await;

        assert!(controller.scanner().is_scanning());
        assert_eq!(controller.state(), ConnectionState::Scanning);
    }

    #[tokio::test]
    async fn test_repeated_powered_on_is_ignored() {
        let mut adapter = MockRadioAdapter::new();
        adapter.expect_start_scan().times(1).returning(|| Ok(()));
        adapter
            .expect_connected_peripherals()
            .times(1)
            .returning(|_| Ok(Vec::new()));

        let mut controller = controller(adapter);
        powered_on(&mut controller).await;
        powered_on(&mut controller).await;

        assert!(controller.scanner().is_scanning());
    }

    #[tokio::test]
    async fn test_late_disconnect_keeps_new_attempt() {
        let mut adapter = scanning_adapter();
        adapter.expect_connect().times(2).returning(|_| Ok(()));
        adapter.expect_discover_services().returning(|_| Ok(()));
        adapter.expect_disconnect().times(1).returning(|_| Ok(()));

        let mut controller = controller(adapter);
        powered_on(&mut controller).await;

        let id = DeviceId::new("dev");
        controller.connect(id.clone()).await.unwrap();
        controller
            .handle_event(RadioEvent::Connected {
                id: id.clone(),
                name: None,
            })
            .await;

        controller.disconnect().await.unwrap();
        controller
            .handle_event(RadioEvent::Disconnected {
                id: id.clone(),
                error: None,
            })
            .await;
        assert!(controller.session().is_none());
        assert!(controller.scanner().is_scanning());

        controller.connect(id.clone()).await.unwrap();
        controller
            .handle_event(RadioEvent::Disconnected {
                id: id.clone(),
                error: None,
            })
            .await;

        assert_eq!(controller.state(), ConnectionState::Connecting);
        assert!(controller.session().is_some_and(|s| s.targets(&id)));
        assert!(!controller.scanner().is_scanning());
    }

    #[tokio::test]
    async fn test_characteristic_discovery_failure_keeps_session() {
        let mut adapter = pairing_adapter();
        adapter.expect_set_notify().never();
        adapter.expect_disconnect().never();

        let mut controller = controller(adapter);
        powered_on(&mut controller).await;

        let id = DeviceId::new("dev");
        connect_and_find_service(&mut controller, &id).await;
        controller
            .handle_event(RadioEvent::CharacteristicsDiscovered {
                id,
                service: TARGET_SERVICE_UUID,
                result: Err("attribute not found".into()),
            })
            .await;

        assert_eq!(
            controller.state(),
            ConnectionState::DiscoveringCharacteristics
        );
        assert!(controller.snapshot().is_connected);
        assert!(!controller.scanner().is_scanning());
    }

    #[tokio::test]
    async fn test_characteristic_held_when_subscribe_request_fails() {
        let mut adapter = pairing_adapter();
        adapter
            .expect_set_notify()
            .times(1)
            .returning(|_, _, _| Err(Error::Internal("characteristic not discovered".into())));
        adapter.expect_disconnect().never();

        let mut controller = controller(adapter);
        powered_on(&mut controller).await;

        let id = DeviceId::new("dev");
        connect_and_find_service(&mut controller, &id).await;
        controller
            .handle_event(target_characteristic_found(&id))
            .await;

        let session = controller.session().unwrap();
        assert_eq!(
            session.characteristic().map(|c| c.uuid),
            Some(TARGET_CHARACTERISTIC_UUID)
        );
        assert_eq!(session.state(), ConnectionState::DiscoveringCharacteristics);
    }

    #[tokio::test]
    async fn test_subscription_failure_keeps_state() {
        let mut adapter = pairing_adapter();
        adapter.expect_set_notify().returning(|_, _, _| Ok(()));
        adapter.expect_disconnect().never();

        let mut controller = controller(adapter);
        powered_on(&mut controller).await;

        let id = DeviceId::new("dev");
        connect_and_find_service(&mut controller, &id).await;
        controller
            .handle_event(target_characteristic_found(&id))
            .await;
        controller
            .handle_event(RadioEvent::NotificationStateChanged {
                id,
                characteristic: TARGET_CHARACTERISTIC_UUID,
                result: Err("insufficient authentication".into()),
            })
            .await;

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.connection_state, ConnectionState::Subscribing);
        assert!(snapshot.is_connected);
        assert!(!snapshot.is_notifying);
        assert!(!snapshot.is_scanning);
    }

    #[tokio::test]
    async fn test_not_notifying_does_not_reach_ready() {
        let mut adapter = pairing_adapter();
        adapter.expect_set_notify().returning(|_, _, _| Ok(()));

        let mut controller = controller(adapter);
        powered_on(&mut controller).await;

        let id = DeviceId::new("dev");
        connect_and_find_service(&mut controller, &id).await;
        controller
            .handle_event(target_characteristic_found(&id))
            .await;
        controller
            .handle_event(RadioEvent::NotificationStateChanged {
                id,
                characteristic: TARGET_CHARACTERISTIC_UUID,
                result: Ok(false),
            })
            .await;

        assert_eq!(controller.state(), ConnectionState::Subscribing);
        assert!(!controller.snapshot().is_notifying);
    }
}
