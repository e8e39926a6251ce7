//! BLE communication module.
//!
//! This module provides the Bluetooth Low Energy building blocks for
//! discovering, connecting to, and bonding with Q devices.

pub mod adapter;
pub mod connection;
pub mod discovery;
pub mod monitor;
pub mod platform;
pub mod scanner;
pub mod subscription;
pub mod uuids;

pub use adapter::{
    event_channel, AdapterState, CharacteristicRecord, DeviceId, EventReceiver, EventSender,
    RadioAdapter, RadioEvent, RadioResult, ServiceRecord,
};
pub use connection::{ConnectionState, Session};
pub use discovery::ServiceDiscoverer;
pub use monitor::AdapterStateMonitor;
pub use platform::BtleplugAdapter;
pub use scanner::{DiscoveredDevice, Scanner};
pub use subscription::SubscriptionTrigger;
pub use uuids::*;
