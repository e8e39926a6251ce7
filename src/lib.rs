// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # qpair-ble
//!
//! A Rust library that bonds a host with a COSMED Q spirometer over
//! Bluetooth Low Energy.
//!
//! Q devices advertise as `Q ` followed by a ten-digit serial number. Their
//! CSS Environment Measurement characteristic requires an encrypted link,
//! so subscribing to its notifications makes the platform start secure
//! pairing. That subscription is the whole point of this crate: values
//! delivered afterwards are logged and dropped.
//!
//! ## Features
//!
//! - **Device Discovery**: Scan and list Q devices by advertised name
//! - **Auto-connect**: Reconnect to a device already connected to the system
//! - **Pairing Trigger**: Discover the CSS service and subscribe to force bonding
//! - **Self-healing**: Scanning restarts immediately after any disconnect
//! - **Observable State**: Snapshot broadcasts for UI layers
//! - **Testable Core**: The radio is an injected [`RadioAdapter`] trait
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use qpair_ble::{PairingManager, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     // Scanning starts by itself once the adapter powers on
//!     let manager = PairingManager::new().await?;
//!
//!     tokio::time::sleep(std::time::Duration::from_secs(5)).await;
//!
//!     if let Some(device) = manager.devices().into_iter().next() {
//!         println!("Pairing with {:?}", device.name);
//!         manager.connect(device.id).await?;
//!     }
//!
//!     let mut updates = manager.subscribe();
//!     while let Ok(snapshot) = updates.recv().await {
//!         if snapshot.is_notifying {
//!             println!("Paired with {:?}", snapshot.connected_name);
//!             break;
//!         }
//!     }
//!
//!     manager.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS / iOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps. The pairing dialog is shown by the
//! system.
//!
//! ### Linux
//! Requires BlueZ with a registered pairing agent. User may need to be in
//! the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for data types

// Public modules
pub mod ble;
pub mod config;
pub mod controller;
pub mod error;
pub mod pairing_manager;
pub mod state;

// Re-exports for convenience
pub use config::PairingConfig;
pub use controller::{Command, ConnectionController};
pub use error::{Error, Result};
pub use pairing_manager::PairingManager;
pub use state::{CallbackHandle, SessionSnapshot, SessionStateStore};

// Re-export commonly used types from submodules
pub use ble::adapter::{
    AdapterState, CharacteristicRecord, DeviceId, RadioAdapter, RadioEvent, ServiceRecord,
};
pub use ble::connection::ConnectionState;
pub use ble::scanner::DiscoveredDevice;
pub use ble::uuids::{is_device_name, TARGET_CHARACTERISTIC_UUID, TARGET_SERVICE_UUID};
