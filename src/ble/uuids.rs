//! BLE Service and Characteristic UUIDs.
//!
//! Contains the fixed identifiers of the Q spirometer pairing target and
//! the advertised-name filter used during discovery.

use uuid::Uuid;

// Cosmed Spirometry Service (CSS)
/// CSS primary service UUID.
pub const TARGET_SERVICE_UUID: Uuid = Uuid::from_u128(0xb381_fcca_142a_4b9b_ba1f_af6a3ea715c7);
/// CSS Environment Measurement characteristic UUID (Notify, encryption required).
pub const TARGET_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0xb381_0002_142a_4b9b_ba1f_af6a3ea715c7);

/// Literal prefix of every advertised Q device name.
pub const DEVICE_NAME_PREFIX: &str = "Q ";
/// Number of ASCII digits that follow the prefix.
pub const DEVICE_SERIAL_DIGITS: usize = 10;

/// Check if an advertised name fully matches `^Q \d{10}$`.
pub fn is_device_name(name: &str) -> bool {
    name.strip_prefix(DEVICE_NAME_PREFIX)
        .map(|serial| {
            serial.len() == DEVICE_SERIAL_DIGITS && serial.bytes().all(|b| b.is_ascii_digit())
        })
        .unwrap_or(false)
}

/// Check if a service UUID is the pairing target service.
pub fn is_target_service(uuid: &Uuid) -> bool {
    *uuid == TARGET_SERVICE_UUID
}

/// Check if a characteristic UUID is the pairing target characteristic.
pub fn is_target_characteristic(uuid: &Uuid) -> bool {
    *uuid == TARGET_CHARACTERISTIC_UUID
}
