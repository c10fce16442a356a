//! Polled device state.

use chrono::NaiveDateTime;

use crate::types::PeerAddress;

/// Firmware string reported before the peripheral answers.
pub const UNKNOWN_FIRMWARE: &str = "unknown";

/// Two-integer settings tuple stored on the peripheral.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Settings(pub i32, pub i32);

/// Three-axis reading.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// One motion sensor sample.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ImuSample {
    /// Linear acceleration.
    pub acceleration: Vector3,
    /// Angular rate.
    pub gyro: Vector3,
}

/// Snapshot of everything known about one peripheral.
///
/// The `*_changed` flags stay set until the consumer acknowledges them
/// through the session.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceState {
    /// Stable peer address.
    pub address: PeerAddress,
    /// Advertised name.
    pub name: String,
    /// Whether the peripheral has pinged since connecting.
    pub connected: bool,
    /// Last peripheral clock reading.
    pub clock: Option<NaiveDateTime>,
    /// Set whenever `clock` is updated.
    pub clock_changed: bool,
    /// Alarm time configured on the peripheral.
    pub alarm: Option<NaiveDateTime>,
    /// Battery level as reported.
    pub battery: u8,
    /// Firmware version string.
    pub firmware: String,
    /// Settings tuple.
    pub settings: Settings,
    /// Set whenever `settings` is updated.
    pub settings_changed: bool,
    /// Last motion sensor sample.
    pub imu: ImuSample,
}

impl DeviceState {
    /// Creates the initial state of a freshly discovered peripheral.
    #[must_use]
    pub fn new(address: PeerAddress, name: impl Into<String>) -> Self {
        Self {
            address,
            name: name.into(),
            connected: false,
            clock: None,
            clock_changed: true,
            alarm: None,
            battery: 0,
            firmware: UNKNOWN_FIRMWARE.to_owned(),
            settings: Settings::default(),
            settings_changed: true,
            imu: ImuSample::default(),
        }
    }
}
