//! Common types for the transport layer

use serde::Serialize;

/// Sensor class reported in an alarm record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    /// Contact switch (door/window)
    Switch,
    /// Motion sensor
    Motion,
    /// Unrecognized sensor class
    Unknown,
}

impl SensorKind {
    pub fn from_code(code: u8) -> Self {
        match code {
            0x01 => Self::Switch,
            0x02 => Self::Motion,
            _ => Self::Unknown,
        }
    }
}

/// Physical state carried by an alarm record, interpreted per sensor kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorState {
    Open,
    Close,
    Active,
    Inactive,
    Unknown,
}

impl SensorState {
    /// Map the raw state byte through the sensor kind.
    pub fn from_raw(kind: SensorKind, raw: u8) -> Self {
        match kind {
            SensorKind::Switch => {
                if raw == 1 {
                    Self::Open
                } else {
                    Self::Close
                }
            }
            SensorKind::Motion => {
                if raw == 1 {
                    Self::Active
                } else {
                    Self::Inactive
                }
            }
            SensorKind::Unknown => Self::Unknown,
        }
    }
}

/// A decoded sensor alarm notification.
///
/// Produced on the reader thread and handed to the user event callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SensorEvent {
    /// 8-character ASCII sensor address
    pub mac: String,
    /// Absolute event time, milliseconds since the Unix epoch
    pub timestamp_ms: u64,
    pub kind: SensorKind,
    pub state: SensorState,
    /// Battery charge, 0-100
    pub battery_percent: u8,
    /// Signed received signal strength
    pub signal_strength: i8,
}

impl std::fmt::Display for SensorEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}ms][{}] kind={:?}, state={:?}, battery={}%, signal={}",
            self.timestamp_ms,
            self.mac,
            self.kind,
            self.state,
            self.battery_percent,
            self.signal_strength
        )
    }
}

/// A sensor announced during a pairing scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredSensor {
    /// 8-character ASCII sensor address
    pub mac: String,
    /// Raw sensor class code as announced
    pub kind_code: u8,
    /// Sensor firmware version byte
    pub version: u8,
}

/// A decoded dongle event-log notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventLog {
    /// Log record time, milliseconds since the Unix epoch
    pub timestamp_ms: u64,
    /// Opaque log bytes as reported by the dongle
    pub message: Vec<u8>,
}
