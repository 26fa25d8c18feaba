//! Decoding of dongle-initiated notification payloads
//!
//! Pure payload-to-struct decoding; the dispatcher decides what to do with
//! the result (user callback, log line, pairing state).

use zerocopy::byteorder::{BigEndian, U64};
use zerocopy::{FromBytes, Immutable, KnownLayout, Unaligned};

use crate::types::{DiscoveredSensor, EventLog, SensorEvent, SensorKind, SensorState};

/// Fixed prefix of a NOTIFY_SENSOR_ALARM payload, before the alarm record.
#[derive(FromBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct AlarmHeader {
    timestamp_ms: U64<BigEndian>,
    _reserved: u8,
    mac: [u8; 8],
}

/// Offsets within the variable-length alarm record
mod record {
    /// Sensor class: 0x01 switch, 0x02 motion
    pub const KIND: usize = 0;
    /// Battery percentage
    pub const BATTERY: usize = 2;
    /// Physical state, 1/0 mapped per sensor class
    pub const STATE: usize = 5;
    /// Signed signal strength
    pub const SIGNAL: usize = 8;
}

/// Sensor announcement payload length (reserved byte, MAC, type, version)
const SCAN_PAYLOAD_LEN: usize = 11;
/// Event-log payloads carry an 8-byte timestamp and a length byte at minimum
const EVENT_LOG_MIN_LEN: usize = 9;

fn record_byte(rec: &[u8], offset: usize) -> u8 {
    rec.get(offset).copied().unwrap_or(0)
}

/// Decode a `NOTIFY_SENSOR_ALARM` payload.
///
/// Payloads shorter than the 17-byte header plus one record byte are not
/// decodable and yield `None`. Record bytes past the end read as zero.
pub fn parse_sensor_alarm(payload: &[u8]) -> Option<SensorEvent> {
    let (header, rec) = AlarmHeader::ref_from_prefix(payload).ok()?;
    if rec.is_empty() {
        return None;
    }

    let kind = SensorKind::from_code(record_byte(rec, record::KIND));
    Some(SensorEvent {
        mac: String::from_utf8_lossy(&header.mac).into_owned(),
        timestamp_ms: header.timestamp_ms.get(),
        kind,
        state: SensorState::from_raw(kind, record_byte(rec, record::STATE)),
        battery_percent: record_byte(rec, record::BATTERY),
        signal_strength: record_byte(rec, record::SIGNAL) as i8,
    })
}

/// Decode a `NOTIFY_SENSOR_SCAN` payload: `[reserved, mac[8], type, version]`.
pub fn parse_scan_announcement(payload: &[u8]) -> Option<DiscoveredSensor> {
    if payload.len() != SCAN_PAYLOAD_LEN {
        return None;
    }
    Some(DiscoveredSensor {
        mac: String::from_utf8_lossy(&payload[1..9]).into_owned(),
        kind_code: payload[9],
        version: payload[10],
    })
}

/// Decode a `NOTIFY_EVENT_LOG` payload: `[timestamp_ms[8], len, message...]`.
pub fn parse_event_log(payload: &[u8]) -> Option<EventLog> {
    if payload.len() < EVENT_LOG_MIN_LEN {
        return None;
    }
    let (ts, _) = U64::<BigEndian>::read_from_prefix(payload).ok()?;
    Some(EventLog {
        timestamp_ms: ts.get(),
        message: payload[EVENT_LOG_MIN_LEN..].to_vec(),
    })
}
