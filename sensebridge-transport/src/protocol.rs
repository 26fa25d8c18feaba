//! Protocol constants and utilities for bridge dongle communication

/// Packet class for host-initiated request/response exchanges.
pub const TYPE_SYNC: u8 = 0x43;
/// Packet class for acknowledged exchanges and unsolicited notifications.
pub const TYPE_ASYNC: u8 = 0x53;

/// Combine a packet class and a command id into a 16-bit command value.
pub const fn make_cmd(class: u8, id: u8) -> u16 {
    ((class as u16) << 8) | id as u16
}

/// Class byte of a 16-bit command value.
pub const fn cmd_class(cmd: u16) -> u8 {
    (cmd >> 8) as u8
}

/// Id byte of a 16-bit command value.
pub const fn cmd_id(cmd: u16) -> u8 {
    (cmd & 0xFF) as u8
}

/// Command value of the response to a host-initiated request (id + 1).
pub const fn response_of(cmd: u16) -> u16 {
    cmd + 1
}

/// Bridge protocol commands
pub mod cmd {
    use super::{make_cmd, TYPE_ASYNC, TYPE_SYNC};

    // Sync commands (host-initiated, strict request/response)
    pub const CMD_GET_ENR: u16 = make_cmd(TYPE_SYNC, 0x02);
    pub const CMD_GET_MAC: u16 = make_cmd(TYPE_SYNC, 0x04);
    pub const CMD_GET_KEY: u16 = make_cmd(TYPE_SYNC, 0x06);
    pub const CMD_INQUIRY: u16 = make_cmd(TYPE_SYNC, 0x27);

    // The distinguished acknowledge packet
    pub const ASYNC_ACK: u16 = make_cmd(TYPE_ASYNC, 0xFF);

    // Async commands (host-initiated, dongle acks and replies)
    pub const CMD_FINISH_AUTH: u16 = make_cmd(TYPE_ASYNC, 0x14);
    pub const CMD_GET_DONGLE_VERSION: u16 = make_cmd(TYPE_ASYNC, 0x16);
    pub const CMD_ENABLE_SCAN: u16 = make_cmd(TYPE_ASYNC, 0x1C);
    pub const CMD_GET_SENSOR_R1: u16 = make_cmd(TYPE_ASYNC, 0x21);
    pub const CMD_VERIFY_SENSOR: u16 = make_cmd(TYPE_ASYNC, 0x23);
    pub const CMD_DEL_SENSOR: u16 = make_cmd(TYPE_ASYNC, 0x25);
    pub const CMD_GET_SENSOR_COUNT: u16 = make_cmd(TYPE_ASYNC, 0x2E);
    pub const CMD_GET_SENSOR_LIST: u16 = make_cmd(TYPE_ASYNC, 0x30);

    // Notifications (dongle-initiated, unsolicited)
    pub const NOTIFY_SENSOR_ALARM: u16 = make_cmd(TYPE_ASYNC, 0x19);
    pub const NOTIFY_SENSOR_SCAN: u16 = make_cmd(TYPE_ASYNC, 0x20);
    pub const NOTIFY_SYNC_TIME: u16 = make_cmd(TYPE_ASYNC, 0x32);
    /// Host reply to NOTIFY_SYNC_TIME (current wall clock in ms)
    pub const SYNC_TIME_ACK: u16 = make_cmd(TYPE_ASYNC, 0x33);
    pub const NOTIFY_EVENT_LOG: u16 = make_cmd(TYPE_ASYNC, 0x35);

    /// Get human-readable name for a command value
    pub fn name(cmd: u16) -> &'static str {
        match cmd {
            CMD_GET_ENR => "CMD_GET_ENR",
            CMD_GET_MAC => "CMD_GET_MAC",
            CMD_GET_KEY => "CMD_GET_KEY",
            CMD_INQUIRY => "CMD_INQUIRY",
            ASYNC_ACK => "ASYNC_ACK",
            CMD_FINISH_AUTH => "CMD_FINISH_AUTH",
            CMD_GET_DONGLE_VERSION => "CMD_GET_DONGLE_VERSION",
            CMD_ENABLE_SCAN => "CMD_ENABLE_SCAN",
            CMD_GET_SENSOR_R1 => "CMD_GET_SENSOR_R1",
            CMD_VERIFY_SENSOR => "CMD_VERIFY_SENSOR",
            CMD_DEL_SENSOR => "CMD_DEL_SENSOR",
            CMD_GET_SENSOR_COUNT => "CMD_GET_SENSOR_COUNT",
            CMD_GET_SENSOR_LIST => "CMD_GET_SENSOR_LIST",
            NOTIFY_SENSOR_ALARM => "NOTIFY_SENSOR_ALARM",
            NOTIFY_SENSOR_SCAN => "NOTIFY_SENSOR_SCAN",
            NOTIFY_SYNC_TIME => "NOTIFY_SYNC_TIME",
            SYNC_TIME_ACK => "SYNC_TIME_ACK",
            NOTIFY_EVENT_LOG => "NOTIFY_EVENT_LOG",
            _ => "UNKNOWN",
        }
    }
}

/// Frame magic, canonical byte order used on output
pub const MAGIC: [u8; 2] = [0x55, 0xAA];
/// Frame magic in the swapped byte order, accepted on input only
pub const MAGIC_SWAPPED: [u8; 2] = [0xAA, 0x55];

/// Bytes occupied by magic, class, length, id and checksum around a payload
pub const FRAME_OVERHEAD: usize = 7;
/// Shortest prefix from which class/length/id can be read
pub const MIN_HEADER_LEN: usize = 5;
/// Largest payload an ordinary frame can carry (length byte = payload + 3)
pub const MAX_PAYLOAD: usize = 60;

/// HID report sizes
pub const REPORT_SIZE: usize = 64;
/// Largest in-report payload length; greater prefix values are clamped
pub const MAX_REPORT_PAYLOAD: usize = 0x3F;

/// Communication timing constants
pub mod timing {
    use std::time::Duration;

    /// Default bound on a command's response wait
    pub const CMD_TIMEOUT: Duration = Duration::from_secs(2);
    /// Default bound on waiting for a sensor to announce during pairing
    pub const SCAN_TIMEOUT: Duration = Duration::from_secs(60);
    /// Reader back-off while the resync buffer holds no frame start
    pub const READER_IDLE_SLEEP: Duration = Duration::from_millis(100);
    /// Per-report blocking read budget (bounds shutdown-flag latency)
    pub const READ_TIMEOUT_MS: i32 = 100;
    /// Bytes skipped when a candidate frame fails magic or checksum
    pub const RESYNC_SKIP: usize = 2;
}

/// Sum of all frame bytes before the checksum field, truncated to 16 bits.
pub fn checksum(bytes: &[u8]) -> u16 {
    bytes
        .iter()
        .fold(0u16, |acc, &b| acc.wrapping_add(b as u16))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_values_match_wire_encoding() {
        assert_eq!(cmd::CMD_INQUIRY, 0x4327);
        assert_eq!(cmd::CMD_GET_ENR, 0x4302);
        assert_eq!(cmd::CMD_GET_MAC, 0x4304);
        assert_eq!(cmd::CMD_GET_DONGLE_VERSION, 0x5316);
        assert_eq!(cmd::ASYNC_ACK, 0x53FF);
        assert_eq!(cmd::NOTIFY_SENSOR_ALARM, 0x5319);
        assert_eq!(cmd::NOTIFY_SYNC_TIME, 0x5332);
        assert_eq!(response_of(cmd::CMD_GET_MAC), 0x4305);
    }

    #[test]
    fn checksum_wraps_mod_16_bits() {
        assert_eq!(checksum(&[]), 0);
        assert_eq!(checksum(&[0x55, 0xAA, 0x43, 0x03, 0x04]), 0x0149);
        // 600 * 0xFF = 0x255A8, truncated to 16 bits
        assert_eq!(checksum(&[0xFF; 600]), 0x55A8);
    }

    #[test]
    fn names_cover_the_taxonomy() {
        assert_eq!(cmd::name(cmd::CMD_GET_MAC), "CMD_GET_MAC");
        assert_eq!(cmd::name(cmd::NOTIFY_EVENT_LOG), "NOTIFY_EVENT_LOG");
        assert_eq!(cmd::name(0x0000), "UNKNOWN");
    }
}
