//! Wire frame codec for the bridge dongle protocol
//!
//! Pure functions over byte buffers: no state, no I/O. A frame is
//!
//! ```text
//! [magic 2][class 1][length 1][id 1][payload ...][checksum 2]
//! ```
//!
//! with big-endian multi-byte fields. The length byte counts payload + 3
//! for ordinary packets. `ASYNC_ACK` frames are always 7 bytes and reuse
//! the length byte to echo the low byte of the command being acknowledged.

use thiserror::Error;

use crate::protocol::{
    checksum, cmd, cmd_class, cmd_id, make_cmd, timing::RESYNC_SKIP, FRAME_OVERHEAD, MAGIC,
    MAGIC_SWAPPED, MAX_PAYLOAD, MIN_HEADER_LEN, TYPE_ASYNC,
};

/// Packet body: opaque bytes for ordinary packets, the echoed 16-bit
/// command for `ASYNC_ACK`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Data(Vec<u8>),
    Ack(u16),
}

impl Payload {
    /// Payload bytes of an ordinary packet; empty for acks.
    pub fn bytes(&self) -> &[u8] {
        match self {
            Payload::Data(data) => data,
            Payload::Ack(_) => &[],
        }
    }
}

/// One protocol frame, either direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub cmd: u16,
    pub payload: Payload,
}

/// Codec-level parse outcome. `Incomplete` asks the caller for more bytes;
/// the other variants carry a minimum skip so a resynchronizing reader can
/// search past the consumed magic for the next frame start.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("truncated frame, need more bytes")]
    Incomplete,

    #[error("bad magic 0x{0:04X}")]
    BadMagic(u16),

    #[error("length byte {0} cannot describe a frame")]
    BadLength(u8),

    #[error("checksum mismatch: remote 0x{remote:04X}, local 0x{local:04X}")]
    Checksum { remote: u16, local: u16 },
}

impl FrameError {
    /// How many buffered bytes to discard before searching again.
    /// `None` means the frame may still complete as bytes arrive.
    pub fn skip_hint(&self) -> Option<usize> {
        match self {
            FrameError::Incomplete => None,
            _ => Some(RESYNC_SKIP),
        }
    }
}

impl Packet {
    fn data(cmd: u16, payload: Vec<u8>) -> Self {
        debug_assert!(payload.len() <= MAX_PAYLOAD);
        Self {
            cmd,
            payload: Payload::Data(payload),
        }
    }

    /// Acknowledge an inbound async packet.
    pub fn async_ack(acked: u16) -> Self {
        debug_assert_eq!(cmd_class(acked), TYPE_ASYNC);
        Self {
            cmd: cmd::ASYNC_ACK,
            payload: Payload::Ack(acked),
        }
    }

    pub fn inquiry() -> Self {
        Self::data(cmd::CMD_INQUIRY, Vec::new())
    }

    /// ENR request carrying four 32-bit little-endian challenge words.
    pub fn get_enr(r: &[u32; 4]) -> Self {
        let mut payload = Vec::with_capacity(16);
        for word in r {
            payload.extend_from_slice(&word.to_le_bytes());
        }
        Self::data(cmd::CMD_GET_ENR, payload)
    }

    pub fn get_mac() -> Self {
        Self::data(cmd::CMD_GET_MAC, Vec::new())
    }

    pub fn get_key() -> Self {
        Self::data(cmd::CMD_GET_KEY, Vec::new())
    }

    pub fn get_version() -> Self {
        Self::data(cmd::CMD_GET_DONGLE_VERSION, Vec::new())
    }

    pub fn finish_auth() -> Self {
        Self::data(cmd::CMD_FINISH_AUTH, vec![0xFF])
    }

    pub fn enable_scan(start: bool) -> Self {
        Self::data(cmd::CMD_ENABLE_SCAN, vec![u8::from(start)])
    }

    pub fn get_sensor_count() -> Self {
        Self::data(cmd::CMD_GET_SENSOR_COUNT, Vec::new())
    }

    pub fn get_sensor_list(count: u8) -> Self {
        Self::data(cmd::CMD_GET_SENSOR_LIST, vec![count])
    }

    /// Pairing challenge: sensor MAC followed by the 16-byte R1 value.
    pub fn get_sensor_r1(mac: &str, r1: &[u8; 16]) -> Self {
        debug_assert_eq!(mac.len(), 8);
        let mut payload = Vec::with_capacity(24);
        payload.extend_from_slice(mac.as_bytes());
        payload.extend_from_slice(r1);
        Self::data(cmd::CMD_GET_SENSOR_R1, payload)
    }

    pub fn verify_sensor(mac: &str) -> Self {
        debug_assert_eq!(mac.len(), 8);
        let mut payload = Vec::with_capacity(10);
        payload.extend_from_slice(mac.as_bytes());
        payload.extend_from_slice(&[0xFF, 0x04]);
        Self::data(cmd::CMD_VERIFY_SENSOR, payload)
    }

    pub fn del_sensor(mac: &str) -> Self {
        debug_assert_eq!(mac.len(), 8);
        Self::data(cmd::CMD_DEL_SENSOR, mac.as_bytes().to_vec())
    }

    /// Reply to NOTIFY_SYNC_TIME with the wall clock in milliseconds.
    pub fn sync_time_ack(now_ms: u64) -> Self {
        Self::data(cmd::SYNC_TIME_ACK, now_ms.to_be_bytes().to_vec())
    }

    /// Packet class byte.
    pub fn class(&self) -> u8 {
        cmd_class(self.cmd)
    }

    /// Total wire length of this packet.
    pub fn wire_len(&self) -> usize {
        match &self.payload {
            Payload::Ack(_) => FRAME_OVERHEAD,
            Payload::Data(data) => data.len() + FRAME_OVERHEAD,
        }
    }

    /// Serialize to wire bytes. Output magic is always `55 AA`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.wire_len());
        buf.extend_from_slice(&MAGIC);
        buf.push(self.class());
        match &self.payload {
            Payload::Ack(acked) => {
                buf.push(cmd_id(*acked));
                buf.push(cmd_id(self.cmd));
            }
            Payload::Data(data) => {
                buf.push(data.len() as u8 + 3);
                buf.push(cmd_id(self.cmd));
                buf.extend_from_slice(data);
            }
        }
        let cs = checksum(&buf);
        buf.extend_from_slice(&cs.to_be_bytes());
        buf
    }

    /// Parse one frame from the front of `buf`.
    ///
    /// On success returns the packet and the number of bytes consumed.
    /// Errors other than [`FrameError::Incomplete`] carry a skip hint; the
    /// self-reported length field is never trusted past a failed checksum.
    pub fn parse(buf: &[u8]) -> Result<(Packet, usize), FrameError> {
        if buf.len() < MIN_HEADER_LEN {
            return Err(FrameError::Incomplete);
        }

        let magic = [buf[0], buf[1]];
        if magic != MAGIC && magic != MAGIC_SWAPPED {
            return Err(FrameError::BadMagic(u16::from_be_bytes(magic)));
        }

        let class = buf[2];
        let b2 = buf[3];
        let id = buf[4];
        let cmd = make_cmd(class, id);

        let total = if cmd == cmd::ASYNC_ACK {
            FRAME_OVERHEAD
        } else {
            if b2 < 3 {
                return Err(FrameError::BadLength(b2));
            }
            b2 as usize + 4
        };
        if buf.len() < total {
            return Err(FrameError::Incomplete);
        }

        let frame = &buf[..total];
        let remote = u16::from_be_bytes([frame[total - 2], frame[total - 1]]);
        let local = checksum(&frame[..total - 2]);
        if remote != local {
            return Err(FrameError::Checksum { remote, local });
        }

        let payload = if cmd == cmd::ASYNC_ACK {
            Payload::Ack(make_cmd(class, b2))
        } else {
            Payload::Data(frame[5..total - 2].to_vec())
        };

        Ok((Packet { cmd, payload }, total))
    }
}

impl std::fmt::Display for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.payload {
            Payload::Ack(acked) => write!(
                f,
                "{}(0x{:04X}) acking {}(0x{:04X})",
                cmd::name(self.cmd),
                self.cmd,
                cmd::name(*acked),
                acked
            ),
            Payload::Data(data) => write!(
                f,
                "{}(0x{:04X}) payload={:02X?}",
                cmd::name(self.cmd),
                self.cmd,
                data
            ),
        }
    }
}
