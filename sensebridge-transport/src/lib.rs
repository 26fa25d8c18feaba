//! Transport layer and wire codec for the sensebridge USB dongle
//!
//! This crate holds everything below the session engine:
//!
//! - the frame codec (serialize, parse, checksum) — pure functions
//! - the protocol command taxonomy and timing constants
//! - the byte-transport abstraction and its HID implementation
//! - decoding of notification payloads into structured events

pub mod error;
pub mod event_parser;
pub mod frame;
pub mod protocol;
pub mod types;

mod hid_device;

pub use error::TransportError;
pub use frame::{FrameError, Packet, Payload};
pub use hid_device::{device, HidTransport};
pub use types::{DiscoveredSensor, EventLog, SensorEvent, SensorKind, SensorState};

use std::sync::Arc;

/// The byte-transport boundary the session engine builds on.
///
/// Implementations move whole HID reports; they never parse frames.
pub trait Transport: Send + Sync {
    /// Read the content of one HID input report, length prefix stripped.
    ///
    /// Blocks for at most one report-read timeout so a caller polling a
    /// shutdown flag stays responsive. An empty Vec means no data was
    /// available; the caller should retry after a short back-off.
    fn read_report(&self) -> Result<Vec<u8>, TransportError>;

    /// Write one serialized frame in a single operation.
    fn write_packet(&self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Release the underlying handle. Idempotent.
    fn close(&self) -> Result<(), TransportError>;
}

/// Type alias for a shared transport handle
pub type BoxedTransport = Arc<dyn Transport>;
