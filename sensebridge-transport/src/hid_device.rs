//! HID transport implementation for the USB bridge dongle
//!
//! Raw I/O only: one input report per read, one whole frame per write.
//! Framing, resynchronization and command correlation live above this
//! layer and never leak into it.

use std::ffi::CString;

use hidapi::{HidApi, HidDevice};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::TransportError;
use crate::protocol::{timing::READ_TIMEOUT_MS, MAX_REPORT_PAYLOAD, REPORT_SIZE};
use crate::Transport;

/// USB identity of the bridge dongle
pub mod device {
    pub const VENDOR_ID: u16 = 0x1A86;
    pub const PRODUCT_ID: u16 = 0xE024;
}

/// Transport over a HID device handle.
///
/// The handle is guarded by a mutex; reads hold it for at most one
/// report-read timeout, so writers are delayed but never starved.
pub struct HidTransport {
    device: Mutex<Option<HidDevice>>,
    path: String,
}

impl HidTransport {
    /// Open the dongle at an explicit device path (e.g. `/dev/hidraw0`).
    pub fn open_path(path: &str) -> Result<Self, TransportError> {
        let api = HidApi::new()?;
        let cpath = CString::new(path)
            .map_err(|_| TransportError::DeviceNotFound(path.to_string()))?;
        let device = api.open_path(&cpath)?;
        debug!("opened bridge dongle at {path}");
        Ok(Self {
            device: Mutex::new(Some(device)),
            path: path.to_string(),
        })
    }

    /// Open the first attached dongle matching the known VID/PID.
    pub fn open_first() -> Result<Self, TransportError> {
        let api = HidApi::new()?;
        let info = api
            .device_list()
            .find(|d| {
                d.vendor_id() == device::VENDOR_ID && d.product_id() == device::PRODUCT_ID
            })
            .ok_or_else(|| {
                TransportError::DeviceNotFound(format!(
                    "no {:04x}:{:04x} dongle attached",
                    device::VENDOR_ID,
                    device::PRODUCT_ID
                ))
            })?;
        let path = info.path().to_string_lossy().into_owned();
        let device = api.open_path(info.path())?;
        debug!("opened bridge dongle at {path}");
        Ok(Self {
            device: Mutex::new(Some(device)),
            path,
        })
    }

    /// Device path this transport was opened from.
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Transport for HidTransport {
    fn read_report(&self) -> Result<Vec<u8>, TransportError> {
        let guard = self.device.lock();
        let device = guard.as_ref().ok_or(TransportError::Disconnected)?;

        let mut buf = [0u8; REPORT_SIZE];
        let len = device.read_timeout(&mut buf, READ_TIMEOUT_MS)?;
        if len == 0 {
            return Ok(Vec::new());
        }

        // First report byte is the in-report payload length, clamped to 63.
        let prefix = (buf[0] as usize).min(MAX_REPORT_PAYLOAD);
        if prefix == 0 {
            trace!("report with zero length prefix, ignoring");
            return Ok(Vec::new());
        }
        let take = prefix.min(len.saturating_sub(1));
        Ok(buf[1..1 + take].to_vec())
    }

    fn write_packet(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let guard = self.device.lock();
        let device = guard.as_ref().ok_or(TransportError::Disconnected)?;

        // Report ID 0 prefix; hidapi strips it before the frame hits the wire.
        let mut report = Vec::with_capacity(bytes.len() + 1);
        report.push(0);
        report.extend_from_slice(bytes);

        let written = device.write(&report)?;
        if written != report.len() {
            return Err(TransportError::ShortWrite {
                written,
                expected: report.len(),
            });
        }
        Ok(())
    }

    fn close(&self) -> Result<(), TransportError> {
        if let Some(device) = self.device.lock().take() {
            drop(device);
            debug!("closed bridge dongle at {}", self.path);
        }
        Ok(())
    }
}
