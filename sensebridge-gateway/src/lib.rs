//! Session engine for the sensebridge USB dongle
//!
//! A [`Gateway`] owns one dongle: it runs the reader thread, performs the
//! authenticated startup handshake, keeps the handler registry, and exposes
//! the management operations (list, scan, delete). Sensor events are pushed
//! to the callback supplied at [`Gateway::open`].
//!
//! The event callback runs on the reader thread. It must not call back into
//! gateway operations: those park on a completion signal that only the
//! reader thread can fire, so a re-entrant call deadlocks the session.

mod completion;
mod dispatcher;
mod error;
mod reader;

pub use error::GatewayError;

// The transport vocabulary is part of this crate's API surface.
pub use sensebridge_transport::{
    BoxedTransport, DiscoveredSensor, HidTransport, Packet, SensorEvent, SensorKind, SensorState,
    Transport, TransportError,
};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use sensebridge_transport::event_parser::{
    parse_event_log, parse_scan_announcement, parse_sensor_alarm,
};
use sensebridge_transport::protocol::{cmd, response_of, timing};

use completion::{ResponseCollector, WaitOutcome};
use dispatcher::{Dispatcher, Handler, PacketSender};

/// Fixed pairing challenge the dongle expects during the R1 exchange.
const R1_CHALLENGE: &[u8; 16] = b"Ok5HPNQ4lf77u754";

/// Challenge words sent with the ENR request at startup.
const ENR_CHALLENGE: [u32; 4] = [0x3030_3030; 4];

/// Dongle identity cached during the startup handshake
#[derive(Debug, Clone, Default)]
pub struct DongleIdentity {
    /// Opaque 16-byte identifier returned by the ENR exchange
    pub enr: [u8; 16],
    /// 8-character ASCII dongle address
    pub mac: String,
    /// Dongle firmware version string
    pub version: String,
    /// Raw status byte from the startup inquiry, kept for diagnostics
    pub inquiry_status: u8,
}

/// An open session with one bridge dongle.
pub struct Gateway {
    transport: BoxedTransport,
    sender: Arc<PacketSender>,
    dispatcher: Arc<Dispatcher>,
    shutdown: Arc<AtomicBool>,
    reader: Mutex<Option<JoinHandle<()>>>,
    identity: DongleIdentity,
}

fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

impl Gateway {
    /// Open a session: spawn the reader, register the permanent notification
    /// handlers, and run the startup handshake. On any handshake failure the
    /// session is torn down and an error returned.
    ///
    /// `on_event` is invoked on the reader thread for every decoded sensor
    /// alarm; see the crate docs for the re-entrancy contract.
    pub fn open<F>(transport: BoxedTransport, on_event: F) -> Result<Self, GatewayError>
    where
        F: Fn(SensorEvent) + Send + Sync + 'static,
    {
        let sender = PacketSender::new(Arc::clone(&transport));
        let dispatcher = Dispatcher::new(Arc::clone(&sender));

        // Time synchronization: answer with the wall clock in milliseconds.
        let time_sender = Arc::clone(&sender);
        dispatcher.set_handler(
            cmd::NOTIFY_SYNC_TIME,
            Some(Arc::new(move |_pkt: &Packet| {
                if let Err(e) = time_sender.send(&Packet::sync_time_ack(unix_ms())) {
                    warn!("time sync reply failed: {e}");
                }
            })),
        );

        // Sensor alarms: decode and hand to the user callback.
        dispatcher.set_handler(
            cmd::NOTIFY_SENSOR_ALARM,
            Some(Arc::new(move |pkt: &Packet| {
                match parse_sensor_alarm(pkt.payload.bytes()) {
                    Some(event) => {
                        debug!("sensor event: {event}");
                        on_event(event);
                    }
                    None => info!("undecodable alarm payload: {:02X?}", pkt.payload.bytes()),
                }
            })),
        );

        // Dongle event log: informational only.
        dispatcher.set_handler(
            cmd::NOTIFY_EVENT_LOG,
            Some(Arc::new(|pkt: &Packet| {
                match parse_event_log(pkt.payload.bytes()) {
                    Some(log) => info!(
                        "dongle log: time={}ms, data={:02X?}",
                        log.timestamp_ms, log.message
                    ),
                    None => info!("undecodable event log: {:02X?}", pkt.payload.bytes()),
                }
            })),
        );

        let shutdown = Arc::new(AtomicBool::new(false));
        let reader = {
            let transport = Arc::clone(&transport);
            let dispatcher = Arc::clone(&dispatcher);
            let shutdown = Arc::clone(&shutdown);
            std::thread::Builder::new()
                .name("bridge-reader".into())
                .spawn(move || reader::run_reader_loop(transport, dispatcher, shutdown))
                .expect("failed to spawn bridge reader thread")
        };

        let mut gateway = Self {
            transport,
            sender,
            dispatcher,
            shutdown,
            reader: Mutex::new(Some(reader)),
            identity: DongleIdentity::default(),
        };

        match gateway.startup() {
            Ok(identity) => {
                info!(
                    "dongle ready: mac={}, version={}",
                    identity.mac, identity.version
                );
                gateway.identity = identity;
                Ok(gateway)
            }
            Err(e) => {
                gateway.stop();
                Err(GatewayError::StartFailed(Box::new(e)))
            }
        }
    }

    /// Dongle address, available after a successful open.
    pub fn mac(&self) -> &str {
        &self.identity.mac
    }

    /// Dongle firmware version string.
    pub fn version(&self) -> &str {
        &self.identity.version
    }

    /// Opaque ENR blob from the startup handshake.
    pub fn enr(&self) -> &[u8; 16] {
        &self.identity.enr
    }

    /// Raw status byte the dongle answered to the startup inquiry.
    pub fn inquiry_status(&self) -> u8 {
        self.identity.inquiry_status
    }

    // === Command engine ===

    /// Install a transient handler for `resp_cmd`, send `pkt`, wait on the
    /// collector, and restore the previous handler whatever the outcome.
    fn run_command(
        &self,
        pkt: Packet,
        resp_cmd: u16,
        handler: Handler,
        collector: &ResponseCollector,
        timeout: Duration,
    ) -> Result<Vec<Packet>, GatewayError> {
        let sent_cmd = pkt.cmd;
        let previous = self.dispatcher.set_handler(resp_cmd, Some(handler));

        let result = self
            .sender
            .send(&pkt)
            .map_err(GatewayError::from)
            .and_then(|()| match collector.wait(timeout) {
                WaitOutcome::Complete(packets) => Ok(packets),
                WaitOutcome::Failed(reason) => Err(GatewayError::Protocol(reason)),
                WaitOutcome::TimedOut => Err(GatewayError::Timeout { cmd: sent_cmd }),
            });

        self.dispatcher.set_handler(resp_cmd, previous);
        result
    }

    /// One request, one response: the common exchange shape.
    fn execute(&self, pkt: Packet, timeout: Duration) -> Result<Packet, GatewayError> {
        let resp_cmd = response_of(pkt.cmd);
        let collector = ResponseCollector::new(1);
        let capture = Arc::clone(&collector);
        let handler: Handler = Arc::new(move |resp: &Packet| capture.push(resp.clone()));
        let mut packets = self.run_command(pkt, resp_cmd, handler, &collector, timeout)?;
        Ok(packets.remove(0))
    }

    fn inquiry(&self) -> Result<u8, GatewayError> {
        let resp = self.execute(Packet::inquiry(), timing::CMD_TIMEOUT)?;
        let payload = resp.payload.bytes();
        match payload {
            [status] => {
                debug!("inquiry returned status {status}");
                Ok(*status)
            }
            _ => Err(GatewayError::Protocol(format!(
                "inquiry answered {} bytes, expected 1",
                payload.len()
            ))),
        }
    }

    fn get_enr(&self, r: &[u32; 4]) -> Result<[u8; 16], GatewayError> {
        let resp = self.execute(Packet::get_enr(r), timing::CMD_TIMEOUT)?;
        let payload = resp.payload.bytes();
        payload.try_into().map_err(|_| {
            GatewayError::Protocol(format!(
                "ENR response of {} bytes, expected 16",
                payload.len()
            ))
        })
    }

    fn get_mac(&self) -> Result<String, GatewayError> {
        let resp = self.execute(Packet::get_mac(), timing::CMD_TIMEOUT)?;
        let payload = resp.payload.bytes();
        if payload.len() != 8 {
            return Err(GatewayError::Protocol(format!(
                "MAC response of {} bytes, expected 8",
                payload.len()
            )));
        }
        Ok(String::from_utf8_lossy(payload).into_owned())
    }

    /// Fetch the dongle's 16-byte key. Diagnostic accessor; not part of the
    /// startup handshake.
    pub fn get_key(&self) -> Result<[u8; 16], GatewayError> {
        let resp = self.execute(Packet::get_key(), timing::CMD_TIMEOUT)?;
        let payload = resp.payload.bytes();
        payload.try_into().map_err(|_| {
            GatewayError::Protocol(format!(
                "key response of {} bytes, expected 16",
                payload.len()
            ))
        })
    }

    fn get_version(&self) -> Result<String, GatewayError> {
        let resp = self.execute(Packet::get_version(), timing::CMD_TIMEOUT)?;
        Ok(String::from_utf8_lossy(resp.payload.bytes()).into_owned())
    }

    fn finish_auth(&self) -> Result<(), GatewayError> {
        self.execute(Packet::finish_auth(), timing::CMD_TIMEOUT)?;
        Ok(())
    }

    fn enable_scan(&self, start: bool) -> Result<(), GatewayError> {
        self.execute(Packet::enable_scan(start), timing::CMD_TIMEOUT)?;
        Ok(())
    }

    fn get_sensor_r1(&self, mac: &str, r1: &[u8; 16]) -> Result<(), GatewayError> {
        self.execute(Packet::get_sensor_r1(mac, r1), timing::CMD_TIMEOUT)?;
        Ok(())
    }

    fn verify_sensor(&self, mac: &str) -> Result<(), GatewayError> {
        self.execute(Packet::verify_sensor(mac), timing::CMD_TIMEOUT)?;
        Ok(())
    }

    fn startup(&self) -> Result<DongleIdentity, GatewayError> {
        let inquiry_status = self.inquiry()?;
        if inquiry_status == 0 {
            return Err(GatewayError::Protocol(
                "inquiry reported status 0".to_string(),
            ));
        }
        let enr = self.get_enr(&ENR_CHALLENGE)?;
        let mac = self.get_mac()?;
        debug!("dongle address is [{mac}]");
        let version = self.get_version()?;
        debug!("dongle version: {version}");
        self.finish_auth()?;
        Ok(DongleIdentity {
            enr,
            mac,
            version,
            inquiry_status,
        })
    }

    // === Management operations ===

    /// List the addresses of all sensors paired to the dongle.
    pub fn list(&self) -> Result<Vec<String>, GatewayError> {
        let resp = self.execute(Packet::get_sensor_count(), timing::CMD_TIMEOUT)?;
        let count = match resp.payload.bytes() {
            [count] => *count,
            other => {
                return Err(GatewayError::Protocol(format!(
                    "sensor count of {} bytes, expected 1",
                    other.len()
                )))
            }
        };
        if count == 0 {
            debug!("no sensors paired");
            return Ok(Vec::new());
        }
        debug!("{count} sensors reported, collecting addresses");

        let collector = ResponseCollector::new(count as usize);
        let capture = Arc::clone(&collector);
        let handler: Handler = Arc::new(move |resp: &Packet| {
            let payload = resp.payload.bytes();
            if payload.len() == 8 {
                capture.push(resp.clone());
            } else {
                capture.fail(format!(
                    "sensor list entry of {} bytes, expected 8",
                    payload.len()
                ));
            }
        });

        let packets = self.run_command(
            Packet::get_sensor_list(count),
            response_of(cmd::CMD_GET_SENSOR_LIST),
            handler,
            &collector,
            timing::CMD_TIMEOUT * u32::from(count),
        )?;

        Ok(packets
            .iter()
            .map(|pkt| String::from_utf8_lossy(pkt.payload.bytes()).into_owned())
            .collect())
    }

    /// Pair a new sensor: enable scanning, wait for one announcement, run
    /// the R1 exchange, disable scanning, and verify. Returns the announced
    /// sensor, or `None` when nothing announced itself in time.
    pub fn scan(&self, scan_timeout: Duration) -> Result<Option<DiscoveredSensor>, GatewayError> {
        debug!("starting pairing scan");

        let collector = ResponseCollector::new(1);
        let capture = Arc::clone(&collector);
        let scan_handler: Handler = Arc::new(move |pkt: &Packet| {
            if parse_scan_announcement(pkt.payload.bytes()).is_some() {
                capture.push(pkt.clone());
            } else {
                warn!(
                    "undecodable sensor announcement: {:02X?}",
                    pkt.payload.bytes()
                );
            }
        });

        let previous = self
            .dispatcher
            .set_handler(cmd::NOTIFY_SENSOR_SCAN, Some(scan_handler));
        let result = self.scan_with_handler_installed(&collector, scan_timeout);
        self.dispatcher.set_handler(cmd::NOTIFY_SENSOR_SCAN, previous);
        result
    }

    fn scan_with_handler_installed(
        &self,
        collector: &ResponseCollector,
        scan_timeout: Duration,
    ) -> Result<Option<DiscoveredSensor>, GatewayError> {
        if let Err(e) = self.enable_scan(true) {
            return match e {
                GatewayError::Timeout { .. } => {
                    warn!("enable scan timed out");
                    Ok(None)
                }
                other => Err(other),
            };
        }

        let found = match collector.wait(scan_timeout) {
            WaitOutcome::Complete(mut packets) => {
                parse_scan_announcement(packets.remove(0).payload.bytes())
            }
            _ => None,
        };

        match &found {
            Some(sensor) => {
                debug!(
                    "sensor announced: mac={}, type={}, version={}",
                    sensor.mac, sensor.kind_code, sensor.version
                );
                // Pairing continues even if the R1 exchange times out.
                if let Err(e) = self.get_sensor_r1(&sensor.mac, R1_CHALLENGE) {
                    warn!("R1 exchange with {} failed: {e}", sensor.mac);
                }
            }
            None => debug!("no sensor announced within {scan_timeout:?}"),
        }

        if let Err(e) = self.enable_scan(false) {
            warn!("disable scan failed: {e}");
        }

        if let Some(sensor) = &found {
            if let Err(e) = self.verify_sensor(&sensor.mac) {
                warn!("verification of {} failed: {e}", sensor.mac);
            }
        }

        Ok(found)
    }

    /// Unpair a sensor by address. `Ok(false)` covers timeouts and acks that
    /// do not match the request; the session stays usable either way.
    pub fn delete(&self, mac: &str) -> Result<bool, GatewayError> {
        if mac.len() != 8 {
            warn!("invalid sensor address {mac:?}, must be 8 characters");
            return Ok(false);
        }

        let resp = match self.execute(Packet::del_sensor(mac), timing::CMD_TIMEOUT) {
            Ok(resp) => resp,
            Err(GatewayError::Timeout { .. }) => {
                warn!("delete of {mac} timed out");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        let payload = resp.payload.bytes();
        if payload.len() != 9 {
            warn!(
                "delete ack of {} bytes, expected 9: {:02X?}",
                payload.len(),
                payload
            );
            return Ok(false);
        }
        let ack_mac = String::from_utf8_lossy(&payload[..8]);
        if ack_mac != mac {
            warn!("delete ack for {ack_mac}, requested {mac}");
            return Ok(false);
        }
        if payload[8] != 0xFF {
            warn!("unexpected delete ack code 0x{:02X}", payload[8]);
            return Ok(false);
        }

        debug!("sensor {mac} deleted");
        Ok(true)
    }

    /// Tear the session down: stop the reader, close the transport. Safe to
    /// call more than once; later calls are no-ops.
    pub fn stop(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("stopping bridge session");
        if let Err(e) = self.transport.close() {
            warn!("transport close failed: {e}");
        }
        if let Some(handle) = self.reader.lock().take() {
            if handle.join().is_err() {
                warn!("reader thread panicked during shutdown");
            }
        }
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.stop();
    }
}
