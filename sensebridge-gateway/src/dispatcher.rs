//! Inbound packet routing and the outbound write path
//!
//! The dispatcher runs on the reader thread. It looks up the handler for a
//! packet, acknowledges inbound async traffic, then invokes the handler
//! outside the registry lock so handlers may install or restore entries
//! without deadlocking.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use sensebridge_transport::protocol::{cmd, TYPE_ASYNC};
use sensebridge_transport::{BoxedTransport, Packet, TransportError};

/// A packet handler. Permanent entries live for the session; transient
/// entries are installed around a command and restored afterwards.
pub(crate) type Handler = Arc<dyn Fn(&Packet) + Send + Sync>;

/// Serializes outbound frames. Command sends and dispatcher acks share this
/// lock, so the wire never carries interleaved frames.
pub(crate) struct PacketSender {
    transport: BoxedTransport,
    lock: Mutex<()>,
}

impl PacketSender {
    pub fn new(transport: BoxedTransport) -> Arc<Self> {
        Arc::new(Self {
            transport,
            lock: Mutex::new(()),
        })
    }

    pub fn send(&self, pkt: &Packet) -> Result<(), TransportError> {
        let bytes = pkt.to_bytes();
        let _guard = self.lock.lock();
        debug!("===> {pkt}");
        self.transport.write_packet(&bytes)
    }
}

pub(crate) struct Dispatcher {
    handlers: Mutex<HashMap<u16, Handler>>,
    sender: Arc<PacketSender>,
}

impl Dispatcher {
    pub fn new(sender: Arc<PacketSender>) -> Arc<Self> {
        Arc::new(Self {
            handlers: Mutex::new(HashMap::new()),
            sender,
        })
    }

    /// Install or remove the handler for a command value, returning the
    /// previous entry so callers can restore it afterwards.
    pub fn set_handler(&self, command: u16, handler: Option<Handler>) -> Option<Handler> {
        let mut handlers = self.handlers.lock();
        match handler {
            Some(h) => handlers.insert(command, h),
            None => handlers.remove(&command),
        }
    }

    #[cfg(test)]
    pub fn has_handler(&self, command: u16) -> bool {
        self.handlers.lock().contains_key(&command)
    }

    /// Route one parsed packet: ack async traffic, then run the handler.
    pub fn dispatch(&self, pkt: &Packet) {
        debug!("<=== {pkt}");
        let handler = self.handlers.lock().get(&pkt.cmd).cloned();

        // The dongle retransmits unacknowledged async packets, so the ack
        // goes out before the handler runs.
        if pkt.class() == TYPE_ASYNC && pkt.cmd != cmd::ASYNC_ACK {
            if let Err(e) = self.sender.send(&Packet::async_ack(pkt.cmd)) {
                warn!("failed to acknowledge 0x{:04X}: {e}", pkt.cmd);
            }
        }

        match handler {
            Some(h) => h(pkt),
            None => trace!("no handler for {}(0x{:04X})", cmd::name(pkt.cmd), pkt.cmd),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;
    use sensebridge_transport::{Payload, Transport};

    /// Transport stub that records every written frame.
    struct RecordingTransport {
        writes: PlMutex<Vec<Vec<u8>>>,
    }

    impl RecordingTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                writes: PlMutex::new(Vec::new()),
            })
        }

        fn written(&self) -> Vec<Packet> {
            self.writes
                .lock()
                .iter()
                .map(|bytes| Packet::parse(bytes).expect("recorded frame parses").0)
                .collect()
        }
    }

    impl Transport for RecordingTransport {
        fn read_report(&self) -> Result<Vec<u8>, TransportError> {
            Ok(Vec::new())
        }

        fn write_packet(&self, bytes: &[u8]) -> Result<(), TransportError> {
            self.writes.lock().push(bytes.to_vec());
            Ok(())
        }

        fn close(&self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn notification(command: u16, payload: &[u8]) -> Packet {
        Packet {
            cmd: command,
            payload: Payload::Data(payload.to_vec()),
        }
    }

    #[test]
    fn async_packets_are_acked_before_the_handler_runs() {
        let transport = RecordingTransport::new();
        let sender = PacketSender::new(transport.clone());
        let dispatcher = Dispatcher::new(sender);

        let order: Arc<PlMutex<Vec<&'static str>>> = Arc::new(PlMutex::new(Vec::new()));
        let handler_order = Arc::clone(&order);
        let seen_transport = Arc::clone(&transport);
        dispatcher.set_handler(
            cmd::NOTIFY_SENSOR_ALARM,
            Some(Arc::new(move |_pkt| {
                // The ack must already be on the wire by handler time.
                assert_eq!(seen_transport.written().len(), 1);
                handler_order.lock().push("handler");
            })),
        );

        dispatcher.dispatch(&notification(cmd::NOTIFY_SENSOR_ALARM, &[0u8; 18]));

        assert_eq!(*order.lock(), vec!["handler"]);
        let written = transport.written();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].cmd, cmd::ASYNC_ACK);
        assert_eq!(
            written[0].payload,
            Payload::Ack(cmd::NOTIFY_SENSOR_ALARM)
        );
    }

    #[test]
    fn acks_are_never_acked() {
        let transport = RecordingTransport::new();
        let sender = PacketSender::new(transport.clone());
        let dispatcher = Dispatcher::new(sender);

        dispatcher.dispatch(&Packet::async_ack(cmd::CMD_ENABLE_SCAN));
        assert!(transport.written().is_empty());
    }

    #[test]
    fn sync_responses_are_not_acked() {
        let transport = RecordingTransport::new();
        let sender = PacketSender::new(transport.clone());
        let dispatcher = Dispatcher::new(sender);

        dispatcher.dispatch(&notification(0x4305, b"ABCD1234"));
        assert!(transport.written().is_empty());
    }

    #[test]
    fn set_handler_returns_the_previous_entry_for_restore() {
        let transport = RecordingTransport::new();
        let sender = PacketSender::new(transport);
        let dispatcher = Dispatcher::new(sender);

        let hits: Arc<PlMutex<u32>> = Arc::new(PlMutex::new(0));
        let counter = Arc::clone(&hits);
        let permanent: Handler = Arc::new(move |_| *counter.lock() += 1);
        assert!(dispatcher
            .set_handler(cmd::NOTIFY_SENSOR_SCAN, Some(permanent))
            .is_none());

        // Shadow with a transient handler, then restore what was there.
        let transient: Handler = Arc::new(|_| {});
        let previous = dispatcher.set_handler(cmd::NOTIFY_SENSOR_SCAN, Some(transient));
        assert!(previous.is_some());
        dispatcher.set_handler(cmd::NOTIFY_SENSOR_SCAN, previous);

        dispatcher.dispatch(&notification(cmd::NOTIFY_SENSOR_SCAN, &[0u8; 11]));
        assert_eq!(*hits.lock(), 1);
        assert!(dispatcher.has_handler(cmd::NOTIFY_SENSOR_SCAN));
    }

    #[test]
    fn unhandled_packets_are_dropped_quietly() {
        let transport = RecordingTransport::new();
        let sender = PacketSender::new(transport.clone());
        let dispatcher = Dispatcher::new(sender);

        // Still acked, even with nobody listening.
        dispatcher.dispatch(&notification(cmd::NOTIFY_EVENT_LOG, &[0u8; 9]));
        let written = transport.written();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].payload, Payload::Ack(cmd::NOTIFY_EVENT_LOG));
    }
}
