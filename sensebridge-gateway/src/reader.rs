//! Reader loop: report bytes in, parsed packets out
//!
//! Runs on a dedicated thread for the life of the session. Bytes from the
//! transport accumulate in a resync buffer; frames are cut at the magic
//! boundary and handed to the dispatcher. Corrupt frames advance the buffer
//! by the codec's skip hint, never by a self-reported length.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use tracing::{debug, warn};

use sensebridge_transport::protocol::{timing::READER_IDLE_SLEEP, timing::RESYNC_SKIP, MAGIC};
use sensebridge_transport::{BoxedTransport, FrameError, Packet};

use crate::dispatcher::Dispatcher;

fn find_frame_start(buf: &[u8]) -> Option<usize> {
    buf.windows(MAGIC.len()).position(|w| w == MAGIC)
}

pub(crate) fn run_reader_loop(
    transport: BoxedTransport,
    dispatcher: Arc<Dispatcher>,
    shutdown: Arc<AtomicBool>,
) {
    debug!("reader thread started");
    let mut buf: Vec<u8> = Vec::new();

    while !shutdown.load(Ordering::Relaxed) {
        let got_data = match transport.read_report() {
            Ok(bytes) => {
                let n = bytes.len();
                buf.extend_from_slice(&bytes);
                n > 0
            }
            Err(e) => {
                if !shutdown.load(Ordering::Relaxed) {
                    warn!("transport read failed, shutting down session: {e}");
                    shutdown.store(true, Ordering::Relaxed);
                }
                break;
            }
        };

        let Some(start) = find_frame_start(&buf) else {
            // Drop magic-free garbage, but a trailing 0x55 may be the first
            // half of a split magic.
            let keep = usize::from(buf.last() == Some(&MAGIC[0]));
            buf.drain(..buf.len() - keep);
            if !got_data {
                thread::sleep(READER_IDLE_SLEEP);
            }
            continue;
        };
        buf.drain(..start);

        match Packet::parse(&buf) {
            Ok((pkt, used)) => {
                buf.drain(..used);
                dispatcher.dispatch(&pkt);
            }
            Err(FrameError::Incomplete) => {}
            Err(e) => {
                let skip = e.skip_hint().unwrap_or(RESYNC_SKIP).min(buf.len());
                debug!("dropping corrupt frame ({e}), skipping {skip} bytes");
                buf.drain(..skip);
            }
        }
    }

    debug!("reader thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use sensebridge_transport::protocol::cmd;
    use sensebridge_transport::{Payload, Transport, TransportError};
    use std::collections::VecDeque;
    use std::time::Duration;

    use crate::dispatcher::{Handler, PacketSender};

    /// Serves a scripted sequence of reports, then reads empty forever.
    struct ScriptedTransport {
        reports: Mutex<VecDeque<Vec<u8>>>,
    }

    impl ScriptedTransport {
        fn new(stream: &[u8]) -> Arc<Self> {
            // Chunk the stream into HID-sized reports.
            let reports = stream
                .chunks(63)
                .map(|c| c.to_vec())
                .collect::<VecDeque<_>>();
            Arc::new(Self {
                reports: Mutex::new(reports),
            })
        }
    }

    impl Transport for ScriptedTransport {
        fn read_report(&self) -> Result<Vec<u8>, TransportError> {
            Ok(self.reports.lock().pop_front().unwrap_or_default())
        }

        fn write_packet(&self, _bytes: &[u8]) -> Result<(), TransportError> {
            Ok(())
        }

        fn close(&self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    /// Run the reader over a byte stream until it idles, collecting every
    /// packet the dispatcher saw.
    fn collect_packets(stream: &[u8]) -> Vec<Packet> {
        let transport = ScriptedTransport::new(stream);
        let sender = PacketSender::new(transport.clone());
        let dispatcher = Dispatcher::new(sender);

        let seen: Arc<Mutex<Vec<Packet>>> = Arc::new(Mutex::new(Vec::new()));
        for command in [
            cmd::CMD_INQUIRY + 1,
            cmd::CMD_GET_MAC + 1,
            cmd::NOTIFY_SENSOR_ALARM,
        ] {
            let sink = Arc::clone(&seen);
            let handler: Handler = Arc::new(move |pkt: &Packet| sink.lock().push(pkt.clone()));
            dispatcher.set_handler(command, Some(handler));
        }

        let shutdown = Arc::new(AtomicBool::new(false));
        let reader = {
            let transport = transport.clone();
            let dispatcher = Arc::clone(&dispatcher);
            let shutdown = Arc::clone(&shutdown);
            thread::spawn(move || run_reader_loop(transport, dispatcher, shutdown))
        };

        // The scripted stream drains in a handful of iterations.
        thread::sleep(Duration::from_millis(400));
        shutdown.store(true, Ordering::Relaxed);
        reader.join().expect("reader thread joins");

        let packets = seen.lock().clone();
        packets
    }

    fn response(command: u16, payload: &[u8]) -> Packet {
        Packet {
            cmd: command,
            payload: Payload::Data(payload.to_vec()),
        }
    }

    #[test]
    fn yields_frames_in_order() {
        let mut stream = response(cmd::CMD_INQUIRY + 1, &[0x01]).to_bytes();
        stream.extend(response(cmd::CMD_GET_MAC + 1, b"ABCD1234").to_bytes());
        let packets = collect_packets(&stream);
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].cmd, cmd::CMD_INQUIRY + 1);
        assert_eq!(packets[1].payload.bytes(), b"ABCD1234");
    }

    #[test]
    fn resyncs_past_garbage_prefix() {
        let mut stream = vec![0x00, 0x13, 0x37, 0xAB, 0x55];
        stream.extend(response(cmd::CMD_INQUIRY + 1, &[0x01]).to_bytes());
        stream.extend(response(cmd::CMD_GET_MAC + 1, b"ABCD1234").to_bytes());
        let packets = collect_packets(&stream);
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].cmd, cmd::CMD_INQUIRY + 1);
        assert_eq!(packets[1].cmd, cmd::CMD_GET_MAC + 1);
    }

    #[test]
    fn drops_corrupt_frame_and_delivers_the_next() {
        let mut corrupt = response(cmd::CMD_INQUIRY + 1, &[0x01]).to_bytes();
        let last = corrupt.len() - 1;
        corrupt[last] ^= 0x01;
        let mut stream = corrupt;
        stream.extend(response(cmd::CMD_GET_MAC + 1, b"ABCD1234").to_bytes());
        let packets = collect_packets(&stream);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].cmd, cmd::CMD_GET_MAC + 1);
        assert_eq!(packets[0].payload.bytes(), b"ABCD1234");
    }

    #[test]
    fn reassembles_frames_split_across_reports() {
        // A 60-byte payload frame spans two 63-byte reports.
        let mut stream = response(cmd::NOTIFY_SENSOR_ALARM, &[0x42; 60]).to_bytes();
        stream.extend(response(cmd::CMD_INQUIRY + 1, &[0x01]).to_bytes());
        let packets = collect_packets(&stream);
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].payload.bytes(), &[0x42; 60][..]);
    }

    #[test]
    fn fatal_read_error_sets_the_shutdown_flag() {
        struct FailingTransport;
        impl Transport for FailingTransport {
            fn read_report(&self) -> Result<Vec<u8>, TransportError> {
                Err(TransportError::Disconnected)
            }
            fn write_packet(&self, _bytes: &[u8]) -> Result<(), TransportError> {
                Ok(())
            }
            fn close(&self) -> Result<(), TransportError> {
                Ok(())
            }
        }

        let transport = Arc::new(FailingTransport);
        let sender = PacketSender::new(transport.clone());
        let dispatcher = Dispatcher::new(sender);
        let shutdown = Arc::new(AtomicBool::new(false));

        run_reader_loop(transport, dispatcher, Arc::clone(&shutdown));
        assert!(shutdown.load(Ordering::Relaxed));
    }
}
