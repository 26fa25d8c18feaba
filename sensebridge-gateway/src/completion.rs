//! One-shot completion signals for command/response correlation
//!
//! Each in-flight command parks its caller on a [`ResponseCollector`] until
//! the reader thread delivers the expected number of response packets, the
//! handler flags a violation, or the deadline passes. Captured packets are
//! written under the same mutex that guards the done flag, so the caller
//! observes them fully formed once woken.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use sensebridge_transport::Packet;

pub(crate) enum WaitOutcome {
    /// All expected responses arrived.
    Complete(Vec<Packet>),
    /// The handler rejected a response; carries the diagnostic.
    Failed(String),
    TimedOut,
}

pub(crate) struct ResponseCollector {
    state: Mutex<State>,
    cond: Condvar,
}

struct State {
    packets: Vec<Packet>,
    expected: usize,
    failed: Option<String>,
    done: bool,
}

impl ResponseCollector {
    pub fn new(expected: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                packets: Vec::with_capacity(expected),
                expected,
                failed: None,
                done: false,
            }),
            cond: Condvar::new(),
        })
    }

    /// Record one response; fires the signal once the expected count is in.
    /// Late packets after completion or failure are dropped.
    pub fn push(&self, pkt: Packet) {
        let mut state = self.state.lock();
        if state.done {
            return;
        }
        state.packets.push(pkt);
        if state.packets.len() >= state.expected {
            state.done = true;
            self.cond.notify_all();
        }
    }

    /// Abort the wait with a protocol diagnostic.
    pub fn fail(&self, reason: String) {
        let mut state = self.state.lock();
        if state.done {
            return;
        }
        state.failed = Some(reason);
        state.done = true;
        self.cond.notify_all();
    }

    /// Park the caller until completion, failure, or the deadline.
    pub fn wait(&self, timeout: Duration) -> WaitOutcome {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !state.done {
            if self.cond.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        if let Some(reason) = state.failed.take() {
            WaitOutcome::Failed(reason)
        } else if state.done {
            WaitOutcome::Complete(std::mem::take(&mut state.packets))
        } else {
            WaitOutcome::TimedOut
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn completes_once_expected_count_arrives() {
        let collector = ResponseCollector::new(2);
        let pusher = Arc::clone(&collector);
        thread::spawn(move || {
            pusher.push(Packet::get_mac());
            pusher.push(Packet::inquiry());
        });
        match collector.wait(Duration::from_secs(1)) {
            WaitOutcome::Complete(packets) => assert_eq!(packets.len(), 2),
            _ => panic!("expected completion"),
        }
    }

    #[test]
    fn times_out_when_nothing_arrives() {
        let collector = ResponseCollector::new(1);
        assert!(matches!(
            collector.wait(Duration::from_millis(20)),
            WaitOutcome::TimedOut
        ));
    }

    #[test]
    fn failure_wins_over_partial_results() {
        let collector = ResponseCollector::new(3);
        collector.push(Packet::get_mac());
        collector.fail("entry of 5 bytes".into());
        match collector.wait(Duration::from_millis(20)) {
            WaitOutcome::Failed(reason) => assert!(reason.contains("5 bytes")),
            _ => panic!("expected failure"),
        }
    }

    #[test]
    fn late_pushes_after_completion_are_dropped() {
        let collector = ResponseCollector::new(1);
        collector.push(Packet::get_mac());
        collector.push(Packet::inquiry());
        match collector.wait(Duration::from_millis(20)) {
            WaitOutcome::Complete(packets) => assert_eq!(packets.len(), 1),
            _ => panic!("expected completion"),
        }
    }
}
