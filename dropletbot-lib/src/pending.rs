//! The pending-response table shared by the dispatcher and waiting callers.
//!
//! The dispatcher deposits responses and liveness markers keyed by command;
//! a caller blocked in [`PendingTable::wait`] takes its response out. Markers
//! (peer ACK, device BUSY, peer REQ) do not complete a wait, they push its
//! deadline back.

use crate::command::Command;
use crate::frame::FrameType;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::trace;

/// What the device finally answered for a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Payload(Bytes),
    /// The device answered with a failure or unrecognised frame type.
    Rejected(FrameType),
}

/// Liveness seen for a command while its caller is still waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    Acked,
    Busy,
    PeerRequest,
}

#[derive(Debug)]
pub enum WaitResult {
    Done(Outcome),
    TimedOut { waited: Duration },
    /// The link went away while waiting.
    Closed,
}

#[derive(Debug, Default)]
struct Slots {
    responses: HashMap<Command, Outcome>,
    markers: HashMap<Command, Marker>,
    closed: bool,
}

#[derive(Debug, Default)]
pub struct PendingTable {
    slots: Mutex<Slots>,
    changed: Condvar,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, Slots> {
        // A poisoned table only means a callback panicked mid-update; the maps are still usable.
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Forget anything stored for `cmd` before a new request reuses it.
    pub fn clear(&self, cmd: Command) {
        let mut slots = self.slots();
        slots.responses.remove(&cmd);
        slots.markers.remove(&cmd);
    }

    /// Store the final answer for `cmd`, dropping any stale marker.
    pub fn complete(&self, cmd: Command, outcome: Outcome) {
        {
            let mut slots = self.slots();
            slots.markers.remove(&cmd);
            slots.responses.insert(cmd, outcome);
        }
        self.changed.notify_all();
    }

    pub fn mark(&self, cmd: Command, marker: Marker) {
        self.slots().markers.insert(cmd, marker);
        self.changed.notify_all();
    }

    /// Remove and return a stored answer without waiting.
    pub fn take(&self, cmd: Command) -> Option<Outcome> {
        self.slots().responses.remove(&cmd)
    }

    pub fn contains(&self, cmd: Command) -> bool {
        self.slots().responses.contains_key(&cmd)
    }

    pub fn marker(&self, cmd: Command) -> Option<Marker> {
        self.slots().markers.get(&cmd).copied()
    }

    /// Wake every waiter and make further waits fail fast.
    pub fn close(&self) {
        self.slots().closed = true;
        self.changed.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.slots().closed
    }

    /// Block until an answer for `cmd` arrives or `timeout` passes without one.
    ///
    /// Each marker seen for `cmd` is consumed and restarts the full timeout.
    /// The condition wait is capped at `poll_interval`.
    pub fn wait(&self, cmd: Command, timeout: Duration, poll_interval: Duration) -> WaitResult {
        let started = Instant::now();
        let mut deadline = started + timeout;
        let mut slots = self.slots();
        loop {
            if let Some(outcome) = slots.responses.remove(&cmd) {
                return WaitResult::Done(outcome);
            }
            if slots.closed {
                return WaitResult::Closed;
            }
            let now = Instant::now();
            if let Some(marker) = slots.markers.remove(&cmd) {
                trace!(%cmd, ?marker, "Liveness marker, extending deadline");
                deadline = now + timeout;
            }
            if now >= deadline {
                return WaitResult::TimedOut {
                    waited: now - started,
                };
            }
            let nap = (deadline - now).min(poll_interval);
            slots = match self.changed.wait_timeout(slots, nap) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    const CMD: Command = Command(0x1102);
    const POLL: Duration = Duration::from_millis(5);

    #[test]
    fn test_wait_returns_stored_outcome() {
        let table = PendingTable::new();
        table.complete(CMD, Outcome::Payload(Bytes::from_static(b"v1")));
        match table.wait(CMD, Duration::from_millis(50), POLL) {
            WaitResult::Done(Outcome::Payload(p)) => assert_eq!(&p[..], b"v1"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(!table.contains(CMD));
    }

    #[test]
    fn test_wait_times_out() {
        let table = PendingTable::new();
        let start = Instant::now();
        match table.wait(CMD, Duration::from_millis(80), POLL) {
            WaitResult::TimedOut { waited } => assert!(waited >= Duration::from_millis(80)),
            other => panic!("unexpected {:?}", other),
        }
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_other_command_does_not_complete_wait() {
        let table = PendingTable::new();
        table.complete(Command(0x1202), Outcome::Payload(Bytes::new()));
        assert!(matches!(
            table.wait(CMD, Duration::from_millis(30), POLL),
            WaitResult::TimedOut { .. }
        ));
        assert!(table.contains(Command(0x1202)));
    }

    #[test]
    fn test_markers_extend_deadline() {
        let table = Arc::new(PendingTable::new());
        let feeder = {
            let table = table.clone();
            thread::spawn(move || {
                for marker in [Marker::Busy, Marker::Acked, Marker::PeerRequest, Marker::Busy] {
                    thread::sleep(Duration::from_millis(40));
                    table.mark(CMD, marker);
                }
                thread::sleep(Duration::from_millis(40));
                table.complete(CMD, Outcome::Payload(Bytes::from_static(&[0])));
            })
        };
        // 200 ms of activity against a 100 ms timeout
        let result = table.wait(CMD, Duration::from_millis(100), POLL);
        feeder.join().unwrap();
        assert!(matches!(result, WaitResult::Done(Outcome::Payload(_))), "got {:?}", result);
    }

    #[test]
    fn test_complete_clears_marker() {
        let table = PendingTable::new();
        table.mark(CMD, Marker::Busy);
        table.complete(CMD, Outcome::Rejected(FrameType::RespFail));
        assert_eq!(table.marker(CMD), None);
        assert_eq!(table.take(CMD), Some(Outcome::Rejected(FrameType::RespFail)));
    }

    #[test]
    fn test_close_wakes_waiter() {
        let table = Arc::new(PendingTable::new());
        let closer = {
            let table = table.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                table.close();
            })
        };
        let result = table.wait(CMD, Duration::from_secs(5), POLL);
        closer.join().unwrap();
        assert!(matches!(result, WaitResult::Closed));
    }
}
