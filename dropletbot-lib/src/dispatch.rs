//! Consumer side: cut frames out of the receive buffer, validate and route them.
//!
//! Exactly one parser thread runs per link, so frames are dispatched strictly
//! in arrival order.

use crate::alarm;
use crate::command::Command;
use crate::crc::Crc32;
use crate::error::{ErrorCode, LinkError};
use crate::frame::{self, Frame, FrameType, Scan};
use crate::pending::{Marker, Outcome, PendingTable};
use crate::reader::RxBuffer;
use crate::transport::FrameWriter;
use bytes::Buf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Callbacks for traffic nobody is synchronously waiting on.
///
/// Invoked from the parser thread; implementations must not block for long
/// and must not issue [`Link::call`](crate::link::Link::call) themselves.
pub trait LinkEvents: Send + Sync {
    /// A decoded REQ or RESP_OK payload.
    fn on_ready_read(&self, _cmd: Command, _data: &[u8]) {}

    /// CRC failures, device-reported errors, timeouts and transport loss.
    fn on_error(&self, _code: i32, _message: &str) {}

    /// A decoded alarm report.
    fn on_alarm(&self, _cmd: Command, _alarms: &[String]) {}
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoEvents;

impl LinkEvents for NoEvents {}

/// Writes every event to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEvents;

impl LinkEvents for LogEvents {
    fn on_ready_read(&self, cmd: Command, data: &[u8]) {
        info!("[<-- RECV] {}, data: {}", cmd, hex::encode(data));
    }

    fn on_error(&self, code: i32, message: &str) {
        warn!("[ERROR] code {}: {}", code, message);
    }

    fn on_alarm(&self, cmd: Command, alarms: &[String]) {
        let board = cmd.board().map(|b| b.to_string()).unwrap_or_else(|| "Unknown".to_string());
        for alarm in alarms {
            warn!("{} board alarm: {}", board, alarm);
        }
    }
}

pub struct Dispatcher {
    crc: Crc32,
    table: Arc<PendingTable>,
    writer: Arc<FrameWriter>,
    events: Arc<dyn LinkEvents>,
}

impl Dispatcher {
    pub fn new(table: Arc<PendingTable>, writer: Arc<FrameWriter>, events: Arc<dyn LinkEvents>) -> Self {
        Self {
            crc: Crc32::new(),
            table,
            writer,
            events,
        }
    }

    /// Validate one complete raw frame and route it.
    ///
    /// Frames failing the CRC are NACKed and reported, never dispatched.
    pub fn handle_raw(&self, raw: &[u8]) {
        match Frame::parse(raw, &self.crc) {
            Ok(frame) => self.dispatch(frame),
            Err(
                ref e @ LinkError::Checksum {
                    cmd, msg_idx, cmd_idx, ..
                },
            ) => {
                warn!("{}", e);
                let nack = Frame::new(cmd, FrameType::AckFail, msg_idx, cmd_idx, bytes::Bytes::new());
                self.reply(&nack);
                self.events.on_error(ErrorCode::CHECKSUM, &e.to_string());
            }
            Err(e) => warn!("Dropping malformed frame: {}", e),
        }
    }

    /// Route a frame whose CRC already checked out.
    pub fn dispatch(&self, frame: Frame) {
        debug!(
            cmd = %frame.cmd,
            ftype = %frame.ftype,
            msg_idx = frame.msg_idx,
            cmd_idx = frame.cmd_idx,
            len = frame.payload.len(),
            "RX frame"
        );
        match frame.ftype {
            FrameType::RespOk => {
                self.reply(&frame.ack(FrameType::AckOk));
                if frame.cmd.is_alarm_report() {
                    self.raise_alarms(&frame);
                    return;
                }
                // callbacks run before the waiter is released
                self.events.on_ready_read(frame.cmd, &frame.payload);
                self.table.complete(frame.cmd, Outcome::Payload(frame.payload.clone()));
            }
            FrameType::Req => {
                self.reply(&frame.ack(FrameType::AckOk));
                if frame.cmd.is_alarm_report() {
                    self.raise_alarms(&frame);
                    return;
                }
                self.table.mark(frame.cmd, Marker::PeerRequest);
                self.events.on_ready_read(frame.cmd, &frame.payload);
            }
            FrameType::AckOk => self.table.mark(frame.cmd, Marker::Acked),
            FrameType::RespBusy => self.table.mark(frame.cmd, Marker::Busy),
            other => {
                // RESP_FAIL is final and carries no ACK; every other error type is acknowledged
                if other != FrameType::RespFail {
                    self.reply(&frame.ack(FrameType::AckOk));
                }
                let message = format!("Device responded with error `{}` for {}", other, frame.cmd);
                warn!("{}", message);
                self.events.on_error(ErrorCode::for_frame_type(other), &message);
                self.table.complete(frame.cmd, Outcome::Rejected(other));
            }
        }
    }

    fn raise_alarms(&self, frame: &Frame) {
        let alarms = alarm::parse_report(&frame.payload);
        debug!(cmd = %frame.cmd, count = alarms.len(), "Alarm report");
        self.events.on_alarm(frame.cmd, &alarms);
    }

    fn reply(&self, frame: &Frame) {
        if let Err(e) = self.writer.send(frame) {
            // the reader or the next request reports the loss
            warn!("Failed to send {} for {}: {}", frame.ftype, frame.cmd, e);
        }
    }
}

/// Parser loop: SEEK_MAGIC, wait for the length prefix, wait for the whole
/// frame, then validate and dispatch outside the buffer lock.
pub fn run(dispatcher: Dispatcher, buffer: Arc<RxBuffer>, running: Arc<AtomicBool>, idle_sleep: Duration) {
    info!("Parser thread started");
    let mut discarded = 0usize;
    while running.load(Ordering::Acquire) {
        let raw = {
            let mut buf = buffer.lock();
            match frame::scan(&buf) {
                Scan::Discard(n) => {
                    buf.advance(n);
                    discarded += n;
                    continue;
                }
                Scan::Incomplete => None,
                Scan::Complete(total) => Some(buf.split_to(total).freeze()),
            }
        };
        if discarded > 0 {
            debug!(discarded, "Resynchronised on frame magic");
            discarded = 0;
        }
        match raw {
            Some(raw) => {
                trace!(bytes = hex::encode(&raw), "Frame");
                dispatcher.handle_raw(&raw);
            }
            None => thread::sleep(idle_sleep),
        }
    }
    debug!("Parser thread stopped");
}
