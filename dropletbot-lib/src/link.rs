//! The link to the controller: background threads, request/response
//! correlation and the per-board management commands.

use crate::command::{Board, Command, opcode};
use crate::config::LinkConfig;
use crate::dispatch::{self, Dispatcher, LinkEvents};
use crate::error::{ErrorCode, LinkError, Result};
use crate::frame::{Frame, Sequencer};
use crate::pending::{Outcome, PendingTable, WaitResult};
use crate::reader::{self, ReaderExit, RxBuffer};
use crate::transport::{self, FrameWriter, TransportReader, TransportWriter};
use bytes::Bytes;
use chrono::{Datelike, Local, NaiveDateTime, Timelike};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Per-board login state. Only the link mutates it.
#[derive(Debug, Default)]
pub struct ConnectionState {
    signal: AtomicBool,
    motor: AtomicBool,
}

impl ConnectionState {
    fn flag(&self, board: Board) -> &AtomicBool {
        match board {
            Board::Signal => &self.signal,
            Board::Motor => &self.motor,
        }
    }

    pub fn is_connected(&self, board: Board) -> bool {
        self.flag(board).load(Ordering::Acquire)
    }

    fn set(&self, board: Board, connected: bool) {
        self.flag(board).store(connected, Ordering::Release);
    }

    fn clear(&self) {
        for board in Board::ALL {
            self.set(board, false);
        }
    }
}

/// Identification string returned by the VERSION command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BoardVersion {
    pub serial_number: String,
    pub hardware_version: String,
    pub software_version: String,
}

impl BoardVersion {
    /// Parse `"serial;hardware;software"`. Anything else is kept whole as the software version.
    pub fn parse(payload: &[u8]) -> Self {
        let text = String::from_utf8_lossy(payload);
        let text = text.trim_end_matches('\0');
        let parts: Vec<&str> = text.split(';').collect();
        if parts.len() >= 3 {
            Self {
                serial_number: parts[0].to_string(),
                hardware_version: parts[1].to_string(),
                software_version: parts[2].to_string(),
            }
        } else {
            Self {
                software_version: text.to_string(),
                ..Self::default()
            }
        }
    }
}

/// The 6-byte login timestamp: `[year - 2000, month, day, hour, minute, second]`.
pub fn login_timestamp(now: NaiveDateTime) -> [u8; 6] {
    [
        (now.year() - 2000).clamp(0, 255) as u8,
        now.month() as u8,
        now.day() as u8,
        now.hour() as u8,
        now.minute() as u8,
        now.second() as u8,
    ]
}

/// Tears the link down once the transport is gone, from whichever side noticed first.
struct LossHandler {
    state: Arc<ConnectionState>,
    running: Arc<AtomicBool>,
    table: Arc<PendingTable>,
    events: Arc<dyn LinkEvents>,
    fired: AtomicBool,
    lost: AtomicBool,
}

impl LossHandler {
    fn trigger(&self, reason: &str) {
        if self.fired.swap(true, Ordering::AcqRel) {
            return;
        }
        error!("Transport lost: {}", reason);
        self.state.clear();
        self.running.store(false, Ordering::Release);
        self.table.close();
        self.events.on_error(ErrorCode::TRANSPORT_LOST, &format!("Transport lost: {}", reason));
        self.lost.store(true, Ordering::Release);
    }

    fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }
}

/// An open link to the controller.
///
/// Owns a reader thread and a parser thread. Both are stopped and joined by
/// [`Link::close`] or on drop.
pub struct Link {
    config: LinkConfig,
    writer: Arc<FrameWriter>,
    pub(crate) table: Arc<PendingTable>,
    sequencer: Sequencer,
    state: Arc<ConnectionState>,
    events: Arc<dyn LinkEvents>,
    transaction: Mutex<()>,
    running: Arc<AtomicBool>,
    loss: Arc<LossHandler>,
    reader: Option<JoinHandle<()>>,
    parser: Option<JoinHandle<()>>,
}

/// Proof that the caller holds the transaction lock.
pub(crate) type Transaction<'a> = MutexGuard<'a, ()>;

impl Link {
    /// Open the configured serial port and start the background threads.
    pub fn open(config: LinkConfig, events: Arc<dyn LinkEvents>) -> Result<Self> {
        let (reader, writer) = transport::open_serial(&config)?;
        Self::with_transport(reader, writer, config, events)
    }

    /// Start a link over an already opened transport.
    pub fn with_transport(
        port_reader: TransportReader,
        port_writer: TransportWriter,
        config: LinkConfig,
        events: Arc<dyn LinkEvents>,
    ) -> Result<Self> {
        let writer = Arc::new(FrameWriter::new(port_writer));
        let table = Arc::new(PendingTable::new());
        let state = Arc::new(ConnectionState::default());
        let buffer = Arc::new(RxBuffer::new());
        let running = Arc::new(AtomicBool::new(true));
        let loss = Arc::new(LossHandler {
            state: state.clone(),
            running: running.clone(),
            table: table.clone(),
            events: events.clone(),
            fired: AtomicBool::new(false),
            lost: AtomicBool::new(false),
        });

        let parser = {
            let dispatcher = Dispatcher::new(table.clone(), writer.clone(), events.clone());
            let buffer = buffer.clone();
            let running = running.clone();
            let idle = config.idle_sleep;
            thread::Builder::new()
                .name("dropletbot-parser".to_string())
                .spawn(move || dispatch::run(dispatcher, buffer, running, idle))?
        };

        let reader = {
            let thread_running = running.clone();
            let loss = loss.clone();
            let idle = config.idle_sleep;
            let spawned = thread::Builder::new()
                .name("dropletbot-reader".to_string())
                .spawn(move || {
                    if let ReaderExit::Lost(e) = reader::run(port_reader, buffer, thread_running, idle) {
                        loss.trigger(&e.to_string());
                    }
                });
            match spawned {
                Ok(handle) => handle,
                Err(e) => {
                    running.store(false, Ordering::Release);
                    let _ = parser.join();
                    return Err(e.into());
                }
            }
        };

        info!(port = %config.port, "Link started");
        Ok(Self {
            config,
            writer,
            table,
            sequencer: Sequencer::new(),
            state,
            events,
            transaction: Mutex::new(()),
            running,
            loss,
            reader: Some(reader),
            parser: Some(parser),
        })
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn is_connected(&self, board: Board) -> bool {
        self.state.is_connected(board)
    }

    /// True once a read or a write has seen the transport fail.
    pub fn is_lost(&self) -> bool {
        self.loss.is_lost()
    }

    /// Write one frame. A write failure tears the link down.
    pub(crate) fn write(&self, frame: &Frame) -> Result<()> {
        self.writer.send(frame).inspect_err(|e| match e {
            LinkError::TransportLost(reason) => self.loss.trigger(reason),
            LinkError::Serial(err) => self.loss.trigger(&err.to_string()),
            _ => {}
        })
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.is_lost() || !self.running.load(Ordering::Acquire) {
            return Err(LinkError::TransportLost("link is closed".to_string()));
        }
        Ok(())
    }

    pub(crate) fn require(&self, board: Board) -> Result<()> {
        if self.is_connected(board) {
            Ok(())
        } else {
            Err(LinkError::NotConnected(board))
        }
    }

    pub(crate) fn begin(&self) -> Transaction<'_> {
        self.transaction.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Send a request and block until its response arrives or `timeout`
    /// passes with no sign of life for `cmd`.
    ///
    /// Calls are serialised; a second caller waits for the first to finish.
    pub fn call(&self, cmd: Command, payload: impl Into<Bytes>, timeout: Duration) -> Result<Bytes> {
        let txn = self.begin();
        self.call_in(&txn, cmd, payload.into(), timeout)
    }

    pub(crate) fn call_in(&self, _txn: &Transaction<'_>, cmd: Command, payload: Bytes, timeout: Duration) -> Result<Bytes> {
        self.ensure_alive()?;
        self.table.clear(cmd);
        let frame = self.sequencer.request(cmd, payload);
        self.write(&frame)?;
        self.await_response(cmd, timeout)
    }

    /// Wait for a response to `cmd` without sending anything.
    pub(crate) fn await_response(&self, cmd: Command, timeout: Duration) -> Result<Bytes> {
        match self.table.wait(cmd, timeout, self.config.poll_interval) {
            WaitResult::Done(Outcome::Payload(payload)) => Ok(payload),
            WaitResult::Done(Outcome::Rejected(ftype)) => Err(LinkError::Rejected { cmd, ftype }),
            WaitResult::TimedOut { waited } => {
                let err = LinkError::Timeout { cmd, waited };
                warn!("{}", err);
                self.events.on_error(ErrorCode::TIMEOUT, &err.to_string());
                Err(err)
            }
            WaitResult::Closed => Err(LinkError::TransportLost(format!("link closed while waiting for {}", cmd))),
        }
    }

    /// Send a request without waiting. Any reply arrives through the events.
    pub fn send(&self, cmd: Command, payload: impl Into<Bytes>) -> Result<()> {
        self.ensure_alive()?;
        let frame = self.sequencer.request(cmd, payload);
        self.write(&frame)
    }

    /// Log into both boards. Each board is tried independently.
    pub fn login(&self) -> (bool, bool) {
        let signal = self.login_board(Board::Signal);
        let motor = self.login_board(Board::Motor);
        (signal, motor)
    }

    /// Log into one board with the configured login timeout.
    ///
    /// The board counts as connected only if it answers with status byte 0.
    pub fn login_board(&self, board: Board) -> bool {
        self.login_with_timeout(board, self.config.login_timeout)
    }

    fn login_with_timeout(&self, board: Board, timeout: Duration) -> bool {
        let stamp = login_timestamp(Local::now().naive_local());
        let connected = match self.call(board.command(opcode::LOGIN), Bytes::copy_from_slice(&stamp), timeout) {
            Ok(resp) => resp.first() == Some(&0),
            Err(e) => {
                debug!("{} board login failed: {}", board, e);
                false
            }
        };
        self.state.set(board, connected);
        info!("{} board login: {}", board, if connected { "connected" } else { "failed" });
        connected
    }

    pub fn version(&self, board: Board) -> Result<BoardVersion> {
        self.require(board)?;
        let payload = self.call(board.command(opcode::VERSION), Bytes::new(), self.config.default_timeout)?;
        Ok(BoardVersion::parse(&payload))
    }

    /// Versions of every connected board.
    pub fn versions(&self) -> Vec<(Board, Result<BoardVersion>)> {
        Board::ALL
            .into_iter()
            .filter(|b| self.is_connected(*b))
            .map(|b| (b, self.version(b)))
            .collect()
    }

    /// Ask for a status report. The reply arrives through `on_ready_read`.
    pub fn request_status(&self, board: Board) -> Result<()> {
        self.require(board)?;
        self.send(board.command(opcode::STATUS), Bytes::new())
    }

    /// Start the hardware self-check on every connected board.
    pub fn self_check(&self) -> Result<()> {
        for board in Board::ALL {
            if self.is_connected(board) {
                self.send(board.command(opcode::HW_RESET), Bytes::new())?;
            }
        }
        Ok(())
    }

    /// Reset a board and log back in once it has come up.
    pub fn reboot(&self, board: Board) -> Result<bool> {
        self.send(board.command(opcode::RESET), Bytes::new())?;
        self.state.set(board, false);
        info!("{} board rebooting", board);
        thread::sleep(self.config.reboot_delay);
        Ok(self.login_with_timeout(board, self.config.reboot_login_timeout))
    }

    /// Stop both threads and release the transport. Idempotent.
    pub fn close(&mut self) {
        self.running.store(false, Ordering::Release);
        self.table.close();
        for handle in [self.reader.take(), self.parser.take()].into_iter().flatten() {
            if handle.join().is_err() {
                error!("Link thread panicked");
            }
        }
        self.writer.close();
        self.state.clear();
        debug!("Link closed");
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_login_timestamp() {
        let now = NaiveDate::from_ymd_opt(2024, 5, 17)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap();
        assert_eq!(login_timestamp(now), [24, 5, 17, 9, 30, 0]);
    }

    #[test]
    fn test_version_parse() {
        let v = BoardVersion::parse(b"SN0042;HW1.1;DroSIG_1.2.3.4");
        assert_eq!(v.serial_number, "SN0042");
        assert_eq!(v.hardware_version, "HW1.1");
        assert_eq!(v.software_version, "DroSIG_1.2.3.4");
    }

    #[test]
    fn test_version_parse_fallback() {
        let v = BoardVersion::parse(b"boot-2.0\0");
        assert_eq!(v.serial_number, "");
        assert_eq!(v.software_version, "boot-2.0");
    }

    #[test]
    fn test_connection_state() {
        let state = ConnectionState::default();
        state.set(Board::Motor, true);
        assert!(state.is_connected(Board::Motor));
        assert!(!state.is_connected(Board::Signal));
        state.clear();
        assert!(!state.is_connected(Board::Motor));
    }
}
