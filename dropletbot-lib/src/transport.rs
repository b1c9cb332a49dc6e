//! Byte transports the link can run over.
//!
//! The engine only needs a reader half for the background reader thread and a
//! writer half shared by callers and the dispatcher. A serial port provides
//! both through `try_clone`; [`MemoryPort`] provides an in-process pair.

use crate::config::LinkConfig;
use crate::crc::Crc32;
use crate::error::{LinkError, Result};
use crate::frame::Frame;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

pub type TransportReader = Box<dyn Read + Send>;
pub type TransportWriter = Box<dyn Write + Send>;

/// Open the configured serial port and split it into reader and writer halves.
pub fn open_serial(config: &LinkConfig) -> Result<(TransportReader, TransportWriter)> {
    info!(port = %config.port, baud = config.baud_rate, "Opening serial port");
    let port = serialport::new(&config.port, config.baud_rate)
        .timeout(config.read_timeout)
        .open()?;
    let writer = port.try_clone()?;
    Ok((Box::new(port), Box::new(writer)))
}

/// Serial ports that look like a controller (USB CDC or USB-serial bridges).
pub fn candidate_ports() -> Result<Vec<serialport::SerialPortInfo>> {
    let ports = serialport::available_ports()?;
    Ok(ports
        .into_iter()
        .filter(|p| matches!(p.port_type, serialport::SerialPortType::UsbPort(_)))
        .collect())
}

/// The write half, shared by callers and the dispatcher.
///
/// Each frame is encoded and written under one lock so two frames never
/// interleave on the wire. A failed write means the transport is gone and is
/// reported as [`LinkError::TransportLost`].
pub struct FrameWriter {
    port: Mutex<Option<TransportWriter>>,
    crc: Crc32,
}

impl FrameWriter {
    pub fn new(port: TransportWriter) -> Self {
        Self {
            port: Mutex::new(Some(port)),
            crc: Crc32::new(),
        }
    }

    /// Drop the port handle. Later sends fail with `TransportLost`.
    pub fn close(&self) {
        let mut port = self.port.lock().unwrap_or_else(|e| e.into_inner());
        if port.take().is_some() {
            debug!("Writer closed");
        }
    }

    pub fn send(&self, frame: &Frame) -> Result<()> {
        let bytes = frame.encode(&self.crc)?;
        debug!(
            cmd = %frame.cmd,
            ftype = %frame.ftype,
            msg_idx = frame.msg_idx,
            cmd_idx = frame.cmd_idx,
            bytes = hex::encode(&bytes),
            "TX"
        );
        let mut guard = self
            .port
            .lock()
            .map_err(|_| LinkError::TransportLost("writer lock poisoned".to_string()))?;
        let port = guard
            .as_mut()
            .ok_or_else(|| LinkError::TransportLost("writer is closed".to_string()))?;
        port.write_all(&bytes)
            .and_then(|_| port.flush())
            .map_err(|e| LinkError::TransportLost(format!("write failed: {}", e)))
    }
}

#[derive(Debug, Default)]
struct Pipe {
    bytes: VecDeque<u8>,
    closed: bool,
}

type SharedPipe = Arc<Mutex<Pipe>>;

fn lock(pipe: &SharedPipe) -> io::Result<std::sync::MutexGuard<'_, Pipe>> {
    pipe.lock()
        .map_err(|_| io::Error::new(io::ErrorKind::Other, "memory port lock poisoned"))
}

/// One end of an in-memory full-duplex byte link.
///
/// Reads never block: an empty pipe reads as `Ok(0)`, which the reader thread
/// treats as idle. After [`MemoryPort::disconnect`] both directions fail with
/// `BrokenPipe`, the same way a yanked USB-serial adapter does.
#[derive(Clone, Debug)]
pub struct MemoryPort {
    rx: SharedPipe,
    tx: SharedPipe,
}

impl MemoryPort {
    /// Create a connected `(host, device)` pair.
    pub fn pair() -> (MemoryPort, MemoryPort) {
        let a: SharedPipe = Arc::default();
        let b: SharedPipe = Arc::default();
        let host = MemoryPort {
            rx: a.clone(),
            tx: b.clone(),
        };
        let device = MemoryPort { rx: b, tx: a };
        (host, device)
    }

    /// Split into boxed halves suitable for [`Link::with_transport`](crate::link::Link::with_transport).
    pub fn split(self) -> (TransportReader, TransportWriter) {
        (Box::new(self.clone()), Box::new(self))
    }

    /// Break the link in both directions.
    pub fn disconnect(&self) {
        for pipe in [&self.rx, &self.tx] {
            if let Ok(mut p) = pipe.lock() {
                p.closed = true;
            }
        }
    }

    /// Number of bytes waiting to be read on this end.
    pub fn available(&self) -> usize {
        self.rx.lock().map(|p| p.bytes.len()).unwrap_or(0)
    }
}

impl Read for MemoryPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut pipe = lock(&self.rx)?;
        if pipe.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "memory port disconnected"));
        }
        let n = buf.len().min(pipe.bytes.len());
        for (slot, byte) in buf.iter_mut().zip(pipe.bytes.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MemoryPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut pipe = lock(&self.tx)?;
        if pipe.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "memory port disconnected"));
        }
        pipe.bytes.extend(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
