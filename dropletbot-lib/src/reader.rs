//! Producer side: drain the transport into the shared receive buffer.

use crate::transport::TransportReader;
use bytes::BytesMut;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, trace};

const READ_CHUNK: usize = 256;

/// Bytes received but not yet framed. Filled by the reader, drained by the parser.
#[derive(Debug, Default)]
pub struct RxBuffer {
    bytes: Mutex<BytesMut>,
}

impl RxBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, data: &[u8]) {
        self.lock().extend_from_slice(data);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn lock(&self) -> std::sync::MutexGuard<'_, BytesMut> {
        self.bytes.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Why the reader loop ended.
#[derive(Debug)]
pub enum ReaderExit {
    Stopped,
    Lost(std::io::Error),
}

/// Run until `running` is cleared or the transport fails.
///
/// Empty reads and read timeouts count as idle and sleep `idle_sleep`. Any
/// other error ends the loop with [`ReaderExit::Lost`]; the caller reports it.
pub fn run(mut port: TransportReader, buffer: Arc<RxBuffer>, running: Arc<AtomicBool>, idle_sleep: Duration) -> ReaderExit {
    info!("Reader thread started");
    let mut chunk = [0u8; READ_CHUNK];
    let exit = loop {
        if !running.load(Ordering::Acquire) {
            break ReaderExit::Stopped;
        }
        match port.read(&mut chunk) {
            Ok(0) => thread::sleep(idle_sleep),
            Ok(n) => {
                trace!(bytes = hex::encode(&chunk[..n]), "RX");
                buffer.push(&chunk[..n]);
            }
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                thread::sleep(idle_sleep);
            }
            Err(e) => {
                error!("Serial read failed: {}", e);
                break ReaderExit::Lost(e);
            }
        }
    };
    debug!(?exit, "Reader thread stopped");
    exit
}
