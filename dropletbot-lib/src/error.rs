use crate::command::{Board, Command};
use crate::frame::FrameType;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// The primary error type for the `dropletbot-lib` library.
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The device disappeared or the link was shut down. No further call can succeed.
    #[error("Transport lost: {0}")]
    TransportLost(String),

    #[error("Framing error: {0}")]
    Framing(String),

    #[error("Checksum mismatch for {cmd}: frame carries {received:#010x}, computed {computed:#010x}")]
    Checksum {
        cmd: Command,
        msg_idx: u16,
        cmd_idx: u16,
        received: u32,
        computed: u32,
    },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Device answered {cmd} with `{ftype}`")]
    Rejected { cmd: Command, ftype: FrameType },

    #[error("Timeout after {waited:?} waiting for {cmd}")]
    Timeout { cmd: Command, waited: Duration },

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("{0} board is not connected")]
    NotConnected(Board),

    #[error("Firmware upgrade failed: {0}")]
    Upgrade(String),

    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, LinkError>;

/// Numeric codes handed to [`LinkEvents::on_error`](crate::dispatch::LinkEvents::on_error).
///
/// Device-reported failures use the raw frame type byte instead.
pub struct ErrorCode;

impl ErrorCode {
    pub const TRANSPORT_LOST: i32 = -1;
    pub const TIMEOUT: i32 = -2;
    pub const CHECKSUM: i32 = -3;

    pub fn for_frame_type(ftype: FrameType) -> i32 {
        i32::from(u8::from(ftype))
    }
}

impl LinkError {
    /// True for errors after which the link cannot be used again.
    pub fn is_fatal(&self) -> bool {
        matches!(self, LinkError::TransportLost(_) | LinkError::Serial(_))
    }
}
