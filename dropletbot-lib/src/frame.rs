//! Wire frame codec.
//!
//! ```text
//! [2B magic][2B length][2B msg_idx][2B cmd_idx][2B cmd][1B ftype][payload...][4B crc32]
//! ```
//!
//! All integers are big-endian. `length` counts magic through payload, not the
//! trailing CRC. The CRC covers every byte before it.

use crate::command::Command;
use crate::constants::{CRC_SIZE, HEADER_SIZE, LENGTH_PREFIX_SIZE, MAGIC, MAGIC_HI, MAGIC_LO, MAX_PAYLOAD_SIZE};
use crate::crc::Crc32;
use crate::error::{LinkError, Result};
use bytes::{BufMut, Bytes, BytesMut};
use num_enum::{FromPrimitive, IntoPrimitive};
use std::fmt;
use std::sync::atomic::{AtomicU16, Ordering};
use zerocopy::byteorder::big_endian::U16;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum FrameType {
    /// ACK: the receiver's checksum passed
    AckOk = 0x00,
    /// ACK: the receiver's checksum failed
    AckFail = 0x01,
    RespOk = 0xF0,
    RespFail = 0xF1,
    RespBusy = 0xF2,
    RespErr = 0xF3,
    RespUnknown = 0xF4,
    RespTimeout = 0xF5,
    Req = 0xFF,

    /// Any other byte. Only the carried value goes on the wire.
    #[num_enum(catch_all)]
    Unknown(u8) = 0x02,
}

impl FrameType {
    pub fn is_response(&self) -> bool {
        matches!(
            self,
            FrameType::RespOk
                | FrameType::RespFail
                | FrameType::RespBusy
                | FrameType::RespErr
                | FrameType::RespUnknown
                | FrameType::RespTimeout
        )
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameType::AckOk => write!(f, "ACK OK"),
            FrameType::AckFail => write!(f, "ACK FAIL"),
            FrameType::RespOk => write!(f, "SUCCESS"),
            FrameType::RespFail => write!(f, "FAIL"),
            FrameType::RespBusy => write!(f, "BUSY"),
            FrameType::RespErr => write!(f, "CMD ERROR"),
            FrameType::RespUnknown => write!(f, "UNKNOWN CMD"),
            FrameType::RespTimeout => write!(f, "TIMEOUT"),
            FrameType::Req => write!(f, "REQUEST"),
            FrameType::Unknown(raw) => write!(f, "UNDEFINED ({raw:#04x})"),
        }
    }
}

/// The fixed 11-byte frame header as laid out on the wire.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct FrameHeaderRaw {
    pub magic: U16,
    pub length: U16,
    pub msg_idx: U16,
    pub cmd_idx: U16,
    pub cmd: U16,
    pub ftype: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub msg_idx: u16,
    pub cmd_idx: u16,
    pub cmd: Command,
    pub ftype: FrameType,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(cmd: Command, ftype: FrameType, msg_idx: u16, cmd_idx: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            msg_idx,
            cmd_idx,
            cmd,
            ftype,
            payload: payload.into(),
        }
    }

    /// An empty acknowledgement echoing this frame's sequence numbers.
    pub fn ack(&self, ftype: FrameType) -> Frame {
        Frame::new(self.cmd, ftype, self.msg_idx, self.cmd_idx, Bytes::new())
    }

    /// Value of the `length` field for this frame.
    pub fn wire_length(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Serialize the frame, computing `length` and the trailing CRC.
    pub fn encode(&self, crc: &Crc32) -> Result<Bytes> {
        if self.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(LinkError::Validation(format!(
                "payload of {} bytes exceeds the {} byte frame limit",
                self.payload.len(),
                MAX_PAYLOAD_SIZE
            )));
        }

        let length = self.wire_length();
        let header = FrameHeaderRaw {
            magic: U16::new(MAGIC),
            length: U16::new(length as u16),
            msg_idx: U16::new(self.msg_idx),
            cmd_idx: U16::new(self.cmd_idx),
            cmd: U16::new(self.cmd.0),
            ftype: self.ftype.into(),
        };

        let mut buf = BytesMut::with_capacity(length + CRC_SIZE);
        buf.extend_from_slice(header.as_bytes());
        buf.extend_from_slice(&self.payload);
        let checksum = crc.checksum(&buf);
        buf.put_u32(checksum);
        Ok(buf.freeze())
    }

    /// Parse one complete frame (header, payload and CRC, nothing more).
    ///
    /// The CRC is checked before anything else is trusted; a mismatch yields
    /// [`LinkError::Checksum`] carrying the header fields needed to NACK.
    pub fn parse(raw: &[u8], crc: &Crc32) -> Result<Frame> {
        if raw.len() < HEADER_SIZE + CRC_SIZE {
            return Err(LinkError::Framing(format!(
                "frame too short: {} bytes, need at least {}",
                raw.len(),
                HEADER_SIZE + CRC_SIZE
            )));
        }
        let (header, _) = FrameHeaderRaw::ref_from_prefix(raw)
            .map_err(|_| LinkError::Framing("failed to read frame header".to_string()))?;

        if header.magic.get() != MAGIC {
            return Err(LinkError::Framing(format!("bad magic {:#06x}", header.magic.get())));
        }
        let length = header.length.get() as usize;
        if length < HEADER_SIZE || length + CRC_SIZE != raw.len() {
            return Err(LinkError::Framing(format!(
                "length field {} does not match {} buffered bytes",
                length,
                raw.len()
            )));
        }

        let (body, trailer) = raw.split_at(length);
        let received = u32::from_be_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        let computed = crc.checksum(body);
        let cmd = Command(header.cmd.get());
        if received != computed {
            return Err(LinkError::Checksum {
                cmd,
                msg_idx: header.msg_idx.get(),
                cmd_idx: header.cmd_idx.get(),
                received,
                computed,
            });
        }

        Ok(Frame {
            msg_idx: header.msg_idx.get(),
            cmd_idx: header.cmd_idx.get(),
            cmd,
            ftype: FrameType::from_primitive(header.ftype),
            payload: Bytes::copy_from_slice(&body[HEADER_SIZE..]),
        })
    }
}

/// What the front of a receive buffer holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scan {
    /// Not enough bytes yet to know where the frame ends.
    Incomplete,
    /// Drop this many leading bytes and scan again.
    Discard(usize),
    /// A full frame (including CRC) of this many bytes is buffered.
    Complete(usize),
}

/// Locate frame boundaries without touching the CRC.
///
/// Resynchronisation is one byte at a time: a wrong first magic byte, a wrong
/// second magic byte or an impossible length each discard exactly one byte.
pub fn scan(buf: &[u8]) -> Scan {
    match buf.first() {
        None => return Scan::Incomplete,
        Some(&b) if b != MAGIC_HI => return Scan::Discard(1),
        Some(_) => {}
    }
    if buf.len() < LENGTH_PREFIX_SIZE {
        return Scan::Incomplete;
    }
    if buf[1] != MAGIC_LO {
        return Scan::Discard(1);
    }
    let length = u16::from_be_bytes([buf[2], buf[3]]) as usize;
    if length < HEADER_SIZE {
        return Scan::Discard(1);
    }
    let total = length + CRC_SIZE;
    if buf.len() < total {
        Scan::Incomplete
    } else {
        Scan::Complete(total)
    }
}

/// Outcome of [`decode`].
#[derive(Debug, PartialEq)]
pub enum Decoded {
    Frame { frame: Frame, consumed: usize },
    Discard(usize),
    Incomplete,
}

/// Try to extract exactly one frame from the front of `buf`.
///
/// On a checksum failure the error is returned and the caller should drop the
/// frame's bytes (`length + 4`) before continuing.
pub fn decode(buf: &[u8], crc: &Crc32) -> Result<Decoded> {
    match scan(buf) {
        Scan::Incomplete => Ok(Decoded::Incomplete),
        Scan::Discard(n) => Ok(Decoded::Discard(n)),
        Scan::Complete(total) => {
            let frame = Frame::parse(&buf[..total], crc)?;
            Ok(Decoded::Frame { frame, consumed: total })
        }
    }
}

/// The two independent sequence counters stamped on outgoing requests.
#[derive(Debug, Default)]
pub struct Sequencer {
    msg_idx: AtomicU16,
    cmd_idx: AtomicU16,
}

impl Sequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current `(msg_idx, cmd_idx)` and advances both, wrapping at 0xFFFF.
    pub fn next(&self) -> (u16, u16) {
        let msg = self.msg_idx.fetch_add(1, Ordering::Relaxed);
        let cmd = self.cmd_idx.fetch_add(1, Ordering::Relaxed);
        (msg, cmd)
    }

    /// A request frame carrying the next sequence numbers.
    pub fn request(&self, cmd: Command, payload: impl Into<Bytes>) -> Frame {
        let (msg_idx, cmd_idx) = self.next();
        Frame::new(cmd, FrameType::Req, msg_idx, cmd_idx, payload)
    }
}
