//! Signal board: electrode drive and chip checks.

use crate::command::{Board, opcode};
use crate::constants::{ELECTRODE_COUNT, ELECTRODE_PAYLOAD_SIZE};
use crate::error::{LinkError, Result};
use crate::link::Link;
use bytes::Bytes;
use serde::Serialize;

/// On/off state of every electrode, packed the way the board expects:
/// electrode `n` is bit `n % 8` of byte `n / 8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ElectrodeStates {
    bits: [u8; ELECTRODE_PAYLOAD_SIZE],
}

impl ElectrodeStates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the indices of the electrodes to switch on.
    pub fn from_active(active: impl IntoIterator<Item = usize>) -> Result<Self> {
        let mut states = Self::new();
        for id in active {
            states.set(id, true)?;
        }
        Ok(states)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let bits: [u8; ELECTRODE_PAYLOAD_SIZE] = bytes.try_into().map_err(|_| {
            LinkError::Validation(format!(
                "electrode state must be {} bytes, got {}",
                ELECTRODE_PAYLOAD_SIZE,
                bytes.len()
            ))
        })?;
        Ok(Self { bits })
    }

    fn check(id: usize) -> Result<()> {
        if id >= ELECTRODE_COUNT {
            return Err(LinkError::Validation(format!(
                "electrode {} out of range 0..{}",
                id, ELECTRODE_COUNT
            )));
        }
        Ok(())
    }

    pub fn set(&mut self, id: usize, on: bool) -> Result<()> {
        Self::check(id)?;
        let mask = 1 << (id % 8);
        if on {
            self.bits[id / 8] |= mask;
        } else {
            self.bits[id / 8] &= !mask;
        }
        Ok(())
    }

    pub fn get(&self, id: usize) -> bool {
        id < ELECTRODE_COUNT && self.bits[id / 8] & (1 << (id % 8)) != 0
    }

    pub fn active(&self) -> impl Iterator<Item = usize> + '_ {
        (0..ELECTRODE_COUNT).filter(|id| self.get(*id))
    }

    pub fn as_bytes(&self) -> &[u8; ELECTRODE_PAYLOAD_SIZE] {
        &self.bits
    }
}

/// Result of the loaded/short detection command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChipCheck {
    pub loaded: bool,
    pub shorted: bool,
}

impl ChipCheck {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        match payload {
            [loaded, shorted, ..] => Ok(Self {
                loaded: *loaded == 1,
                shorted: *shorted == 1,
            }),
            _ => Err(LinkError::Protocol(format!(
                "short detection reply needs 2 bytes, got {}",
                payload.len()
            ))),
        }
    }
}

impl Link {
    /// Set the electrode drive voltage. Not acknowledged beyond the frame ACK.
    pub fn set_voltage(&self, volts: u8) -> Result<()> {
        self.require(Board::Signal)?;
        self.send(Board::Signal.command(opcode::ELECTRODE_SET_VOLT), Bytes::copy_from_slice(&[volts]))
    }

    pub fn set_frequency(&self, hz: u16) -> Result<()> {
        self.require(Board::Signal)?;
        self.send(
            Board::Signal.command(opcode::ELECTRODE_SET_FREQ),
            Bytes::copy_from_slice(&hz.to_be_bytes()),
        )
    }

    pub fn set_electrodes(&self, states: &ElectrodeStates) -> Result<()> {
        self.require(Board::Signal)?;
        self.send(
            Board::Signal.command(opcode::ELECTRODE_STATE),
            Bytes::copy_from_slice(states.as_bytes()),
        )
    }

    pub fn set_alarm_level(&self, level: u8) -> Result<()> {
        self.require(Board::Signal)?;
        self.send(Board::Signal.command(opcode::SET_ALARM_LEVEL), Bytes::copy_from_slice(&[level]))
    }

    pub fn set_log_level(&self, level: u8) -> Result<()> {
        self.require(Board::Signal)?;
        self.send(Board::Signal.command(opcode::SET_LOG_LEVEL), Bytes::copy_from_slice(&[level]))
    }

    pub fn detect_shorts(&self) -> Result<ChipCheck> {
        self.require(Board::Signal)?;
        let resp = self.call(
            Board::Signal.command(opcode::LOADED_SHORT_DETECT),
            Bytes::new(),
            self.config().default_timeout,
        )?;
        ChipCheck::parse(&resp)
    }
}
