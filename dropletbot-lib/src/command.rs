//! Command identifiers.
//!
//! A command is a `u16` whose high byte selects the board and whose low byte
//! selects the operation on that board. Both boards share the management
//! opcodes (login, version, firmware transfer, ...).

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use std::fmt;
use strum_macros::{Display, EnumString};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, TryFromPrimitive, IntoPrimitive, Serialize, Deserialize,
)]
#[strum(ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Board {
    #[strum(to_string = "Motor", serialize = "motor")]
    Motor = 0x11,
    #[strum(to_string = "Signal", serialize = "signal")]
    Signal = 0x12,
}

impl Board {
    pub const ALL: [Board; 2] = [Board::Signal, Board::Motor];

    pub fn command(self, opcode: u8) -> Command {
        Command::new(self, opcode)
    }
}

/// Operation codes, the low byte of a [`Command`].
pub mod opcode {
    // Shared by both boards
    pub const RESET: u8 = 0x00;
    pub const LOGIN: u8 = 0x01;
    pub const VERSION: u8 = 0x02;
    pub const HW_RESET: u8 = 0x03;
    pub const STATUS: u8 = 0x04;
    pub const DATA_REPORT: u8 = 0x05;
    pub const SET_PARAMS: u8 = 0x60;
    pub const GET_PARAMS: u8 = 0x61;
    pub const PRESET_PARAMS: u8 = 0x62;
    pub const REPORT_LOG: u8 = 0x70;
    pub const SET_LOG_LEVEL: u8 = 0x71;
    pub const REPORT_ALARM: u8 = 0x72;
    pub const SET_ALARM_LEVEL: u8 = 0x73;
    pub const FW_PREPARE: u8 = 0x80;
    pub const FW_TRANSFER: u8 = 0x81;
    pub const FW_RESULT: u8 = 0x82;

    // Signal board
    pub const RGB_LIGHT_CTRL: u8 = 0x21;
    pub const ILLUMINATION_CTRL: u8 = 0x22;
    pub const ELECTRODE_SET_VOLT: u8 = 0x24;
    pub const ELECTRODE_STATE: u8 = 0x25;
    pub const ELECTRODE_SET_FREQ: u8 = 0x26;
    pub const CAP_CALIBRATE: u8 = 0x31;
    pub const CAP_READ_ALL: u8 = 0x32;
    pub const LOADED_SHORT_DETECT: u8 = 0xAC;

    // Motor board
    pub const CHIP_CABIN_CTRL: u8 = 0x20;
    pub const CHIP_CABIN_READ: u8 = 0x21;
    pub const MAG_CTRL: u8 = 0x22;
    pub const MAG_READ: u8 = 0x23;
    pub const PUSHPAD_CTRL: u8 = 0x24;
    pub const PUSHPAD_READ: u8 = 0x25;
    pub const FLUORESCENCE_CTRL: u8 = 0x26;
    pub const FLUORESCENCE_READ: u8 = 0x27;
    pub const MOTOR_CONTROL: u8 = 0xB0;
    pub const MOTOR_SPEED_SET: u8 = 0xB1;
    pub const MOTOR_POSITION_QUERY: u8 = 0xB3;
    pub const MOTOR_OPTO_QUERY: u8 = 0xB4;
}

/// A 16-bit command identifier as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Command(pub u16);

impl Command {
    pub const fn new(board: Board, opcode: u8) -> Self {
        Command(((board as u16) << 8) | opcode as u16)
    }

    /// The board namespace, or `None` for a high byte no board owns.
    pub fn board(self) -> Option<Board> {
        Board::try_from((self.0 >> 8) as u8).ok()
    }

    pub fn opcode(self) -> u8 {
        (self.0 & 0xFF) as u8
    }

    pub fn is_alarm_report(self) -> bool {
        self.opcode() == opcode::REPORT_ALARM
    }

    pub fn to_be_bytes(self) -> [u8; 2] {
        self.0.to_be_bytes()
    }
}

impl From<u16> for Command {
    fn from(value: u16) -> Self {
        Command(value)
    }
}

impl From<Command> for u16 {
    fn from(cmd: Command) -> Self {
        cmd.0
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cmd {:#06X}", self.0)
    }
}
