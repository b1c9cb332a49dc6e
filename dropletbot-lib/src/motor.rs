//! Motor board: stepper control and the tray macro.

use crate::command::{Board, opcode};
use crate::error::{LinkError, Result};
use crate::link::Link;
use bytes::{BufMut, Bytes, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::Serialize;
use std::fmt;
use strum_macros::{Display, EnumString};

/// Positions at or below this value mean the board lost track of the axis.
pub const POSITION_ERROR_LIMIT: i32 = -10_000_000;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, TryFromPrimitive, IntoPrimitive, Serialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum MotorId {
    Tray = 0,
    Pmt = 1,
    Magnet = 2,
    Filter = 3,
    PogoLeft = 4,
    PogoRight = 5,
}

impl MotorId {
    pub const ALL: [MotorId; 6] = [
        MotorId::Tray,
        MotorId::Pmt,
        MotorId::Magnet,
        MotorId::Filter,
        MotorId::PogoLeft,
        MotorId::PogoRight,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, IntoPrimitive)]
#[strum(serialize_all = "lowercase")]
#[repr(u8)]
pub enum MotorAction {
    Absolute = 0,
    Relative = 1,
    Stop = 3,
    Home = 4,
}

/// Result code of a motor move, as reported by the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MotorStatus {
    Normal,
    Busy,
    Stuck,
    MoveTimedOut,
    NotHomed,
    ChipError,
    CoilOpen,
    CoilShorted,
    OverTemperatureWarning,
    OverTemperature,
    PowerShort,
    HomeNotTriggered,
    HomeStuckTriggered,
    OverForwardLimit,
    OverReverseLimit,
    PositionError,
    Unknown(i8),
}

impl From<i8> for MotorStatus {
    fn from(code: i8) -> Self {
        match code {
            0 => MotorStatus::Normal,
            -7 => MotorStatus::Busy,
            -6 => MotorStatus::Stuck,
            -2 => MotorStatus::MoveTimedOut,
            -1 => MotorStatus::NotHomed,
            -101 => MotorStatus::ChipError,
            -102 => MotorStatus::CoilOpen,
            -103 => MotorStatus::CoilShorted,
            -104 => MotorStatus::OverTemperatureWarning,
            -105 => MotorStatus::OverTemperature,
            -106 => MotorStatus::PowerShort,
            -9 => MotorStatus::HomeNotTriggered,
            -8 => MotorStatus::HomeStuckTriggered,
            -5 => MotorStatus::OverForwardLimit,
            -4 => MotorStatus::OverReverseLimit,
            -3 => MotorStatus::PositionError,
            other => MotorStatus::Unknown(other),
        }
    }
}

impl MotorStatus {
    /// True for codes that indicate a fault rather than a state.
    pub fn is_error(&self) -> bool {
        !matches!(
            self,
            MotorStatus::Normal | MotorStatus::Busy | MotorStatus::Stuck | MotorStatus::MoveTimedOut | MotorStatus::NotHomed
        )
    }
}

impl fmt::Display for MotorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            MotorStatus::Normal => "Normal",
            MotorStatus::Busy => "Busy",
            MotorStatus::Stuck => "Stuck",
            MotorStatus::MoveTimedOut => "Move Timed Out",
            MotorStatus::NotHomed => "Not Homed",
            MotorStatus::ChipError => "Chip Error",
            MotorStatus::CoilOpen => "A/B Coil Not Connected",
            MotorStatus::CoilShorted => "A/B Coil Shorted",
            MotorStatus::OverTemperatureWarning => "Over Temperature Warning",
            MotorStatus::OverTemperature => "Over Temperature",
            MotorStatus::PowerShort => "Power Short Circuit",
            MotorStatus::HomeNotTriggered => "Home Signal Not Triggered",
            MotorStatus::HomeStuckTriggered => "Home Signal Triggered Continuously",
            MotorStatus::OverForwardLimit => "Motor Over Forward Limit",
            MotorStatus::OverReverseLimit => "Motor Over Reverse Limit",
            MotorStatus::PositionError => "Motor Position Error",
            MotorStatus::Unknown(code) => return write!(f, "Unknown Error ({})", code),
        };
        f.write_str(text)
    }
}

/// Reply to a motor move: `id(1) + status(1, signed) + position(4, BE signed)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MotorReport {
    pub motor: MotorId,
    pub status: MotorStatus,
    pub position: i32,
}

impl MotorReport {
    pub fn parse(expected: MotorId, payload: &[u8]) -> Result<Self> {
        let [id, status, p0, p1, p2, p3] = payload else {
            return Err(LinkError::Protocol(format!(
                "motor reply must be 6 bytes, got {}",
                payload.len()
            )));
        };
        check_id(expected, *id)?;
        Ok(Self {
            motor: expected,
            status: MotorStatus::from(*status as i8),
            position: i32::from_be_bytes([*p0, *p1, *p2, *p3]),
        })
    }

    pub fn position_valid(&self) -> bool {
        self.position > POSITION_ERROR_LIMIT
    }
}

fn check_id(expected: MotorId, got: u8) -> Result<()> {
    if got != u8::from(expected) {
        return Err(LinkError::Protocol(format!(
            "reply for motor {} while commanding {} ({})",
            got,
            expected,
            u8::from(expected)
        )));
    }
    Ok(())
}

impl Link {
    /// Run one motor action and wait for the move to finish.
    pub fn motor_action(&self, motor: MotorId, action: MotorAction, distance: i32) -> Result<MotorReport> {
        self.require(Board::Motor)?;
        let mut buf = BytesMut::with_capacity(6);
        buf.put_u8(motor.into());
        buf.put_u8(action.into());
        buf.put_i32(distance);
        let resp = self.call(
            Board::Motor.command(opcode::MOTOR_CONTROL),
            buf.freeze(),
            self.config().macro_timeout,
        )?;
        MotorReport::parse(motor, &resp)
    }

    pub fn motor_position(&self, motor: MotorId) -> Result<i32> {
        self.require(Board::Motor)?;
        let resp = self.call(
            Board::Motor.command(opcode::MOTOR_POSITION_QUERY),
            Bytes::copy_from_slice(&[motor.into()]),
            self.config().param_timeout,
        )?;
        let &[id, p0, p1, p2, p3] = &resp[..] else {
            return Err(LinkError::Protocol(format!(
                "position reply must be 5 bytes, got {}",
                resp.len()
            )));
        };
        check_id(motor, id)?;
        Ok(i32::from_be_bytes([p0, p1, p2, p3]))
    }

    /// Open (`true`) or close the chip tray. The board answers 0xFF on failure.
    pub fn set_tray(&self, open: bool) -> Result<()> {
        self.require(Board::Motor)?;
        let resp = self.call(
            Board::Motor.command(opcode::CHIP_CABIN_CTRL),
            Bytes::copy_from_slice(&[open as u8]),
            self.config().macro_timeout,
        )?;
        match resp.first() {
            Some(0xFF) => Err(LinkError::Protocol("tray did not reach its position".to_string())),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_motor_names() {
        assert_eq!("pogo_left".parse::<MotorId>().unwrap(), MotorId::PogoLeft);
        assert_eq!(MotorId::PogoRight.to_string(), "pogo_right");
        assert_eq!(MotorId::try_from(2u8).unwrap(), MotorId::Magnet);
        assert_eq!("home".parse::<MotorAction>().unwrap(), MotorAction::Home);
        assert_eq!(u8::from(MotorAction::Stop), 3);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(MotorStatus::from(0), MotorStatus::Normal);
        assert_eq!(MotorStatus::from(-101), MotorStatus::ChipError);
        assert_eq!(MotorStatus::from(-50), MotorStatus::Unknown(-50));
        assert!(MotorStatus::from(-3).is_error());
        assert!(!MotorStatus::from(-7).is_error());
        assert_eq!(MotorStatus::OverForwardLimit.to_string(), "Motor Over Forward Limit");
    }

    #[test]
    fn test_report_parse() {
        // pmt, status -6 (stuck), position -1500
        let payload = [0x01, 0xFA, 0xFF, 0xFF, 0xFA, 0x24];
        let report = MotorReport::parse(MotorId::Pmt, &payload).unwrap();
        assert_eq!(report.status, MotorStatus::Stuck);
        assert_eq!(report.position, -1500);
        assert!(report.position_valid());

        assert!(MotorReport::parse(MotorId::Tray, &payload).is_err());
        assert!(MotorReport::parse(MotorId::Pmt, &payload[..5]).is_err());
    }
}
