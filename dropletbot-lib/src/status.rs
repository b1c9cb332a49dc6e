use crate::command::{Board, Command};
use crate::error::{LinkError, Result};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::Serialize;
use strum_macros::Display;
use zerocopy::byteorder::big_endian::U16;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Default, TryFromPrimitive, IntoPrimitive, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u16)]
pub enum BoxLed {
    #[default]
    #[strum(to_string = "off")]
    Off = 0,
    #[strum(to_string = "red")]
    Red = 1,
    #[strum(to_string = "green")]
    Green = 2,
    #[strum(to_string = "yellow")]
    Yellow = 3,
}

/// Signal board STATUS payload as sent on the wire.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct SignalStatusRaw {
    pub cur_temp: U16,    // 0.01 °C
    pub target_temp: U16, // 0.01 °C
    pub out_power: U16,
    pub box_led_state: U16,
    pub light_led_bright: U16,
    pub flu_led_bright: U16,
    pub chip_on_pad: U16,
    pub chip_cap: U16,
    pub chip_shorts: U16,
    pub chip_res: U16,
    pub dev_temp: U16, // 0.01 °C
    pub dev_hum: U16,  // 0.01 %RH
    pub fan_duty: U16,
    pub pmt: U16,
    pub hv_vol: U16, // 0.01 V
    pub hv_freq: U16,
    pub cap_match: U16,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SignalBoardStatus {
    pub cur_temp_c: f64,
    pub target_temp_c: f64,
    pub out_power: u16,
    pub box_led: BoxLed,
    pub light_led_bright: u16,
    pub flu_led_bright: u16,
    pub chip_on_pad: bool,
    pub chip_cap: u16,
    pub chip_shorts: bool,
    pub chip_res: u16,
    pub dev_temp_c: f64,
    pub dev_hum_pct: f64,
    pub fan_duty: u16,
    pub pmt: u16,
    pub hv_volts: f64,
    pub hv_freq: u16,
    pub cap_match: u16,
}

impl From<SignalStatusRaw> for SignalBoardStatus {
    fn from(raw: SignalStatusRaw) -> Self {
        let hundredths = |v: U16| v.get() as f64 / 100.0;
        SignalBoardStatus {
            cur_temp_c: hundredths(raw.cur_temp),
            target_temp_c: hundredths(raw.target_temp),
            out_power: raw.out_power.get(),
            // unknown LED codes show as off
            box_led: BoxLed::try_from(raw.box_led_state.get()).unwrap_or_default(),
            light_led_bright: raw.light_led_bright.get(),
            flu_led_bright: raw.flu_led_bright.get(),
            chip_on_pad: raw.chip_on_pad.get() == 1,
            chip_cap: raw.chip_cap.get(),
            chip_shorts: raw.chip_shorts.get() == 1,
            chip_res: raw.chip_res.get(),
            dev_temp_c: hundredths(raw.dev_temp),
            dev_hum_pct: hundredths(raw.dev_hum),
            fan_duty: raw.fan_duty.get(),
            pmt: raw.pmt.get(),
            hv_volts: hundredths(raw.hv_vol),
            hv_freq: raw.hv_freq.get(),
            cap_match: raw.cap_match.get(),
        }
    }
}

impl SignalBoardStatus {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (raw, _) = SignalStatusRaw::read_from_prefix(payload).map_err(|_| {
            LinkError::Protocol(format!(
                "signal status needs {} bytes, got {}",
                size_of::<SignalStatusRaw>(),
                payload.len()
            ))
        })?;
        Ok(raw.into())
    }
}

/// Motor board STATUS payload: one byte per subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned, Serialize)]
#[repr(C)]
pub struct MotorBoardStatus {
    pub rst: u8,
    pub cabin: u8,
    pub mag: u8,
    pub flu: u8,
    pub lpush: u8,
    pub rpush: u8,
    pub pmt: u8,
}

impl MotorBoardStatus {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (status, _) = MotorBoardStatus::read_from_prefix(payload).map_err(|_| {
            LinkError::Protocol(format!(
                "motor status needs {} bytes, got {}",
                size_of::<MotorBoardStatus>(),
                payload.len()
            ))
        })?;
        Ok(status)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "board", rename_all = "lowercase")]
pub enum BoardStatus {
    Signal(SignalBoardStatus),
    Motor(MotorBoardStatus),
}

impl BoardStatus {
    /// Decode a STATUS payload using the board encoded in `cmd`.
    pub fn parse(cmd: Command, payload: &[u8]) -> Result<Self> {
        match cmd.board() {
            Some(Board::Signal) => SignalBoardStatus::parse(payload).map(BoardStatus::Signal),
            Some(Board::Motor) => MotorBoardStatus::parse(payload).map(BoardStatus::Motor),
            None => Err(LinkError::Protocol(format!("status for unknown board in {}", cmd))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::opcode;

    #[test]
    fn test_signal_status() {
        let mut words = [0u16; 17];
        words[0] = 3712; // cur_temp
        words[1] = 3700;
        words[3] = 2; // green
        words[6] = 1; // chip on pad
        words[8] = 0;
        words[14] = 12050; // hv
        let payload: Vec<u8> = words.iter().flat_map(|w| w.to_be_bytes()).collect();

        let status = SignalBoardStatus::parse(&payload).unwrap();
        assert_eq!(status.cur_temp_c, 37.12);
        assert_eq!(status.target_temp_c, 37.0);
        assert_eq!(status.box_led, BoxLed::Green);
        assert!(status.chip_on_pad);
        assert!(!status.chip_shorts);
        assert_eq!(status.hv_volts, 120.5);
    }

    #[test]
    fn test_short_signal_status() {
        assert!(matches!(SignalBoardStatus::parse(&[0; 10]), Err(LinkError::Protocol(_))));
    }

    #[test]
    fn test_motor_status_by_command() {
        let cmd = Board::Motor.command(opcode::STATUS);
        let status = BoardStatus::parse(cmd, &[0, 1, 0, 1, 0, 0, 1]).unwrap();
        match status {
            BoardStatus::Motor(m) => {
                assert_eq!(m.cabin, 1);
                assert_eq!(m.pmt, 1);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(BoardStatus::parse(Command(0x1304), &[0; 7]).is_err());
    }
}
