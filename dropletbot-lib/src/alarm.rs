//! Alarm reports pushed by either board.
//!
//! The payload is UTF-8 text, entries separated by `;`. Entries that carry a
//! known alarm code (`A0xxx` / `B0xxx`) are translated; anything else is kept
//! as sent.

use strum_macros::{Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum AlarmCode {
    #[strum(serialize = "A0100", to_string = "Motor board hardware alarm")]
    MotorHardware,
    #[strum(serialize = "A0200", to_string = "Temperature sensor fault")]
    TempSensorFault,
    #[strum(serialize = "B0100", to_string = "Chip stall")]
    ChipStall,
    #[strum(serialize = "B0101", to_string = "Over current")]
    OverCurrent,
    #[strum(serialize = "B0102", to_string = "Over temperature")]
    OverTemperature,
    #[strum(serialize = "B0103", to_string = "Over step")]
    OverStep,
    #[strum(serialize = "B0200", to_string = "Endstop triggered")]
    EndstopTriggered,
}

const CODE_LEN: usize = 5;

/// Find an alarm code in an entry and describe it.
fn describe(entry: &str) -> String {
    let start = entry.find("A0").or_else(|| entry.find("B0"));
    let Some(start) = start else {
        return entry.to_string();
    };
    let code: String = entry[start..].chars().take(CODE_LEN).collect();
    match code.parse::<AlarmCode>() {
        Ok(alarm) => alarm.to_string(),
        Err(_) => format!("Unknown alarm code: {}", code),
    }
}

/// Split an alarm report payload into human-readable entries.
pub fn parse_report(payload: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(payload)
        .split(';')
        .map(|entry| entry.trim_matches(|c: char| c.is_whitespace() || c == '\0'))
        .filter(|entry| !entry.is_empty())
        .map(describe)
        .collect()
}
