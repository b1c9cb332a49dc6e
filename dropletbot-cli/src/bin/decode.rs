use anyhow::{Context, Result};
use clap::Parser;
use dropletbot_lib::alarm;
use dropletbot_lib::command::opcode;
use dropletbot_lib::crc::Crc32;
use dropletbot_lib::frame::{Decoded, decode};
use dropletbot_lib::link::BoardVersion;
use dropletbot_lib::status::BoardStatus;
use std::io::{self, BufRead};

/// Decode hex-dumped DropletBot frames (from arguments, or one dump per line on stdin).
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Hex strings; spaces and colons are ignored
    frames: Vec<String>,
}

fn describe_payload(frame: &dropletbot_lib::frame::Frame) -> Option<String> {
    if frame.payload.is_empty() {
        return None;
    }
    let text = match frame.cmd.opcode() {
        opcode::REPORT_ALARM => format!("alarms: {:?}", alarm::parse_report(&frame.payload)),
        opcode::STATUS => match BoardStatus::parse(frame.cmd, &frame.payload) {
            Ok(status) => format!("{:?}", status),
            Err(e) => format!("status ({})", e),
        },
        opcode::VERSION => format!("{:?}", BoardVersion::parse(&frame.payload)),
        opcode::LOGIN if frame.payload.len() == 1 => match frame.payload[0] {
            0 => "login SUCCESS".to_string(),
            1 => "login FAILURE".to_string(),
            other => format!("login status {}", other),
        },
        _ => return None,
    };
    Some(text)
}

fn decode_dump(line: &str, crc: &Crc32) -> Result<()> {
    let cleaned: String = line.chars().filter(|c| c.is_ascii_hexdigit()).collect();
    if cleaned.is_empty() {
        return Ok(());
    }
    let bytes = hex::decode(&cleaned).with_context(|| format!("Invalid hex: {}", line))?;

    let mut offset = 0;
    while offset < bytes.len() {
        match decode(&bytes[offset..], crc) {
            Ok(Decoded::Frame { frame, consumed }) => {
                let board = frame.cmd.board().map(|b| b.to_string()).unwrap_or_else(|| "?".to_string());
                println!(
                    "{} [{} board] {} msg={} idx={} payload={}",
                    frame.cmd,
                    board,
                    frame.ftype,
                    frame.msg_idx,
                    frame.cmd_idx,
                    hex::encode(&frame.payload)
                );
                if let Some(text) = describe_payload(&frame) {
                    println!("  └─ {}", text);
                }
                offset += consumed;
            }
            Ok(Decoded::Discard(n)) => {
                println!("skipping {} byte(s) of garbage at offset {}", n, offset);
                offset += n;
            }
            Ok(Decoded::Incomplete) => {
                println!("{} trailing byte(s) do not form a complete frame", bytes.len() - offset);
                break;
            }
            Err(e) => {
                println!("bad frame at offset {}: {}", offset, e);
                // skip the magic and rescan
                offset += 1;
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let crc = Crc32::new();

    if cli.frames.is_empty() {
        for line in io::stdin().lock().lines() {
            decode_dump(&line?, &crc)?;
        }
    } else {
        for dump in &cli.frames {
            decode_dump(dump, &crc)?;
        }
    }
    Ok(())
}
