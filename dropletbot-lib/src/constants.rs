// Protocol constants for the DropletBot serial link

use std::time::Duration;

/// Start-of-frame marker
pub const MAGIC: u16 = 0x7CF1;

/// First byte of the start-of-frame marker on the wire
pub const MAGIC_HI: u8 = (MAGIC >> 8) as u8;

/// Second byte of the start-of-frame marker on the wire
pub const MAGIC_LO: u8 = (MAGIC & 0xFF) as u8;

/// magic(2) + length(2) + msg_idx(2) + cmd_idx(2) + cmd(2) + ftype(1)
pub const HEADER_SIZE: usize = 11;

/// Size of the trailing CRC-32
pub const CRC_SIZE: usize = 4;

/// Bytes needed before the length field can be read
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Largest payload whose frame length still fits the u16 length field
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize - HEADER_SIZE;

pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Serial read timeout; the reader treats an expired read as idle
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(10);

/// How long the reader and parser threads sleep when there is nothing to do
pub const DEFAULT_IDLE_SLEEP: Duration = Duration::from_millis(1);

/// Upper bound on how long a waiting caller sleeps between table checks
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_LOGIN_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_PARAM_TIMEOUT: Duration = Duration::from_secs(5);

/// Motor macros (tray, long moves) can take minutes on the device
pub const DEFAULT_MACRO_TIMEOUT: Duration = Duration::from_secs(300);

pub const DEFAULT_REBOOT_DELAY: Duration = Duration::from_secs(3);
pub const DEFAULT_REBOOT_LOGIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Firmware bytes carried by one transfer frame
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

pub const DEFAULT_PREPARE_TIMEOUT: Duration = Duration::from_secs(30);

/// Flash writes on the device can stall for many seconds
pub const DEFAULT_CHUNK_TIMEOUT: Duration = Duration::from_secs(30);

pub const DEFAULT_RESULT_TIMEOUT: Duration = Duration::from_secs(10);

/// module_id(1) + total_frames(2) + frame_index(2)
pub const TRANSFER_HEADER_SIZE: usize = 5;

/// Number of addressable electrodes on the signal board
pub const ELECTRODE_COUNT: usize = 120;

/// Size of the electrode state bitmap sent to the signal board
pub const ELECTRODE_PAYLOAD_SIZE: usize = 16;

/// Firmware tags embedded in release images
pub const SIGNAL_FIRMWARE_TAG: &[u8] = b"DroSIG";
pub const MOTOR_FIRMWARE_TAG: &[u8] = b"DroDri";

/// Length of a full version tag such as `DroSIG_1.2.3.4`
pub const FIRMWARE_VERSION_TAG_LEN: usize = 14;
