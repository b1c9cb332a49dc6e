use crate::constants::*;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Settings for one serial link to the controller.
///
/// Every duration is written in milliseconds when (de)serialised, e.g.
///
/// ```toml
/// port = "/dev/ttyACM0"
/// baud_rate = 115200
/// default_timeout = 1000
/// macro_timeout = 300000
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub port: String,
    pub baud_rate: u32,
    #[serde(with = "millis")]
    pub read_timeout: Duration,
    #[serde(with = "millis")]
    pub idle_sleep: Duration,
    #[serde(with = "millis")]
    pub poll_interval: Duration,
    #[serde(with = "millis")]
    pub default_timeout: Duration,
    #[serde(with = "millis")]
    pub login_timeout: Duration,
    #[serde(with = "millis")]
    pub param_timeout: Duration,
    #[serde(with = "millis")]
    pub macro_timeout: Duration,
    #[serde(with = "millis")]
    pub reboot_delay: Duration,
    #[serde(with = "millis")]
    pub reboot_login_timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: DEFAULT_READ_TIMEOUT,
            idle_sleep: DEFAULT_IDLE_SLEEP,
            poll_interval: DEFAULT_POLL_INTERVAL,
            default_timeout: DEFAULT_CALL_TIMEOUT,
            login_timeout: DEFAULT_LOGIN_TIMEOUT,
            param_timeout: DEFAULT_PARAM_TIMEOUT,
            macro_timeout: DEFAULT_MACRO_TIMEOUT,
            reboot_delay: DEFAULT_REBOOT_DELAY,
            reboot_login_timeout: DEFAULT_REBOOT_LOGIN_TIMEOUT,
        }
    }
}

impl LinkConfig {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            ..Self::default()
        }
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Load from a TOML file; missing keys keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}

/// Knobs for [`Link::upgrade_firmware`](crate::link::Link::upgrade_firmware).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpgradeOptions {
    pub module_id: u8,
    /// 0x01 application, 0x02 bootloader
    pub upgrade_type: u8,
    pub chunk_size: usize,
    #[serde(with = "millis")]
    pub prepare_timeout: Duration,
    #[serde(with = "millis")]
    pub chunk_timeout: Duration,
    #[serde(with = "millis")]
    pub result_timeout: Duration,
}

impl Default for UpgradeOptions {
    fn default() -> Self {
        Self {
            module_id: 0x00,
            upgrade_type: 0x01,
            chunk_size: DEFAULT_CHUNK_SIZE,
            prepare_timeout: DEFAULT_PREPARE_TIMEOUT,
            chunk_timeout: DEFAULT_CHUNK_TIMEOUT,
            result_timeout: DEFAULT_RESULT_TIMEOUT,
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
