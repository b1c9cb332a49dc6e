pub mod alarm;
pub mod command;
pub mod config;
pub mod constants;
pub mod crc;
pub mod dispatch;
pub mod electrode;
pub mod error;
pub mod frame;
pub mod link;
pub mod motor;
pub mod pending;
pub mod reader;
pub mod status;
pub mod transport;
pub mod upgrade;


// Re-export the main entry points for easy access
pub use command::{Board, Command};
pub use config::{LinkConfig, UpgradeOptions};
pub use dispatch::{LinkEvents, LogEvents, NoEvents};
pub use error::{LinkError, Result};
pub use link::{BoardVersion, Link};
