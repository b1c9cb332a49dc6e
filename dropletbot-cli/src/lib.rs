//! Pieces shared by the operator tools.

use anyhow::{Context, Result, bail};
use clap::Args;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use dropletbot_lib::transport::candidate_ports;
use dropletbot_lib::{LinkConfig, LinkEvents, Link};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Where to find the controller.
#[derive(Args, Debug, Clone)]
pub struct ConnectArgs {
    /// Serial port (e.g. /dev/ttyACM0 or COM3). Defaults to the first USB serial port.
    #[arg(short, long)]
    pub port: Option<String>,
    /// Baud rate
    #[arg(short, long)]
    pub baud: Option<u32>,
    /// TOML file with link settings
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

impl ConnectArgs {
    /// Build the link configuration: file first, then command-line overrides.
    pub fn link_config(&self) -> Result<LinkConfig> {
        let mut config = match &self.config {
            Some(path) => {
                LinkConfig::load(path).with_context(|| format!("Failed to load config from {:?}", path))?
            }
            None => LinkConfig::default(),
        };
        if let Some(port) = &self.port {
            config.port = port.clone();
        }
        if let Some(baud) = self.baud {
            config.baud_rate = baud;
        }
        if config.port.is_empty() {
            let ports = candidate_ports().context("Failed to list serial ports")?;
            let Some(first) = ports.first() else {
                bail!("No USB serial port found, pass --port");
            };
            info!("Using {}", first.port_name);
            config.port = first.port_name.clone();
        }
        Ok(config)
    }

    pub fn open(&self, events: Arc<dyn LinkEvents>) -> Result<Link> {
        let config = self.link_config()?;
        let port = config.port.clone();
        Link::open(config, events).with_context(|| format!("Failed to open {}", port))
    }
}

/// Console logging at the requested verbosity, optionally mirrored to a file.
///
/// The console shows bare messages. The file also records the emitting thread
/// so reader and parser traffic can be told apart. `RUST_LOG` overrides `-v`/`-q`.
pub fn setup_logging(log_file: Option<&Path>, verbosity: &Verbosity<InfoLevel>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::builder()
        .with_default_directive(verbosity.tracing_level_filter().into())
        .from_env_lossy();
    let console = fmt::layer().with_writer(std::io::stderr).with_target(false).without_time();

    let (file, guard) = match log_file {
        Some(path) => {
            let log = File::create(path).with_context(|| format!("Failed to create log file at: {:?}", path))?;
            let (writer, guard) = tracing_appender::non_blocking(log);
            let layer = fmt::layer().with_writer(writer).with_ansi(false).with_thread_names(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()
        .context("Logging is already initialised")?;

    if let Some(path) = log_file {
        info!("Logging to file: {:?}", path);
    }
    Ok(guard)
}
