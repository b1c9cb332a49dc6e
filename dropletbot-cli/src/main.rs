use anyhow::{Result, bail};
use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use dropletbot_cli::{ConnectArgs, setup_logging};
use dropletbot_lib::{Board, LogEvents};
use std::sync::Arc;
use tracing::{info, warn};

/// Connect to a DropletBot controller, log into both boards and print their versions.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    connect: ConnectArgs,
    /// Print versions as JSON
    #[arg(long)]
    json: bool,
    /// Also start the hardware self-check on every connected board
    #[arg(long)]
    self_check: bool,
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = setup_logging(None, &cli.verbose)?;

    let link = cli.connect.open(Arc::new(LogEvents))?;
    info!("Connected to {}", link.config().port);

    let (signal, motor) = link.login();
    if !signal && !motor {
        bail!("Neither board accepted the login");
    }

    let mut versions = serde_json::Map::new();
    for (board, version) in link.versions() {
        match version {
            Ok(version) if cli.json => {
                versions.insert(board.to_string().to_lowercase(), serde_json::to_value(&version)?);
            }
            Ok(version) => {
                println!("{} board", board);
                println!("  Serial number:    {}", version.serial_number);
                println!("  Hardware version: {}", version.hardware_version);
                println!("  Software version: {}", version.software_version);
            }
            Err(e) => warn!("Failed to read {} board version: {}", board, e),
        }
    }
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&versions)?);
    }

    for board in Board::ALL {
        if !link.is_connected(board) {
            warn!("{} board is not connected", board);
        }
    }

    if cli.self_check {
        link.self_check()?;
        info!("Self-check started");
    }

    Ok(())
}
