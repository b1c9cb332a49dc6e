use anyhow::{Context, Result, bail};
use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use dropletbot_cli::{ConnectArgs, setup_logging};
use dropletbot_lib::upgrade::FirmwareImage;
use dropletbot_lib::{Board, LogEvents, UpgradeOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Flash a firmware image onto the signal or motor board.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Firmware image (.bin)
    firmware: PathBuf,
    #[command(flatten)]
    connect: ConnectArgs,
    /// Target board; detected from the image tag when omitted
    #[arg(long)]
    board: Option<Board>,
    /// Module id sent in the prepare frame
    #[arg(long, default_value_t = 0)]
    module_id: u8,
    /// 1 = application, 2 = bootloader
    #[arg(long, default_value_t = 1)]
    upgrade_type: u8,
    /// Firmware bytes per transfer frame
    #[arg(long, default_value_t = 1024)]
    chunk_size: usize,
    /// Flash even if the board already runs this version
    #[arg(long)]
    force: bool,
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = setup_logging(None, &cli.verbose)?;

    let image = FirmwareImage::load(&cli.firmware)
        .with_context(|| format!("Failed to read firmware file {:?}", cli.firmware))?;
    let board = match (cli.board, image.board) {
        (Some(board), _) => board,
        (None, Some(board)) => board,
        (None, None) => bail!("Cannot tell the target board from the image, pass --board"),
    };
    info!(
        "Firmware {:?}: {} bytes for the {} board{}",
        cli.firmware,
        image.len(),
        board,
        image.version.as_deref().map(|v| format!(", version {}", v)).unwrap_or_default()
    );

    let link = cli.connect.open(Arc::new(LogEvents))?;
    if !link.login_board(board) {
        bail!("{} board did not accept the login", board);
    }

    if let Some(wanted) = &image.version {
        match link.version(board) {
            Ok(current) if &current.software_version == wanted && !cli.force => {
                info!("{} board already runs {}, use --force to flash anyway", board, wanted);
                return Ok(());
            }
            Ok(current) => info!("{} board currently runs {}", board, current.software_version),
            Err(e) => warn!("Could not read current version: {}", e),
        }
    }

    let options = UpgradeOptions {
        module_id: cli.module_id,
        upgrade_type: cli.upgrade_type,
        chunk_size: cli.chunk_size,
        ..UpgradeOptions::default()
    };

    let version = link.upgrade_firmware(board, &image, &options, |sent, total| {
        eprint!("\rUploading: {}/{} frames ({:.0}%)", sent, total, sent as f64 * 100.0 / total as f64);
        let _ = std::io::stderr().flush();
    });
    eprintln!();
    let version = version.with_context(|| format!("Upgrade of the {} board failed", board))?;

    println!("{} board firmware updated to {}", board, version.software_version);
    Ok(())
}
