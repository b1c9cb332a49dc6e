use anyhow::{Context, Result};
use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use dropletbot_cli::{ConnectArgs, setup_logging};
use dropletbot_lib::status::BoardStatus;
use dropletbot_lib::{Board, Command, LinkEvents};
use dropletbot_lib::command::opcode;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::time::interval;
use tracing::{error, info, warn};

/// Stream status reports, alarms and device pushes until Ctrl+C.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    connect: ConnectArgs,
    /// Seconds between status requests (0 disables polling)
    #[arg(short, long, default_value = "2.0")]
    interval: f64,
    /// Print events as JSON lines
    #[arg(long)]
    json: bool,
    /// Optional path to a file to write logs to, in addition to the console.
    #[arg(short, long)]
    log_file: Option<PathBuf>,
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
}

#[derive(Debug)]
enum Event {
    Data(Command, Vec<u8>),
    Error(i32, String),
    Alarm(Command, Vec<String>),
}

/// Forwards callbacks from the parser thread into the async loop.
struct Forwarder(UnboundedSender<Event>);

impl LinkEvents for Forwarder {
    fn on_ready_read(&self, cmd: Command, data: &[u8]) {
        let _ = self.0.send(Event::Data(cmd, data.to_vec()));
    }

    fn on_error(&self, code: i32, message: &str) {
        let _ = self.0.send(Event::Error(code, message.to_string()));
    }

    fn on_alarm(&self, cmd: Command, alarms: &[String]) {
        let _ = self.0.send(Event::Alarm(cmd, alarms.to_vec()));
    }
}

fn board_name(cmd: Command) -> String {
    cmd.board().map(|b| b.to_string()).unwrap_or_else(|| "Unknown".to_string())
}

fn print_event(event: &Event, json: bool) -> Result<()> {
    match event {
        Event::Data(cmd, data) if cmd.opcode() == opcode::STATUS => match BoardStatus::parse(*cmd, data) {
            Ok(status) if json => println!("{}", serde_json::to_string(&status)?),
            Ok(status) => println!("{} status: {:?}", board_name(*cmd), status),
            Err(e) => warn!("Undecodable status from {}: {}", cmd, e),
        },
        Event::Data(cmd, data) if json => println!(
            "{}",
            serde_json::json!({ "cmd": cmd.0, "board": board_name(*cmd), "data": hex::encode(data) })
        ),
        Event::Data(cmd, data) => println!("{} ({} board): {}", cmd, board_name(*cmd), hex::encode(data)),
        Event::Alarm(cmd, alarms) if json => println!(
            "{}",
            serde_json::json!({ "alarm": cmd.0, "board": board_name(*cmd), "entries": alarms })
        ),
        Event::Alarm(cmd, alarms) => {
            for alarm in alarms {
                println!("ALARM {} board: {}", board_name(*cmd), alarm);
            }
        }
        Event::Error(code, message) => error!("Link error {}: {}", code, message),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = setup_logging(cli.log_file.as_deref(), &cli.verbose)?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let link = Arc::new(cli.connect.open(Arc::new(Forwarder(tx)))?);

    let (signal, motor) = {
        let link = link.clone();
        tokio::task::spawn_blocking(move || link.login())
            .await
            .context("Login task failed")?
    };
    info!("Signal board: {}, motor board: {}", signal, motor);

    let period = Duration::from_secs_f64(cli.interval.max(0.1));
    let mut ticker = interval(period);
    info!("Monitoring until interrupted (Ctrl+C)");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, closing link");
                break;
            }
            _ = ticker.tick(), if cli.interval > 0.0 => {
                for board in Board::ALL {
                    if link.is_connected(board) {
                        if let Err(e) = link.request_status(board) {
                            warn!("Status request to {} board failed: {}", board, e);
                        }
                    }
                }
            }
            event = rx.recv() => match event {
                Some(event) => print_event(&event, cli.json)?,
                None => break,
            },
        }
        if link.is_lost() {
            error!("Connection lost");
            break;
        }
    }

    Ok(())
}
