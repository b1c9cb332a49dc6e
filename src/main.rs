use anyhow::{Context, Result};
use clap::Parser;
use serialport::SerialPortType;
use tracing::info;

/// List serial ports and flag the ones that look like a DropletBot controller.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Also show non-USB ports
    #[arg(short, long)]
    all: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let ports = serialport::available_ports().context("Failed to enumerate serial ports")?;
    let candidates: Vec<String> = dropletbot_lib::transport::candidate_ports()?
        .into_iter()
        .map(|p| p.port_name)
        .collect();

    info!("Listing serial ports...\n");
    let mut count = 0;
    for port in ports {
        let is_candidate = candidates.contains(&port.port_name);
        if !cli.all && !is_candidate {
            continue;
        }
        count += 1;
        let marker = if is_candidate { "*" } else { " " };
        match port.port_type {
            SerialPortType::UsbPort(usb) => {
                info!(
                    "{} {} VID: {:#06x}, PID: {:#06x}",
                    marker, port.port_name, usb.vid, usb.pid
                );
                info!("  Manufacturer: {}", usb.manufacturer.as_deref().unwrap_or("<Not available>"));
                info!("  Product: {}", usb.product.as_deref().unwrap_or("<Not available>"));
                info!("  Serial: {}", usb.serial_number.as_deref().unwrap_or("<Not available>"));
            }
            other => info!("{} {} {:?}", marker, port.port_name, other),
        }
    }
    if count == 0 {
        info!("No serial ports found.");
    } else {
        info!("Ports marked * are USB serial devices a controller can sit behind.");
    }
    Ok(())
}
