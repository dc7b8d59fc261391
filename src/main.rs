//! serial-bridge CLI
//!
//! Runs the bridge against a real serial device. The remote link is stdio:
//! frames leaving RxQ and status events are printed as JSON lines on
//! stdout, and stdin lines are console input.
//!
//! # Usage
//!
//! ```bash
//! # Defaults, device path and speed from the command line
//! serial-bridge --port /dev/ttyUSB0 --baud 9600
//!
//! # Using a configuration file
//! serial-bridge --config bridge.json --log-level debug
//! ```
//!
//! Console input:
//!
//! ```text
//! status
//! disable 10
//! send AT+CSQ
//! set RxQueueSize 128
//! quit
//! ```

use std::path::PathBuf;

use clap::Parser;
use serial_bridge::control::{write_stdout_json, ConsoleInput, OutboundLine, StdioLink};
use serial_bridge::transport::SystemSerial;
use serial_bridge::{Bridge, BridgeConfig, BridgeHandle};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

/// Serial-to-uplink bridge
#[derive(Parser, Debug)]
#[command(name = "serial-bridge")]
#[command(about = "Tunnel a serial device over a line-oriented uplink")]
#[command(version)]
struct Args {
    /// Configuration file path (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial device path (overrides the configuration file)
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate (overrides the configuration file)
    #[arg(short, long)]
    baud: Option<u32>,

    /// Start disabled
    #[arg(long)]
    disabled: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // stdout carries the line protocol; logs go to stderr.
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = build_config(&args)?;
    tracing::info!(
        path = %config.serial.path,
        baud = config.serial.baud_rate,
        enabled = config.enabled,
        "Starting serial-bridge v{}",
        env!("CARGO_PKG_VERSION")
    );

    let bridge = Bridge::builder(config)
        .transport(SystemSerial::new())
        .link(StdioLink)
        .start()
        .await?;

    tokio::spawn(forward_status(bridge.handle().clone()));

    tokio::select! {
        result = console(bridge.handle().clone()) => {
            if let Err(e) = result {
                tracing::error!("Console failed: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted");
        }
    }

    let report = bridge.shutdown().await?;
    tracing::info!("Final state:\n{}", report);
    Ok(())
}

fn build_config(args: &Args) -> Result<BridgeConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => BridgeConfig::from_file(path)?,
        None => BridgeConfig::default(),
    };
    if let Some(port) = &args.port {
        config.serial.path = port.clone();
    }
    if let Some(baud) = args.baud {
        config.serial.baud_rate = baud;
    }
    if args.disabled {
        config.enabled = false;
    }
    config.validate()?;
    Ok(config)
}

/// Read console lines until EOF or `quit`.
async fn console(handle: BridgeHandle) -> serial_bridge::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let input = match ConsoleInput::parse(&line) {
            Ok(input) => input,
            Err(e) => {
                write_stdout_json(&OutboundLine::Error {
                    message: e.to_string(),
                })?;
                continue;
            }
        };

        let outcome = match input {
            ConsoleInput::Quit => return Ok(()),
            ConsoleInput::Command(command) => handle
                .execute(command)
                .await
                .map(|report| Some(OutboundLine::Report(report))),
            ConsoleInput::Send(frame) => handle.deliver(frame).await.map(|()| None),
            ConsoleInput::Set(change) => handle.apply_config(vec![change]).await.map(|()| None),
        };

        match outcome {
            Ok(Some(line)) => write_stdout_json(&line)?,
            Ok(None) => {}
            Err(e) => write_stdout_json(&OutboundLine::Error {
                message: e.to_string(),
            })?,
        }
    }

    tracing::debug!("Console input closed");
    Ok(())
}

/// Print status notifications as JSON lines.
async fn forward_status(handle: BridgeHandle) {
    let mut events = handle.subscribe();
    drop(handle);

    loop {
        match events.recv().await {
            Ok(event) => {
                if let Err(e) = write_stdout_json(&OutboundLine::Status { event }) {
                    tracing::warn!("Failed to write status event: {}", e);
                }
            }
            Err(RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "Status events dropped");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
