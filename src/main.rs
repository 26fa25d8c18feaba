//! sensebridge — driver shell for the USB HID sensor dongle
//!
//! Opens the dongle, runs the session handshake, prints sensor events as
//! they arrive, and offers the interactive pairing/management actions.

mod cli;
mod shell;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use sensebridge_gateway::Gateway;
use sensebridge_transport::HidTransport;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    init_logging(args.verbose);

    let transport = match &args.device {
        Some(path) => Arc::new(
            HidTransport::open_path(path)
                .with_context(|| format!("opening bridge dongle at {path}"))?,
        ),
        None => Arc::new(HidTransport::open_first().context("discovering a bridge dongle")?),
    };

    let json = args.json;
    let gateway = Arc::new(
        Gateway::open(transport, move |event| {
            if json {
                match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(e) => warn!("failed to encode event: {e}"),
                }
            } else {
                println!("Event: {event}");
            }
        })
        .context("starting dongle session")?,
    );

    println!(
        "Dongle ready: mac={}, version={}",
        gateway.mac(),
        gateway.version()
    );

    let signal_gateway = Arc::clone(&gateway);
    ctrlc::set_handler(move || {
        signal_gateway.stop();
        std::process::exit(0);
    })
    .context("installing signal handler")?;

    let result = shell::run(&gateway);
    gateway.stop();
    result
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
