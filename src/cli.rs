//! Command-line argument definitions

use clap::Parser;

/// Driver shell for the sensebridge USB sensor dongle
#[derive(Parser, Debug)]
#[command(name = "sensebridge", version, about)]
pub struct Args {
    /// HID device path (e.g. /dev/hidraw0); auto-discovered when omitted
    #[arg(short, long)]
    pub device: Option<String>,

    /// Print sensor events as JSON lines instead of text
    #[arg(long)]
    pub json: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}
