use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod cmd_monitor;
mod cmd_replay;
mod cmd_send;
mod common;

use common::{CommandArgs, DEFAULT_WAIT_MS};

#[derive(Parser, Debug)]
#[command(name = "emuctl", version, about = "Rainforest EMU-2 CLI")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
    /// Output JSON where applicable
    #[arg(long)]
    json: bool,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Print notifications as they arrive
    Monitor {
        #[arg(long, default_value = "/dev/ttyACM0")]
        device: PathBuf,
        /// Stop after this many notifications (0 = until Ctrl-C)
        #[arg(long, default_value_t = 0)]
        count: usize,
    },
    /// Decode a captured stream
    Replay {
        #[arg(long)]
        file: PathBuf,
        /// Lines end in LF instead of CRLF
        #[arg(long)]
        lf: bool,
    },
    /// Issue one command and print the replies
    Send {
        #[arg(long, default_value = "/dev/ttyACM0")]
        device: PathBuf,
        /// Command name, e.g. get_instantaneous_demand
        command: String,
        #[arg(long)]
        event: Option<String>,
        /// Reporting period in seconds (set_schedule)
        #[arg(long)]
        frequency: Option<u16>,
        #[arg(long)]
        enabled: bool,
        #[arg(long)]
        meter_mac: Option<String>,
        #[arg(long, default_value_t = DEFAULT_WAIT_MS)]
        wait_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let Cli { verbose, json, cmd } = Cli::parse();

    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| level.into()),
        ))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cmd {
        Cmd::Monitor { device, count } => cmd_monitor::run(device, count, json).await?,
        Cmd::Replay { file, lf } => cmd_replay::run(file, lf, json).await?,
        Cmd::Send {
            device,
            command,
            event,
            frequency,
            enabled,
            meter_mac,
            wait_ms,
        } => {
            let args = CommandArgs {
                event,
                frequency,
                enabled,
                meter_mac,
            };
            cmd_send::run(device, command, args, wait_ms, json).await?
        }
    };

    Ok(())
}
