//! Tessera command line entry point.
//!
//! The control surface is deliberately small: start/stop a recording
//! session (`record`, stopped with Ctrl-C), plus offline helpers for
//! slice files (`info`, `decode`) and device discovery (`devices`).

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "tessera",
    version,
    about = "Streaming voice recorder: capture, compress, slice, hand off"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Record from the microphone until Ctrl-C, writing timed slice files
    Record(commands::RecordArgs),
    /// List audio input devices
    Devices,
    /// Inspect a slice file (frame count, modes, duration)
    Info {
        /// Path to a .amr slice file
        slice: PathBuf,
    },
    /// Decode a slice file to a WAV file
    Decode {
        /// Path to a .amr slice file
        slice: PathBuf,
        /// Output WAV path
        #[arg(short, long, default_value = "out.wav")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Record(args) => commands::record(args).await,
        Command::Devices => commands::devices(),
        Command::Info { slice } => commands::info(&slice),
        Command::Decode { slice, output } => commands::decode(&slice, &output),
    }
}
