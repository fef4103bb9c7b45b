//! Piecemeal CLI - Command-line interface
//!
//! Streams files through the piece-aware reader and simulates out-of-order
//! piece completion against a real file.

mod commands;

use std::process::ExitCode;

use clap::Parser;
use piecemeal_core::tracing_setup::{CliLogLevel, init_tracing};

#[derive(Parser)]
#[command(name = "piecemeal")]
#[command(about = "Seekable reads over partially downloaded torrent files")]
struct Cli {
    /// Console log level
    #[arg(long, global = true, value_enum, default_value_t = CliLogLevel::Warn)]
    log_level: CliLogLevel,

    #[command(subcommand)]
    command: commands::Commands,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    init_tracing(cli.log_level.as_tracing_level(), None)?;

    match commands::handle_command(cli.command).await {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(error) => {
            tracing::error!("{error}");
            eprintln!("Error: {}", error.user_message());
            // Usage errors exit like clap's own argument errors.
            Ok(ExitCode::from(if error.is_user_error() { 2 } else { 1 }))
        }
    }
}
