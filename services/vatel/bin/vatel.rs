//! Main Entrypoint for the Vatel CLI
//!
//! This binary is responsible for:
//! 1. Parsing the command line.
//! 2. Loading configuration from the environment.
//! 3. Initializing logging.
//! 4. Running the requested subcommand and reporting how a session ended.

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use vatel_cli::{
    cli::{Cli, Command},
    commands,
    config::Config,
};
use vatel_session::EndReason;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Parse Arguments ---
    let cli = Cli::parse();

    // --- 2. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 3. Initialize Logging ---
    // Logs go to stderr so they stay out of the conversation printed on stdout.
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();

    // --- 4. Run the Command ---
    match cli.command {
        Command::Agents { json } => commands::list_agents(&config, json).await,
        Command::Devices => commands::list_devices(),
        Command::Run(args) => {
            let summary = commands::run_session(&config, args).await?;
            info!(
                session_id = summary.session_id.as_deref().unwrap_or("-"),
                frames_sent = summary.frames_sent,
                frames_dropped = summary.frames_dropped,
                playback_drained = summary.playback_drained,
                "Session summary."
            );
            match summary.end_reason {
                EndReason::SessionEnded { .. } | EndReason::StreamClosed => Ok(()),
                EndReason::Error(e) => {
                    warn!(error = %e, "Session ended with an error.");
                    Err(e).context("Session failed")
                }
            }
        }
    }
}
