//! tabtrail CLI - Browser activity capture and sync client
//!
//! Usage:
//!   tabtrail login    - Store the collector bearer token
//!   tabtrail sync     - Deliver queued events to the collector
//!   tabtrail status   - Show auth state, backlog and last sync
//!   tabtrail host     - Run as the browser's native-messaging host

mod cli;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use tabtrail::Config;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries native-messaging frames in host mode
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("tabtrail={}", log_level))),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Login { token, email } => cli::commands::login(&config, token, email),
        Commands::Logout => cli::commands::logout(&config),
        Commands::Status => cli::commands::status(&config),
        Commands::Sync => cli::commands::sync(&config),
        Commands::Events {
            since,
            until,
            event_type,
        } => cli::commands::events(&config, since, until, event_type),
        Commands::Wipe { yes } => cli::commands::wipe(&config, yes),
        Commands::Host => cli::commands::host(&config),
        Commands::Daemon => cli::commands::daemon(&config),
    }
}
