//! CLI definitions and command implementations for tabtrail.

pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// tabtrail - Browser activity capture and sync client
#[derive(Parser)]
#[command(name = "tabtrail")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: ~/.config/tabtrail/tabtrail.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Store the collector bearer token (prompts when --token is omitted)
    Login {
        #[arg(short, long)]
        token: Option<String>,

        /// Account email shown by `status`
        #[arg(short, long)]
        email: Option<String>,
    },

    /// Forget the stored token
    Logout,

    /// Show auth state, pending events and last sync time
    Status,

    /// Deliver all queued events to the collector now
    Sync,

    /// List queued events
    Events {
        /// Only events at or after this time (ms since epoch)
        #[arg(long)]
        since: Option<i64>,

        /// Only events at or before this time (ms since epoch)
        #[arg(long)]
        until: Option<i64>,

        /// Only events of this type (e.g. TAB_ACTIVATED)
        #[arg(short = 't', long = "type")]
        event_type: Option<String>,
    },

    /// Delete every queued event, the token and sync state
    Wipe {
        /// Confirm the wipe
        #[arg(long)]
        yes: bool,
    },

    /// Run as native-messaging host (stdin/stdout) with the sync scheduler
    Host,

    /// Run the sync scheduler in the foreground
    Daemon,
}
