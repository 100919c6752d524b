//! Mooring: keep a local working tree replicated into a mounted R2 bucket.
//!
//! # Usage
//!
//! ```text
//! mooring sync [--json]
//! mooring mount
//! mooring status [--json]
//! mooring config show|save
//! mooring daemon start|stop|status|sync|logs
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    config::ConfigCommand, daemon::DaemonCommand, status::StatusArgs, sync::SyncArgs,
};

#[derive(Parser, Debug)]
#[command(
    name = "mooring",
    version,
    about = "Mount an R2 bucket and mirror local state into it",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one full sync in this process.
    Sync(SyncArgs),

    /// Make sure the bucket is mounted, recovering a stale mount if needed.
    Mount,

    /// Show storage configuration, mount state, and the last sync marker.
    Status(StatusArgs),

    /// Inspect or persist the effective configuration.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Manage the background sync daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Sync(args) => args.run(),
        Commands::Mount => commands::mount::run(),
        Commands::Status(args) => args.run(),
        Commands::Config { command } => commands::config::run(command),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}
