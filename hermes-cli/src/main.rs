//! Hermes: background sync of a remote status document with alarm
//! notifications.
//!
//! # Usage
//!
//! ```text
//! hermes daemon start [--frequent-interval-ms N] [--critical-interval-ms N]
//! hermes daemon stop|status|install|uninstall|logs
//! hermes frequent on|off
//! hermes alarms on|off
//! hermes prefs list
//! hermes tick
//! hermes sync [--critical] [--json]
//! hermes status [--json]
//! hermes watch [--count N]
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    control::WatchArgs,
    daemon::DaemonCommand,
    prefs::{PrefsCommand, Toggle},
    status::StatusArgs,
    sync::SyncArgs,
};
use hermes_core::{PREF_ALARMS_ENABLED, PREF_FREQUENT_SYNC_ENABLED};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "hermes",
    version,
    about = "Keep a remote status document in sync and raise alarms from it",
    long_about = None,
)]
struct Cli {
    /// Emit daemon logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run and manage the background daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },

    /// Turn the frequent sync cadence on or off.
    Frequent {
        #[arg(value_enum)]
        state: Toggle,
    },

    /// Turn alarm notifications on or off.
    Alarms {
        #[arg(value_enum)]
        state: Toggle,
    },

    /// Inspect stored preferences.
    Prefs {
        #[command(subcommand)]
        command: PrefsCommand,
    },

    /// Ask the running daemon for a critical sync now.
    Tick,

    /// Run one sync in the foreground, without a daemon.
    Sync(SyncArgs),

    /// Show the sync status, cached payload and preferences.
    Status(StatusArgs),

    /// Stream data-updated events from the running daemon.
    Watch(WatchArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Daemon { command } => commands::daemon::run(command, cli.json_logs),
        Commands::Frequent { state } => commands::prefs::set(PREF_FREQUENT_SYNC_ENABLED, state),
        Commands::Alarms { state } => commands::prefs::set(PREF_ALARMS_ENABLED, state),
        Commands::Prefs { command } => commands::prefs::run(command),
        Commands::Tick => commands::control::tick(),
        Commands::Sync(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Watch(args) => args.run(),
    }
}
