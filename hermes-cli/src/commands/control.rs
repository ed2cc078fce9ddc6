//! Live commands that need a running daemon: `hermes tick` and `hermes watch`.

use anyhow::{Context, Result};
use chrono::Local;
use clap::Args;
use colored::Colorize;

use hermes_core::ControlAction;
use hermes_daemon::{request_action, subscribe, DaemonError};
use hermes_sync::SyncEvent;

use super::home_dir;

const NOT_RUNNING_HINT: &str = "daemon is not running; start it with `hermes daemon start`";

pub fn tick() -> Result<()> {
    let home = home_dir()?;
    match request_action(&home, ControlAction::CriticalTick) {
        Ok(reply) => {
            let applied = reply.get("applied").and_then(|v| v.as_bool()).unwrap_or(false);
            if applied {
                println!("critical sync requested");
            } else {
                let state = reply.get("state").and_then(|v| v.as_str()).unwrap_or("unknown");
                println!("critical sync not started (supervisor {state}, or a run is in flight)");
            }
            Ok(())
        }
        Err(DaemonError::DaemonNotRunning { .. }) => anyhow::bail!(NOT_RUNNING_HINT),
        Err(err) => Err(err).context("failed to send critical tick"),
    }
}

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Exit after this many events.
    #[arg(long)]
    pub count: Option<usize>,
}

impl WatchArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let mut seen = 0usize;
        let result = subscribe(&home, |event| {
            seen += 1;
            let stamp = Local::now().format("%H:%M:%S");
            match event {
                SyncEvent::DataUpdated { critical } => {
                    let origin = if critical {
                        "critical".yellow().bold()
                    } else {
                        "frequent".normal()
                    };
                    println!("{stamp} data updated ({origin})");
                }
            }
            self.count.map_or(true, |limit| seen < limit)
        });

        match result {
            Ok(()) => Ok(()),
            Err(DaemonError::DaemonNotRunning { .. }) => anyhow::bail!(NOT_RUNNING_HINT),
            Err(err) => Err(err).context("event stream failed"),
        }
    }
}
