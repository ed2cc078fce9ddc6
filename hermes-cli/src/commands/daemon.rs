//! `hermes daemon`: foreground runtime, socket queries, and the per-user
//! service definition.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use hermes_daemon::paths::{socket_path, stderr_log_path, stdout_log_path};
use hermes_daemon::{
    install_service, request_shutdown, request_status, start_blocking, uninstall_service,
    DaemonError, DaemonOptions,
};

use super::home_dir;

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run the daemon in the foreground (cadences + socket server).
    Start(StartArgs),
    /// Ask a running daemon to exit.
    Stop,
    /// Query daemon runtime status over the Unix socket.
    Status,
    /// Write and activate the per-user service (launchd or systemd).
    Install,
    /// Deactivate and remove the per-user service.
    Uninstall,
    /// Print recent daemon log lines.
    Logs(DaemonLogsArgs),
}

#[derive(Args, Debug)]
pub struct StartArgs {
    /// Override `schedule.frequent_interval_ms` from config.yaml.
    #[arg(long)]
    pub frequent_interval_ms: Option<u64>,

    /// Override `schedule.critical_interval_ms` from config.yaml.
    #[arg(long)]
    pub critical_interval_ms: Option<u64>,
}

#[derive(Args, Debug)]
pub struct DaemonLogsArgs {
    /// Number of trailing lines to show.
    #[arg(long, default_value_t = 100)]
    pub lines: usize,

    /// Show only the stderr log file.
    #[arg(long)]
    pub stderr_only: bool,
}

pub fn run(command: DaemonCommand, json_logs: bool) -> Result<()> {
    let home = home_dir()?;

    match command {
        DaemonCommand::Start(args) => {
            let options = DaemonOptions {
                frequent_interval: args.frequent_interval_ms.map(Duration::from_millis),
                critical_interval: args.critical_interval_ms.map(Duration::from_millis),
                json_logs,
            };
            start_blocking(&home, options).context("daemon exited with error")?;
        }
        DaemonCommand::Stop => match request_shutdown(&home) {
            Ok(()) => println!("daemon stop requested"),
            Err(DaemonError::DaemonNotRunning { .. }) => {
                println!("daemon is not running");
            }
            Err(err) => return Err(err).context("failed to stop daemon"),
        },
        DaemonCommand::Status => {
            let payload = match request_status(&home) {
                Ok(status) => status,
                Err(DaemonError::DaemonNotRunning { .. }) => serde_json::json!({
                    "running": false,
                    "socket": socket_path(&home).display().to_string(),
                }),
                Err(err) => return Err(err).context("failed to query daemon status"),
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&payload)
                    .context("failed to render daemon status JSON")?
            );
        }
        DaemonCommand::Install => {
            let binary = std::env::current_exe().context("failed to resolve hermes binary path")?;
            let path = install_service(&home, &binary).context("failed to install service")?;
            println!("installed service: {}", path.display());
        }
        DaemonCommand::Uninstall => {
            uninstall_service(&home).context("failed to uninstall service")?;
            println!("uninstalled service");
        }
        DaemonCommand::Logs(args) => {
            if !args.stderr_only {
                print_tail(&stdout_log_path(&home), args.lines)
                    .context("failed to read daemon stdout log")?;
            }
            print_tail(&stderr_log_path(&home), args.lines)
                .context("failed to read daemon stderr log")?;
        }
    }

    Ok(())
}

fn print_tail(path: &Path, lines: usize) -> Result<()> {
    if !path.exists() {
        println!("log file not found: {}", path.display());
        return Ok(());
    }

    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut tail = VecDeque::<String>::with_capacity(lines);
    for line in BufReader::new(file).lines() {
        let line = line.with_context(|| format!("read {}", path.display()))?;
        if lines == 0 {
            continue;
        }
        if tail.len() == lines {
            tail.pop_front();
        }
        tail.push_back(line);
    }

    println!("==> {} <==", path.display());
    for line in tail {
        println!("{line}");
    }
    Ok(())
}
