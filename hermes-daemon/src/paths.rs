//! Filesystem layout under `~/.hermes/`.
//!
//! ```text
//! ~/.hermes/
//!   config.yaml
//!   prefs.yaml
//!   daemon.sock
//!   cache/payload.json
//!   logs/daemon.log, daemon-err.log
//!   run/notifications/ongoing.json, alarm.json
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DAEMON_LABEL: &str = "dev.hermes.daemon";
pub const SYSTEMD_UNIT: &str = "hermes-daemon.service";

/// Editors write files in bursts; one reload per burst.
pub const PREFS_DEBOUNCE_WINDOW: Duration = Duration::from_millis(250);

pub const DAEMON_STDOUT_LOG: &str = "daemon.log";
pub const DAEMON_STDERR_LOG: &str = "daemon-err.log";
pub const DAEMON_SOCKET: &str = "daemon.sock";

pub fn hermes_root(home: &Path) -> PathBuf {
    home.join(".hermes")
}

pub fn run_dir(home: &Path) -> PathBuf {
    hermes_root(home).join("run")
}

pub fn notifications_dir(home: &Path) -> PathBuf {
    run_dir(home).join("notifications")
}

pub fn socket_path(home: &Path) -> PathBuf {
    hermes_root(home).join(DAEMON_SOCKET)
}

pub fn logs_dir(home: &Path) -> PathBuf {
    hermes_root(home).join("logs")
}

pub fn stdout_log_path(home: &Path) -> PathBuf {
    logs_dir(home).join(DAEMON_STDOUT_LOG)
}

pub fn stderr_log_path(home: &Path) -> PathBuf {
    logs_dir(home).join(DAEMON_STDERR_LOG)
}

pub fn launch_agents_dir(home: &Path) -> PathBuf {
    home.join("Library").join("LaunchAgents")
}

pub fn launchd_plist_path(home: &Path) -> PathBuf {
    launch_agents_dir(home).join(format!("{DAEMON_LABEL}.plist"))
}

pub fn systemd_user_dir(home: &Path) -> PathBuf {
    home.join(".config").join("systemd").join("user")
}

pub fn systemd_unit_path(home: &Path) -> PathBuf {
    systemd_user_dir(home).join(SYSTEMD_UNIT)
}
