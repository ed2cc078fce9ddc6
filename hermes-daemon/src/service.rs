//! Per-user service definitions that restart the daemon when it dies:
//! a launchd agent on macOS, a systemd user unit elsewhere.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{io_err, DaemonError};
use crate::paths::{
    launchd_plist_path, logs_dir, socket_path, stderr_log_path, stdout_log_path,
    systemd_unit_path, DAEMON_LABEL, SYSTEMD_UNIT,
};

/// Generate a launchd plist that keeps `hermes daemon start` alive.
pub fn generate_plist(binary_path: &Path, home: &Path) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
  <key>Label</key>
  <string>{label}</string>
  <key>ProgramArguments</key>
  <array>
    <string>{binary}</string>
    <string>daemon</string>
    <string>start</string>
  </array>
  <key>RunAtLoad</key>
  <true/>
  <key>KeepAlive</key>
  <true/>
  <key>StandardOutPath</key>
  <string>{stdout}</string>
  <key>StandardErrorPath</key>
  <string>{stderr}</string>
</dict>
</plist>
"#,
        label = DAEMON_LABEL,
        binary = binary_path.display(),
        stdout = stdout_log_path(home).display(),
        stderr = stderr_log_path(home).display(),
    )
}

/// Generate a systemd user unit with `Restart=always`.
pub fn generate_systemd_unit(binary_path: &Path, home: &Path) -> String {
    format!(
        "[Unit]\n\
         Description=Hermes background sync daemon\n\
         After=network-online.target\n\
         \n\
         [Service]\n\
         ExecStart={binary} daemon start\n\
         Restart=always\n\
         RestartSec=5\n\
         StandardOutput=append:{stdout}\n\
         StandardError=append:{stderr}\n\
         \n\
         [Install]\n\
         WantedBy=default.target\n",
        binary = binary_path.display(),
        stdout = stdout_log_path(home).display(),
        stderr = stderr_log_path(home).display(),
    )
}

/// Write the platform's service definition without activating it.
pub fn write_service_file(home: &Path, binary_path: &Path) -> Result<PathBuf, DaemonError> {
    let logs = logs_dir(home);
    fs::create_dir_all(&logs).map_err(|e| io_err(&logs, e))?;

    let (path, contents) = if cfg!(target_os = "macos") {
        (launchd_plist_path(home), generate_plist(binary_path, home))
    } else {
        (systemd_unit_path(home), generate_systemd_unit(binary_path, home))
    };
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }
    fs::write(&path, contents).map_err(|e| io_err(&path, e))?;
    Ok(path)
}

/// Write and activate the service for the current user.
pub fn install(home: &Path, binary_path: &Path) -> Result<PathBuf, DaemonError> {
    let path = write_service_file(home, binary_path)?;

    if cfg!(target_os = "macos") {
        let domain = launchctl_domain()?;
        let service = format!("{domain}/{DAEMON_LABEL}");
        let _ = run_tool("launchctl", &["bootout", &service], true);
        run_tool(
            "launchctl",
            &["bootstrap", &domain, &path.display().to_string()],
            false,
        )?;
        run_tool("launchctl", &["kickstart", "-k", &service], false)?;
    } else {
        run_tool("systemctl", &["--user", "daemon-reload"], false)?;
        run_tool("systemctl", &["--user", "enable", "--now", SYSTEMD_UNIT], false)?;
    }

    Ok(path)
}

/// Deactivate the service and remove its definition.
pub fn uninstall(home: &Path) -> Result<(), DaemonError> {
    if cfg!(target_os = "macos") {
        let plist = launchd_plist_path(home);
        if plist.exists() {
            let domain = launchctl_domain()?;
            let _ = run_tool("launchctl", &["bootout", &format!("{domain}/{DAEMON_LABEL}")], true);
            fs::remove_file(&plist).map_err(|e| io_err(&plist, e))?;
        }
    } else {
        let unit = systemd_unit_path(home);
        if unit.exists() {
            let _ = run_tool("systemctl", &["--user", "disable", "--now", SYSTEMD_UNIT], true);
            fs::remove_file(&unit).map_err(|e| io_err(&unit, e))?;
        }
    }

    let socket = socket_path(home);
    if socket.exists() {
        let _ = fs::remove_file(socket);
    }
    Ok(())
}

fn run_tool(program: &str, args: &[&str], ignore_failure: bool) -> Result<(), DaemonError> {
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| io_err(program, e))?;

    if output.status.success() || ignore_failure {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    Err(DaemonError::Service(format!(
        "{program} failed (status {}): {} {}",
        output.status, stdout, stderr
    )))
}

fn launchctl_domain() -> Result<String, DaemonError> {
    let output = Command::new("id")
        .arg("-u")
        .output()
        .map_err(|e| io_err("id -u", e))?;
    if !output.status.success() {
        return Err(DaemonError::Service(format!(
            "failed to resolve current uid (status {})",
            output.status
        )));
    }

    let uid = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if uid.is_empty() {
        return Err(DaemonError::Service(
            "current uid from `id -u` was empty".to_string(),
        ));
    }
    Ok(format!("gui/{uid}"))
}
