//! Newline-delimited JSON over `~/.hermes/daemon.sock`.
//!
//! | `cmd`                                  | effect                               |
//! |----------------------------------------|--------------------------------------|
//! | `status`                               | supervisor, cache and prefs snapshot |
//! | `start` `stop` `start_frequent` `stop_frequent` `critical_tick` | control action |
//! | `subscribe`                            | ack, then one line per `SyncEvent`   |
//! | `shutdown`                             | stop the supervisor and exit         |

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::Duration;

use hermes_core::ControlAction;
use hermes_sync::SyncEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{io_err, DaemonError};
use crate::paths::socket_path;

pub const CMD_STATUS: &str = "status";
pub const CMD_SUBSCRIBE: &str = "subscribe";
pub const CMD_SHUTDOWN: &str = "shutdown";

/// JSON newline-delimited request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonRequest {
    pub cmd: String,
}

impl DaemonRequest {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self { cmd: cmd.into() }
    }
}

/// JSON newline-delimited response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DaemonResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

fn connect(home: &Path) -> Result<(UnixStream, PathBuf), DaemonError> {
    let socket = socket_path(home);
    if !socket.exists() {
        return Err(DaemonError::DaemonNotRunning { socket });
    }

    let stream = UnixStream::connect(&socket).map_err(|err| {
        if matches!(
            err.kind(),
            std::io::ErrorKind::NotFound
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
        ) {
            DaemonError::DaemonNotRunning {
                socket: socket.clone(),
            }
        } else {
            io_err(&socket, err)
        }
    })?;
    Ok((stream, socket))
}

fn write_request(
    stream: &mut UnixStream,
    socket: &Path,
    request: &DaemonRequest,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(request)?;
    stream
        .write_all(payload.as_bytes())
        .map_err(|e| io_err(socket, e))?;
    stream.write_all(b"\n").map_err(|e| io_err(socket, e))?;
    stream.flush().map_err(|e| io_err(socket, e))
}

fn read_response<R: BufRead>(reader: &mut R, socket: &Path) -> Result<DaemonResponse, DaemonError> {
    let mut line = String::new();
    let read = reader.read_line(&mut line).map_err(|e| io_err(socket, e))?;
    if read == 0 {
        return Err(DaemonError::Protocol(
            "daemon closed connection before responding".to_string(),
        ));
    }
    Ok(serde_json::from_str(line.trim_end())?)
}

/// Send one JSON request to the daemon socket and return one response.
pub fn send_request(home: &Path, request: &DaemonRequest) -> Result<DaemonResponse, DaemonError> {
    let (mut stream, socket) = connect(home)?;
    write_request(&mut stream, &socket, request)?;
    let mut reader = BufReader::new(stream);
    read_response(&mut reader, &socket)
}

pub fn request_status(home: &Path) -> Result<Value, DaemonError> {
    let request = DaemonRequest::new(CMD_STATUS);

    let mut last_not_running: Option<DaemonError> = None;
    for attempt in 0..5 {
        match send_request(home, &request) {
            Ok(response) => return response_into_data(response),
            Err(err @ DaemonError::DaemonNotRunning { .. }) => {
                last_not_running = Some(err);
                if attempt < 4 {
                    sleep(Duration::from_millis(100));
                    continue;
                }
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_not_running.unwrap_or_else(|| {
        DaemonError::Protocol("daemon status retry loop exited unexpectedly".to_string())
    }))
}

/// Ask the daemon process to exit.
pub fn request_shutdown(home: &Path) -> Result<(), DaemonError> {
    let response = send_request(home, &DaemonRequest::new(CMD_SHUTDOWN))?;
    response_into_data(response).map(|_| ())
}

/// Send one control action; returns the daemon's `{applied, state}` reply.
pub fn request_action(home: &Path, action: ControlAction) -> Result<Value, DaemonError> {
    let response = send_request(home, &DaemonRequest::new(action.as_str()))?;
    response_into_data(response)
}

/// Stream `SyncEvent`s until `on_event` returns `false` or the daemon exits.
pub fn subscribe(
    home: &Path,
    mut on_event: impl FnMut(SyncEvent) -> bool,
) -> Result<(), DaemonError> {
    let (mut stream, socket) = connect(home)?;
    write_request(&mut stream, &socket, &DaemonRequest::new(CMD_SUBSCRIBE))?;
    let mut reader = BufReader::new(stream);
    response_into_data(read_response(&mut reader, &socket)?)?;

    let mut line = String::new();
    loop {
        line.clear();
        let read = reader.read_line(&mut line).map_err(|e| io_err(&socket, e))?;
        if read == 0 {
            return Ok(());
        }
        if line.trim().is_empty() {
            continue;
        }
        let event: SyncEvent = serde_json::from_str(line.trim_end())?;
        if !on_event(event) {
            return Ok(());
        }
    }
}

fn response_into_data(response: DaemonResponse) -> Result<Value, DaemonError> {
    if response.ok {
        Ok(response.data.unwrap_or(Value::Null))
    } else {
        Err(DaemonError::Protocol(
            response
                .error
                .unwrap_or_else(|| "unknown daemon error".to_string()),
        ))
    }
}
