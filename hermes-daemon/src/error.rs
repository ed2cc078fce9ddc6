use std::path::PathBuf;

use thiserror::Error;

/// Error surface for the daemon runtime, socket protocol, and service install.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("preferences error: {0}")]
    Prefs(#[from] hermes_core::PrefsError),

    #[error("configuration error: {0}")]
    Config(#[from] hermes_core::ConfigError),

    #[error("sync error: {0}")]
    Sync(#[from] hermes_core::SyncError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("daemon protocol error: {0}")]
    Protocol(String),

    #[error("daemon is not running (socket missing: {socket})")]
    DaemonNotRunning { socket: PathBuf },

    #[error("service error: {0}")]
    Service(String),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
