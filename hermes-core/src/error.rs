//! Error types for hermes-core.

use std::path::PathBuf;

use thiserror::Error;

/// Failures a single sync run can hit.
///
/// None of these escape the orchestrator: `Fetch` and `Parse` end the run and
/// are recorded in the status snapshot, the rest are logged.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Network failure, timeout or non-2xx response.
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// The payload was not the structured document we expect.
    #[error("payload could not be parsed: {0}")]
    Parse(String),

    /// Writing the payload cache failed.
    #[error("failed to persist payload at {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Exact wake-timer scheduling was denied; fell back to inexact.
    #[error("exact scheduling unavailable, using inexact timer: {0}")]
    SchedulingDegraded(String),

    /// A notification could not be posted.
    #[error("notification could not be rendered: {0}")]
    Presentation(String),
}

impl SyncError {
    /// Word used in the ongoing status line for a run that ended with this error.
    pub fn status_word(&self) -> &'static str {
        match self {
            SyncError::Parse(_) => "Error",
            _ => "Failed",
        }
    }
}

/// Convenience constructor for [`SyncError::Persist`].
pub fn persist_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Persist {
        path: path.into(),
        source,
    }
}

/// Errors from the preference store.
#[derive(Debug, Error)]
pub enum PrefsError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML serialization error (save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Malformed preferences file.
    #[error("failed to parse preferences at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}

pub(crate) fn prefs_io(path: impl Into<PathBuf>, source: std::io::Error) -> PrefsError {
    PrefsError::Io {
        path: path.into(),
        source,
    }
}

/// Errors from loading host configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}
