//! Host configuration, read from `<home>/.hermes/config.yaml`.
//!
//! Every field has a default, so a missing file (or a file that only sets
//! `source.url`) is a valid configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::{DEFAULT_CRITICAL_INTERVAL, DEFAULT_FREQUENT_INTERVAL};

/// Top-level configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct HermesConfig {
    pub source: SourceConfig,
    pub schedule: ScheduleConfig,
    pub notifications: NotificationConfig,
}

/// How the payload is fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Endpoint returning the JSON document. `None` means not configured yet.
    pub url: Option<String>,
    pub format: SourceFormat,
    pub timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: None,
            format: SourceFormat::Raw,
            timeout_secs: 15,
        }
    }
}

/// Shape of the HTTP response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    /// The body is the document itself.
    #[default]
    Raw,
    /// A spreadsheet values response; the document is the string in `values[0][0]`.
    SheetsCell,
}

/// Cadence knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub frequent_interval_ms: u64,
    pub critical_interval_ms: u64,
    /// Whether the host permits exact wake timers.
    pub exact_alarms: bool,
    /// Batching window for inexact wake timers.
    pub inexact_window_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            frequent_interval_ms: DEFAULT_FREQUENT_INTERVAL.as_millis() as u64,
            critical_interval_ms: DEFAULT_CRITICAL_INTERVAL.as_millis() as u64,
            exact_alarms: true,
            inexact_window_secs: 300,
        }
    }
}

impl ScheduleConfig {
    pub fn frequent_interval(&self) -> Duration {
        Duration::from_millis(self.frequent_interval_ms)
    }

    pub fn critical_interval(&self) -> Duration {
        Duration::from_millis(self.critical_interval_ms)
    }

    pub fn inexact_window(&self) -> Duration {
        Duration::from_secs(self.inexact_window_secs)
    }
}

/// Where notifications are rendered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct NotificationConfig {
    pub sink: SinkKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// JSON documents under `~/.hermes/run/notifications/`.
    #[default]
    File,
    /// Log lines only.
    Log,
}

/// `<home>/.hermes/config.yaml`. Pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    home.join(".hermes").join("config.yaml")
}

impl HermesConfig {
    /// Load from `<home>/.hermes/config.yaml`; defaults if the file is absent.
    pub fn load_at(home: &Path) -> Result<Self, ConfigError> {
        let path = config_path_at(home);
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let config: HermesConfig = if contents.trim().is_empty() {
            HermesConfig::default()
        } else {
            serde_yaml::from_str(&contents)
                .map_err(|source| ConfigError::Parse { path, source })?
        };
        config.validate()?;
        Ok(config)
    }

    /// `load_at` convenience wrapper.
    pub fn load() -> Result<Self, ConfigError> {
        let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
        Self::load_at(&home)
    }

    /// Reject intervals that would spin the scheduler.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.schedule.frequent_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "schedule.frequent_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.schedule.critical_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "schedule.critical_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.source.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "source.timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
