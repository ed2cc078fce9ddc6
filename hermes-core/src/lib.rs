//! Hermes core library: domain types, preference store, host configuration, errors.
//!
//! - [`types`]: sync outcomes, status snapshots, control actions
//! - [`error`]: [`SyncError`], [`PrefsError`], [`ConfigError`]
//! - [`prefs`]: persistent boolean preferences with change subscriptions
//! - [`config`]: host configuration loaded from `~/.hermes/config.yaml`
//! - [`clock`]: wall-clock seam used by the scheduler and tests

pub mod clock;
pub mod config;
pub mod error;
pub mod prefs;
pub mod types;

pub use clock::{Clock, SystemClock};
pub use config::{
    HermesConfig, NotificationConfig, ScheduleConfig, SinkKind, SourceConfig, SourceFormat,
};
pub use error::{ConfigError, PrefsError, SyncError};
pub use prefs::{PreferenceStore, Subscription, PREF_ALARMS_ENABLED, PREF_FREQUENT_SYNC_ENABLED};
pub use types::{
    ActiveAlarms, ControlAction, FetchOutcome, StatusSnapshot, SyncConfig, SyncOrigin, SyncOutcome,
};
