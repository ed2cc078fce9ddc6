//! Domain types for the Hermes sync scheduler.
//!
//! Outcomes and snapshots are immutable values: each run produces a fresh one
//! that supersedes the previous, nothing is merged in place.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::prefs::{PreferenceStore, PREF_ALARMS_ENABLED, PREF_FREQUENT_SYNC_ENABLED};

/// Default period of the frequent cadence.
pub const DEFAULT_FREQUENT_INTERVAL: Duration = Duration::from_secs(60);

/// Default period of the critical cadence.
pub const DEFAULT_CRITICAL_INTERVAL: Duration = Duration::from_secs(30 * 60);

// ---------------------------------------------------------------------------
// Origin
// ---------------------------------------------------------------------------

/// Which cadence triggered a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOrigin {
    Frequent,
    Critical,
}

impl SyncOrigin {
    pub fn is_critical(self) -> bool {
        matches!(self, SyncOrigin::Critical)
    }
}

impl fmt::Display for SyncOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOrigin::Frequent => write!(f, "frequent"),
            SyncOrigin::Critical => write!(f, "critical"),
        }
    }
}

// ---------------------------------------------------------------------------
// Active alarm items
// ---------------------------------------------------------------------------

/// Ordered set of item names currently flagged as alarms.
///
/// Insertion order is preserved; repeated names are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActiveAlarms(Vec<String>);

impl ActiveAlarms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `name` unless it is already present. Returns whether it was added.
    pub fn insert(&mut self, name: impl Into<String>) -> bool {
        let name = name.into();
        if self.0.contains(&name) {
            return false;
        }
        self.0.push(name);
        true
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn first(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

impl<S: Into<String>> FromIterator<S> for ActiveAlarms {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut alarms = ActiveAlarms::new();
        for name in iter {
            alarms.insert(name);
        }
        alarms
    }
}

impl fmt::Display for ActiveAlarms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(", "))
    }
}

// ---------------------------------------------------------------------------
// Fetch / sync outcomes
// ---------------------------------------------------------------------------

/// What one successful fetch returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    pub raw_payload: String,
    pub active_alarm_items: ActiveAlarms,
}

/// Result of one orchestrator run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    pub timestamp: DateTime<Utc>,
    pub succeeded: bool,
    pub was_critical: bool,
    pub active_alarm_items: ActiveAlarms,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl SyncOutcome {
    pub fn success(timestamp: DateTime<Utc>, origin: SyncOrigin, alarms: ActiveAlarms) -> Self {
        Self {
            timestamp,
            succeeded: true,
            was_critical: origin.is_critical(),
            active_alarm_items: alarms,
            failure: None,
        }
    }

    pub fn failure(
        timestamp: DateTime<Utc>,
        origin: SyncOrigin,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            succeeded: false,
            was_critical: origin.is_critical(),
            active_alarm_items: ActiveAlarms::new(),
            failure: Some(reason.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Status snapshot
// ---------------------------------------------------------------------------

/// Text shown in the ongoing notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub status_text: String,
    pub last_update_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl StatusSnapshot {
    pub fn new(
        status_text: impl Into<String>,
        last_update_time: impl Into<String>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            status_text: status_text.into(),
            last_update_time: last_update_time.into(),
            updated_at: Some(updated_at),
        }
    }
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            status_text: "Initializing...".to_string(),
            last_update_time: "N/A".to_string(),
            updated_at: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Sync configuration
// ---------------------------------------------------------------------------

/// Scheduler configuration.
///
/// The booleans are read live from the preference store; the intervals are
/// fixed for the lifetime of the value.
#[derive(Clone)]
pub struct SyncConfig {
    prefs: Arc<PreferenceStore>,
    frequent_interval: Duration,
    critical_interval: Duration,
}

impl SyncConfig {
    pub fn new(
        prefs: Arc<PreferenceStore>,
        frequent_interval: Duration,
        critical_interval: Duration,
    ) -> Self {
        Self {
            prefs,
            frequent_interval,
            critical_interval,
        }
    }

    pub fn frequent_enabled(&self) -> bool {
        self.prefs.get_bool(PREF_FREQUENT_SYNC_ENABLED, true)
    }

    pub fn alarms_enabled(&self) -> bool {
        self.prefs.get_bool(PREF_ALARMS_ENABLED, true)
    }

    pub fn frequent_interval(&self) -> Duration {
        self.frequent_interval
    }

    pub fn critical_interval(&self) -> Duration {
        self.critical_interval
    }

    pub fn prefs(&self) -> &Arc<PreferenceStore> {
        &self.prefs
    }
}

impl fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncConfig")
            .field("frequent_enabled", &self.frequent_enabled())
            .field("alarms_enabled", &self.alarms_enabled())
            .field("frequent_interval", &self.frequent_interval)
            .field("critical_interval", &self.critical_interval)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Control actions
// ---------------------------------------------------------------------------

/// Named actions accepted by the lifecycle supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    Start,
    Stop,
    StartFrequent,
    StopFrequent,
    CriticalTick,
}

impl ControlAction {
    pub const ALL: [ControlAction; 5] = [
        ControlAction::Start,
        ControlAction::Stop,
        ControlAction::StartFrequent,
        ControlAction::StopFrequent,
        ControlAction::CriticalTick,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ControlAction::Start => "start",
            ControlAction::Stop => "stop",
            ControlAction::StartFrequent => "start_frequent",
            ControlAction::StopFrequent => "stop_frequent",
            ControlAction::CriticalTick => "critical_tick",
        }
    }
}

impl fmt::Display for ControlAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControlAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        ControlAction::ALL
            .into_iter()
            .find(|action| action.as_str() == normalized)
            .ok_or_else(|| {
                format!(
                    "unknown action '{s}'; expected one of: start, stop, start_frequent, stop_frequent, critical_tick"
                )
            })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
