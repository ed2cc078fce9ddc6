//! Status presentation: the ongoing status notification and the alarm
//! notification.
//!
//! [`StatusPresenter`] owns the current [`StatusSnapshot`] and renders it
//! through a [`NotificationSink`]. Sink failures are logged as
//! `SyncError::Presentation` and swallowed; a broken sink never stops a sync.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use hermes_core::{Clock, StatusSnapshot, SyncError, SystemClock};
use serde::Serialize;

/// Title of the ongoing notification.
pub const ONGOING_TITLE: &str = "Hermes Active";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    Low,
    High,
}

/// A notification channel. Both channels are opened before the first render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Channel {
    pub id: &'static str,
    pub name: &'static str,
    pub importance: Importance,
}

pub const STATUS_CHANNEL: Channel = Channel {
    id: "sync-status",
    name: "Hermes Sync Service",
    importance: Importance::Low,
};

pub const ALARM_CHANNEL: Channel = Channel {
    id: "alarms",
    name: "Hermes Alarms",
    importance: Importance::High,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Ongoing,
    Alarm,
}

impl NotificationKind {
    fn file_name(self) -> &'static str {
        match self {
            NotificationKind::Ongoing => "ongoing.json",
            NotificationKind::Alarm => "alarm.json",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub channel: &'static str,
    pub title: String,
    pub body: String,
    pub ongoing: bool,
    pub dismissible: bool,
    pub lock_screen_visible: bool,
    pub posted_at: DateTime<Utc>,
}

impl Notification {
    pub fn ongoing(snapshot: &StatusSnapshot, posted_at: DateTime<Utc>) -> Self {
        Self {
            kind: NotificationKind::Ongoing,
            channel: STATUS_CHANNEL.id,
            title: ONGOING_TITLE.to_string(),
            body: snapshot.status_text.clone(),
            ongoing: true,
            dismissible: false,
            lock_screen_visible: false,
            posted_at,
        }
    }

    pub fn alarm(title: &str, message: &str, posted_at: DateTime<Utc>) -> Self {
        Self {
            kind: NotificationKind::Alarm,
            channel: ALARM_CHANNEL.id,
            title: title.to_string(),
            body: message.to_string(),
            ongoing: false,
            dismissible: true,
            lock_screen_visible: true,
            posted_at,
        }
    }
}

/// Where notifications end up. A notification of a given kind replaces the
/// previous one of the same kind.
pub trait NotificationSink: Send + Sync {
    fn open_channels(&self, channels: &[Channel]) -> Result<(), SyncError>;
    fn post(&self, notification: &Notification) -> Result<(), SyncError>;
    fn cancel(&self, kind: NotificationKind) -> Result<(), SyncError>;
    fn release(&self) -> Result<(), SyncError>;
}

/// Emits notifications as tracing events.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn open_channels(&self, channels: &[Channel]) -> Result<(), SyncError> {
        for channel in channels {
            tracing::debug!(
                channel = channel.id,
                importance = ?channel.importance,
                "channel opened"
            );
        }
        Ok(())
    }

    fn post(&self, notification: &Notification) -> Result<(), SyncError> {
        match notification.kind {
            NotificationKind::Ongoing => {
                tracing::info!(status = %notification.body, "status");
            }
            NotificationKind::Alarm => {
                tracing::warn!(title = %notification.title, "{}", notification.body);
            }
        }
        Ok(())
    }

    fn cancel(&self, kind: NotificationKind) -> Result<(), SyncError> {
        tracing::debug!(kind = ?kind, "notification cleared");
        Ok(())
    }

    fn release(&self) -> Result<(), SyncError> {
        Ok(())
    }
}

/// Writes one JSON document per notification kind into a directory.
///
/// ```text
/// <dir>/
///   channels.json
///   ongoing.json
///   alarm.json      (absent when no alarm is shown)
/// ```
#[derive(Debug, Clone)]
pub struct FileSink {
    dir: PathBuf,
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, kind: NotificationKind) -> PathBuf {
        self.dir.join(kind.file_name())
    }

    fn write_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<(), SyncError> {
        let presentation = |e: &dyn std::fmt::Display| {
            SyncError::Presentation(format!("{}: {e}", self.dir.join(name).display()))
        };
        std::fs::create_dir_all(&self.dir).map_err(|e| presentation(&e))?;
        let body = serde_json::to_string_pretty(value).map_err(|e| presentation(&e))?;
        let target = self.dir.join(name);
        let tmp = self.dir.join(format!("{name}.tmp"));
        std::fs::write(&tmp, body).map_err(|e| presentation(&e))?;
        std::fs::rename(&tmp, &target).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            presentation(&e)
        })
    }

    fn remove(&self, kind: NotificationKind) -> Result<(), SyncError> {
        let path = self.path_for(kind);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SyncError::Presentation(format!("{}: {e}", path.display()))),
        }
    }
}

impl NotificationSink for FileSink {
    fn open_channels(&self, channels: &[Channel]) -> Result<(), SyncError> {
        self.write_json("channels.json", channels)
    }

    fn post(&self, notification: &Notification) -> Result<(), SyncError> {
        self.write_json(notification.kind.file_name(), notification)
    }

    fn cancel(&self, kind: NotificationKind) -> Result<(), SyncError> {
        self.remove(kind)
    }

    fn release(&self) -> Result<(), SyncError> {
        self.remove(NotificationKind::Ongoing)
    }
}

/// Holds the latest [`StatusSnapshot`] and renders notifications.
pub struct StatusPresenter {
    snapshot: RwLock<Arc<StatusSnapshot>>,
    // Keeps snapshot replacement and its render in the same order.
    render_lock: Mutex<()>,
    // Set by `release`, cleared by `open_channels`. Renders in between are dropped.
    released: AtomicBool,
    sink: Box<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
}

impl StatusPresenter {
    pub fn new(sink: Box<dyn NotificationSink>) -> Self {
        Self::with_clock(sink, Arc::new(SystemClock))
    }

    pub fn with_clock(sink: Box<dyn NotificationSink>, clock: Arc<dyn Clock>) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(StatusSnapshot::default())),
            render_lock: Mutex::new(()),
            released: AtomicBool::new(false),
            sink,
            clock,
        }
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<StatusSnapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn open_channels(&self) {
        self.released.store(false, Ordering::SeqCst);
        report(self.sink.open_channels(&[STATUS_CHANNEL, ALARM_CHANNEL]));
    }

    /// Replace the snapshot and redraw the ongoing notification.
    pub fn render_ongoing(&self, snapshot: StatusSnapshot) {
        let _guard = self.render_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let snapshot = Arc::new(snapshot);
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&snapshot);
        if self.released.load(Ordering::SeqCst) {
            return;
        }
        let notification = Notification::ongoing(&snapshot, self.clock.now());
        report(self.sink.post(&notification));
    }

    /// Redraw the ongoing notification from the current snapshot.
    pub fn refresh_ongoing(&self) {
        let _guard = self.render_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.released.load(Ordering::SeqCst) {
            return;
        }
        let notification = Notification::ongoing(&self.snapshot(), self.clock.now());
        report(self.sink.post(&notification));
    }

    pub fn render_alarm(&self, title: &str, message: &str) {
        let _guard = self.render_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.released.load(Ordering::SeqCst) {
            return;
        }
        let notification = Notification::alarm(title, message, self.clock.now());
        tracing::info!(title, message, "alarm raised");
        report(self.sink.post(&notification));
    }

    pub fn clear_alarm(&self) {
        let _guard = self.render_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.released.load(Ordering::SeqCst) {
            return;
        }
        report(self.sink.cancel(NotificationKind::Alarm));
    }

    /// Remove both notifications. Later renders only update the snapshot
    /// until [`open_channels`](Self::open_channels) is called again.
    pub fn release(&self) {
        let _guard = self.render_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.released.store(true, Ordering::SeqCst);
        report(self.sink.cancel(NotificationKind::Alarm));
        report(self.sink.release());
    }
}

fn report(result: Result<(), SyncError>) {
    if let Err(err) = result {
        tracing::warn!(error = %err, "notification not rendered");
    }
}
