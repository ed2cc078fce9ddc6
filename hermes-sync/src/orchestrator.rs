//! One sync run: fetch → cache → alarms → snapshot → event.
//!
//! ## Failure policy
//!
//! | Step    | On error                                              |
//! |---------|-------------------------------------------------------|
//! | fetch   | failure snapshot, run ends, `succeeded = false`       |
//! | cache   | logged, run continues                                 |
//! | render  | logged by the presenter, run continues                |
//!
//! Nothing escapes [`Orchestrator::run_once`]; the next tick is the retry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Local, Utc};
use hermes_core::{
    ActiveAlarms, Clock, StatusSnapshot, SyncConfig, SyncOrigin, SyncOutcome, SystemClock,
};

use crate::cache::{CacheWrite, PayloadCache};
use crate::events::{EventPublisher, SyncEvent};
use crate::fetcher::Fetcher;
use crate::presenter::StatusPresenter;

/// Title of the alarm notification.
pub const ALARM_TITLE: &str = "Critical Alert";

/// Lifecycle counter shared by the supervisor and every run. Odd while
/// running, even while stopped; each `begin` and `end` bumps it.
///
/// A run applies its result only if the counter still holds the value it
/// was issued under, so a STOP → START during a fetch discards the result
/// of the older session.
#[derive(Debug, Clone)]
pub struct Session(Arc<AtomicU64>);

/// Counter value a run was issued under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionToken(u64);

impl Session {
    pub fn new(active: bool) -> Self {
        Self(Arc::new(AtomicU64::new(u64::from(active))))
    }

    /// Enter a new running session. Returns the live token if already running.
    pub fn begin(&self) -> SessionToken {
        match self
            .0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n % 2 == 0).then_some(n + 1)
            }) {
            Ok(previous) => SessionToken(previous + 1),
            Err(current) => SessionToken(current),
        }
    }

    /// Leave the running session. No-op while stopped.
    pub fn end(&self) {
        let _ = self
            .0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n % 2 == 1).then_some(n + 1)
            });
    }

    pub fn is_active(&self) -> bool {
        self.0.load(Ordering::SeqCst) % 2 == 1
    }

    pub fn token(&self) -> SessionToken {
        SessionToken(self.0.load(Ordering::SeqCst))
    }

    /// `true` while `token` names the running session.
    pub fn is_current(&self, token: SessionToken) -> bool {
        token.0 % 2 == 1 && self.0.load(Ordering::SeqCst) == token.0
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Alarm notification body for the given items.
pub fn alarm_message(alarms: &ActiveAlarms) -> String {
    match alarms.len() {
        1 => format!("Alarm: {} is active!", alarms.first().unwrap_or_default()),
        n => format!("{n} alarms active. Check app."),
    }
}

pub struct Orchestrator {
    fetcher: Arc<dyn Fetcher>,
    cache: Arc<dyn PayloadCache>,
    presenter: Arc<StatusPresenter>,
    events: Arc<dyn EventPublisher>,
    config: SyncConfig,
    clock: Arc<dyn Clock>,
    session: Session,
    last_outcome: Mutex<Option<SyncOutcome>>,
}

impl Orchestrator {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        cache: Arc<dyn PayloadCache>,
        presenter: Arc<StatusPresenter>,
        events: Arc<dyn EventPublisher>,
        config: SyncConfig,
    ) -> Self {
        Self {
            fetcher,
            cache,
            presenter,
            events,
            config,
            clock: Arc::new(SystemClock),
            session: Session::default(),
            last_outcome: Mutex::new(None),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_session(mut self, session: Session) -> Self {
        self.session = session;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn presenter(&self) -> &Arc<StatusPresenter> {
        &self.presenter
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Outcome of the most recent applied run.
    pub fn last_outcome(&self) -> Option<SyncOutcome> {
        self.last_outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Run one sync under the current session. Blocks on the fetch; call
    /// from a blocking thread.
    pub fn run_once(&self, origin: SyncOrigin) -> SyncOutcome {
        self.run_in(origin, self.session.token())
    }

    /// Run one sync issued under `token`. The result is applied only if
    /// `token` is still the running session once the fetch returns.
    pub fn run_in(&self, origin: SyncOrigin, token: SessionToken) -> SyncOutcome {
        tracing::debug!(%origin, "sync started");
        let fetched = self.fetcher.fetch();
        let now = self.clock.now();

        if !self.session.is_current(token) {
            tracing::debug!(%origin, "session ended during fetch, result discarded");
            return match fetched {
                Ok(outcome) => SyncOutcome::success(now, origin, outcome.active_alarm_items),
                Err(err) => SyncOutcome::failure(now, origin, err.to_string()),
            };
        }

        let fetched = match fetched {
            Ok(fetched) => fetched,
            Err(err) => {
                tracing::warn!(%origin, succeeded = false, error = %err, "sync failed");
                self.presenter
                    .render_ongoing(snapshot_for(err.status_word(), origin, now));
                return self.record(SyncOutcome::failure(now, origin, err.to_string()));
            }
        };

        match self.cache.save(&fetched.raw_payload) {
            Ok(CacheWrite::Written { path }) => {
                tracing::debug!(path = %path.display(), "cache updated");
            }
            Ok(CacheWrite::Unchanged { .. }) => {}
            Err(err) => tracing::warn!(error = %err, "cache write failed"),
        }

        self.evaluate_alarms(&fetched.active_alarm_items);
        self.presenter
            .render_ongoing(snapshot_for("Success", origin, now));
        self.events.publish(SyncEvent::DataUpdated {
            critical: origin.is_critical(),
        });

        tracing::info!(
            %origin,
            succeeded = true,
            alarms = fetched.active_alarm_items.len(),
            "sync finished"
        );
        self.record(SyncOutcome::success(now, origin, fetched.active_alarm_items))
    }

    fn evaluate_alarms(&self, alarms: &ActiveAlarms) {
        if !self.config.alarms_enabled() {
            if !alarms.is_empty() {
                tracing::info!(alarms = %alarms, "alarms disabled, not raising");
            }
            self.presenter.clear_alarm();
            return;
        }
        if alarms.is_empty() {
            self.presenter.clear_alarm();
        } else {
            self.presenter.render_alarm(ALARM_TITLE, &alarm_message(alarms));
        }
    }

    fn record(&self, outcome: SyncOutcome) -> SyncOutcome {
        *self.last_outcome.lock().unwrap_or_else(PoisonError::into_inner) = Some(outcome.clone());
        outcome
    }
}

fn snapshot_for(word: &str, origin: SyncOrigin, now: DateTime<Utc>) -> StatusSnapshot {
    let time = now.with_timezone(&Local).format("%H:%M:%S").to_string();
    let marker = if origin.is_critical() { " (C)" } else { "" };
    StatusSnapshot::new(format!("Sync: {word} @ {time}{marker}"), time, now)
}
