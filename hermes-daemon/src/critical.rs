//! Critical cadence: a self-perpetuating wake timer.
//!
//! Each fire enqueues `ControlAction::CriticalTick`; the supervisor runs a
//! critical sync and re-arms with [`CriticalScheduler::schedule_next`]. Only
//! one timer is armed at a time; arming again replaces it.
//!
//! Exact timers are preferred. When exact scheduling is denied the scheduler
//! falls back to an inexact timer that fires at the next window boundary at
//! or after the deadline. `SchedulingDegraded` is recorded once per
//! transition into the denied state; further denied re-arms only log.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use hermes_core::{Clock, ControlAction, SyncError};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Delay used by [`CriticalScheduler::schedule_immediate`].
pub const IMMEDIATE_DELAY: Duration = Duration::from_secs(1);

/// Longest single sleep. The timer re-reads the wall clock after each slice
/// so a suspended host fires promptly on resume.
const MAX_SLICE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerMode {
    Exact,
    Inexact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScheduledTimer {
    /// Requested deadline.
    pub deadline: DateTime<Utc>,
    /// When the timer will actually fire.
    pub fires_at: DateTime<Utc>,
    pub mode: TimerMode,
}

#[derive(Debug, Clone, Error)]
#[error("exact scheduling denied: {0}")]
pub struct SchedulingDenied(pub String);

/// A wake-capable timer with a single slot.
pub trait WakeTimer: Send + Sync {
    fn arm_exact(&self, deadline: DateTime<Utc>) -> Result<ScheduledTimer, SchedulingDenied>;
    fn arm_inexact(&self, deadline: DateTime<Utc>) -> ScheduledTimer;
    /// Returns `true` if a timer was armed.
    fn disarm(&self) -> bool;
}

/// Wall-clock timer backed by a tokio task. Fires by sending
/// `ControlAction::CriticalTick` on the control channel.
pub struct TokioWakeTimer {
    actions: mpsc::UnboundedSender<ControlAction>,
    exact_permitted: AtomicBool,
    window: Duration,
    clock: Arc<dyn Clock>,
    slot: Mutex<Option<(ScheduledTimer, JoinHandle<()>)>>,
}

impl TokioWakeTimer {
    pub fn new(
        actions: mpsc::UnboundedSender<ControlAction>,
        exact_permitted: bool,
        window: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            actions,
            exact_permitted: AtomicBool::new(exact_permitted),
            window,
            clock,
            slot: Mutex::new(None),
        }
    }

    pub fn set_exact_permitted(&self, permitted: bool) {
        self.exact_permitted.store(permitted, Ordering::SeqCst);
    }

    /// The armed timer, if it has not fired yet.
    pub fn armed(&self) -> Option<ScheduledTimer> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|(_, task)| !task.is_finished())
            .map(|(timer, _)| *timer)
    }

    fn arm(&self, timer: ScheduledTimer) -> ScheduledTimer {
        let task = tokio::spawn(fire_at(
            timer.fires_at,
            Arc::clone(&self.clock),
            self.actions.clone(),
        ));
        let previous = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace((timer, task));
        if let Some((_, task)) = previous {
            task.abort();
        }
        tracing::debug!(fires_at = %timer.fires_at, mode = ?timer.mode, "wake timer armed");
        timer
    }
}

impl WakeTimer for TokioWakeTimer {
    fn arm_exact(&self, deadline: DateTime<Utc>) -> Result<ScheduledTimer, SchedulingDenied> {
        if !self.exact_permitted.load(Ordering::SeqCst) {
            return Err(SchedulingDenied(
                "exact timers are not permitted on this host".to_string(),
            ));
        }
        Ok(self.arm(ScheduledTimer {
            deadline,
            fires_at: deadline,
            mode: TimerMode::Exact,
        }))
    }

    fn arm_inexact(&self, deadline: DateTime<Utc>) -> ScheduledTimer {
        self.arm(ScheduledTimer {
            deadline,
            fires_at: round_up_to_window(deadline, self.window),
            mode: TimerMode::Inexact,
        })
    }

    fn disarm(&self) -> bool {
        match self.slot.lock().unwrap_or_else(PoisonError::into_inner).take() {
            Some((_, task)) => {
                let was_pending = !task.is_finished();
                task.abort();
                was_pending
            }
            None => false,
        }
    }
}

impl Drop for TokioWakeTimer {
    fn drop(&mut self) {
        self.disarm();
    }
}

async fn fire_at(
    fires_at: DateTime<Utc>,
    clock: Arc<dyn Clock>,
    actions: mpsc::UnboundedSender<ControlAction>,
) {
    loop {
        let remaining = (fires_at - clock.now()).to_std().unwrap_or(Duration::ZERO);
        if remaining.is_zero() {
            break;
        }
        tokio::time::sleep(remaining.min(MAX_SLICE)).await;
    }
    if actions.send(ControlAction::CriticalTick).is_err() {
        tracing::debug!("control channel closed, critical tick dropped");
    }
}

/// First multiple of `window` since the Unix epoch at or after `deadline`.
pub fn round_up_to_window(deadline: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    let window_ms = window.as_millis() as i64;
    if window_ms <= 0 {
        return deadline;
    }
    let ms = deadline.timestamp_millis();
    let rounded = ms.div_euclid(window_ms) * window_ms
        + if ms.rem_euclid(window_ms) == 0 { 0 } else { window_ms };
    Utc.timestamp_millis_opt(rounded).single().unwrap_or(deadline)
}

/// Arms the critical wake timer, preferring exact mode.
pub struct CriticalScheduler {
    timer: Arc<dyn WakeTimer>,
    clock: Arc<dyn Clock>,
    degraded: AtomicBool,
    degraded_count: AtomicU64,
    next: Mutex<Option<ScheduledTimer>>,
}

impl CriticalScheduler {
    pub fn new(timer: Arc<dyn WakeTimer>, clock: Arc<dyn Clock>) -> Self {
        Self {
            timer,
            clock,
            degraded: AtomicBool::new(false),
            degraded_count: AtomicU64::new(0),
            next: Mutex::new(None),
        }
    }

    /// Arm the timer `after` from now.
    pub fn schedule_next(&self, after: Duration) -> ScheduledTimer {
        let now = self.clock.now();
        let deadline = chrono::Duration::from_std(after)
            .ok()
            .and_then(|after| now.checked_add_signed(after))
            .unwrap_or(now);

        let scheduled = match self.timer.arm_exact(deadline) {
            Ok(scheduled) => {
                if self.degraded.swap(false, Ordering::SeqCst) {
                    tracing::info!("exact scheduling restored");
                }
                scheduled
            }
            Err(denied) => {
                self.record_degraded(denied);
                self.timer.arm_inexact(deadline)
            }
        };
        *self.next.lock().unwrap_or_else(PoisonError::into_inner) = Some(scheduled);
        tracing::info!(
            fires_at = %scheduled.fires_at,
            mode = ?scheduled.mode,
            "critical sync scheduled"
        );
        scheduled
    }

    /// Bootstrap the chain shortly after start.
    pub fn schedule_immediate(&self) -> ScheduledTimer {
        self.schedule_next(IMMEDIATE_DELAY)
    }

    /// Disarm the pending timer. Returns `true` if one was armed.
    pub fn cancel(&self) -> bool {
        self.next
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let cancelled = self.timer.disarm();
        if cancelled {
            tracing::info!("critical sync cancelled");
        }
        cancelled
    }

    /// The most recently armed timer; cleared by [`cancel`](Self::cancel).
    pub fn next_scheduled(&self) -> Option<ScheduledTimer> {
        *self.next.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    /// Times scheduling fell back from exact to inexact since creation.
    pub fn degraded_count(&self) -> u64 {
        self.degraded_count.load(Ordering::SeqCst)
    }

    fn record_degraded(&self, denied: SchedulingDenied) {
        let err = SyncError::SchedulingDegraded(denied.0);
        if self.degraded.swap(true, Ordering::SeqCst) {
            tracing::debug!(error = %err, mode = "inexact", "still degraded");
        } else {
            self.degraded_count.fetch_add(1, Ordering::SeqCst);
            tracing::warn!(error = %err, mode = "inexact", "critical scheduling degraded");
        }
    }
}
