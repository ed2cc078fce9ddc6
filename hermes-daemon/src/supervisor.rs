//! Lifecycle supervisor: owns both cadences and reacts to control actions.
//!
//! ```text
//! Stopped ──start──▶ Starting ──cadence.start()──▶ Running
//!    ▲                                                │
//!    └──────────── Stopping ◀──────────stop───────────┘
//! ```
//!
//! Control actions arrive on one channel from three producers: the socket
//! server, the preference subscription, and the critical wake timer.
//! `Start` is honoured only when stopped; every other action is ignored
//! unless running.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use hermes_core::{
    Clock, ControlAction, StatusSnapshot, Subscription, SyncOrigin, SyncOutcome,
    PREF_FREQUENT_SYNC_ENABLED,
};
use hermes_sync::{Orchestrator, SessionToken};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::cadence::CadenceController;
use crate::critical::{CriticalScheduler, ScheduledTimer, WakeTimer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Stopped => "stopped",
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Point-in-time view served by the `status` socket command.
#[derive(Debug, Clone, Serialize)]
pub struct SupervisorStatus {
    pub state: LifecycleState,
    pub frequent_running: bool,
    pub frequent_runs: u64,
    pub critical_runs: u64,
    pub next_critical: Option<ScheduledTimer>,
    pub scheduling_degraded: bool,
    pub degraded_count: u64,
    pub snapshot: StatusSnapshot,
    pub last_outcome: Option<SyncOutcome>,
}

pub struct Supervisor {
    orchestrator: Arc<Orchestrator>,
    cadence: CadenceController,
    critical: Arc<CriticalScheduler>,
    actions: mpsc::UnboundedSender<ControlAction>,
    state: Mutex<LifecycleState>,
    subscription: Mutex<Option<Subscription>>,
    /// Session of the critical run in flight, if any.
    critical_in_flight: Arc<Mutex<Option<SessionToken>>>,
    critical_runs: Arc<AtomicU64>,
}

impl Supervisor {
    /// `actions` is the sending half of the channel [`run_actions`](Self::run_actions)
    /// drains; the preference subscription posts to it.
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        timer: Arc<dyn WakeTimer>,
        clock: Arc<dyn Clock>,
        actions: mpsc::UnboundedSender<ControlAction>,
    ) -> Self {
        orchestrator.session().end();
        Self {
            cadence: CadenceController::new(Arc::clone(&orchestrator)),
            critical: Arc::new(CriticalScheduler::new(timer, clock)),
            orchestrator,
            actions,
            state: Mutex::new(LifecycleState::Stopped),
            subscription: Mutex::new(None),
            critical_in_flight: Arc::new(Mutex::new(None)),
            critical_runs: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn cadence(&self) -> &CadenceController {
        &self.cadence
    }

    pub fn critical(&self) -> &CriticalScheduler {
        &self.critical
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// `Stopped → Starting → Running`. Returns `false` if not stopped.
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != LifecycleState::Stopped {
            tracing::debug!(state = %*state, "start ignored");
            return false;
        }
        *state = LifecycleState::Starting;
        self.orchestrator.session().begin();

        let actions = self.actions.clone();
        let subscription = self.orchestrator.config().prefs().on_change(
            PREF_FREQUENT_SYNC_ENABLED,
            move |enabled| {
                let action = if enabled {
                    ControlAction::StartFrequent
                } else {
                    ControlAction::StopFrequent
                };
                if actions.send(action).is_err() {
                    tracing::debug!(%action, "control channel closed");
                }
            },
        );
        *self.subscription.lock().unwrap_or_else(PoisonError::into_inner) = Some(subscription);

        let presenter = self.orchestrator.presenter();
        presenter.open_channels();
        presenter.refresh_ongoing();
        self.critical.schedule_immediate();

        self.cadence.start();
        *state = LifecycleState::Running;
        tracing::info!("supervisor running");
        true
    }

    /// `Running → Stopping → Stopped`. Idempotent.
    pub fn stop(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == LifecycleState::Stopped {
            return false;
        }
        *state = LifecycleState::Stopping;
        self.orchestrator.session().end();

        self.cadence.stop();
        self.critical.cancel();
        self.subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.orchestrator.presenter().release();

        *state = LifecycleState::Stopped;
        tracing::info!("supervisor stopped");
        true
    }

    /// Apply one control action. Returns `true` if it changed anything.
    pub fn dispatch(&self, action: ControlAction) -> bool {
        tracing::debug!(%action, "control action");
        match action {
            ControlAction::Start => return self.start(),
            ControlAction::Stop => return self.stop(),
            _ => {}
        }

        if self.state() != LifecycleState::Running {
            tracing::debug!(%action, state = %self.state(), "ignored while not running");
            return false;
        }
        match action {
            ControlAction::StartFrequent => self.cadence.start(),
            ControlAction::StopFrequent => self.cadence.stop(),
            ControlAction::CriticalTick => self.spawn_critical_run(),
            ControlAction::Start | ControlAction::Stop => false,
        }
    }

    /// Drain the control channel until it closes.
    pub async fn run_actions(
        self: Arc<Self>,
        mut actions: mpsc::UnboundedReceiver<ControlAction>,
    ) {
        while let Some(action) = actions.recv().await {
            self.dispatch(action);
        }
    }

    pub fn status(&self) -> SupervisorStatus {
        SupervisorStatus {
            state: self.state(),
            frequent_running: self.cadence.is_running(),
            frequent_runs: self.cadence.runs(),
            critical_runs: self.critical_runs.load(Ordering::SeqCst),
            next_critical: self.critical.next_scheduled(),
            scheduling_degraded: self.critical.is_degraded(),
            degraded_count: self.critical.degraded_count(),
            snapshot: (*self.orchestrator.presenter().snapshot()).clone(),
            last_outcome: self.orchestrator.last_outcome(),
        }
    }

    /// Coalesces ticks within one session. A run left over from an earlier
    /// session neither blocks the new session's ticks nor re-arms the timer.
    fn spawn_critical_run(&self) -> bool {
        let token = self.orchestrator.session().token();
        {
            let mut in_flight = self
                .critical_in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if *in_flight == Some(token) {
                tracing::debug!("critical run already in flight");
                return false;
            }
            *in_flight = Some(token);
        }

        let orchestrator = Arc::clone(&self.orchestrator);
        let critical = Arc::clone(&self.critical);
        let in_flight = Arc::clone(&self.critical_in_flight);
        let runs = Arc::clone(&self.critical_runs);
        tokio::spawn(async move {
            let run = {
                let orchestrator = Arc::clone(&orchestrator);
                tokio::task::spawn_blocking(move || {
                    orchestrator.run_in(SyncOrigin::Critical, token)
                })
            };
            runs.fetch_add(1, Ordering::SeqCst);
            let result = run.await;
            {
                let mut in_flight = in_flight.lock().unwrap_or_else(PoisonError::into_inner);
                if *in_flight == Some(token) {
                    *in_flight = None;
                }
            }
            if let Err(err) = result {
                tracing::error!(error = %err, "critical run panicked");
            }
            if orchestrator.session().is_current(token) {
                critical.schedule_next(orchestrator.config().critical_interval());
            }
        });
        true
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.stop();
    }
}
