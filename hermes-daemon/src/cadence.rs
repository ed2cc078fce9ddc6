//! Frequent cadence: a single serialized loop that runs a sync, then sleeps
//! for the frequent interval, for as long as `frequent_sync_enabled` holds.
//!
//! At most one loop exists at a time. `start` on a live loop is a no-op and
//! `stop` on an idle controller is a no-op, so both are safe to repeat.
//!
//! Runs are serialized across loops too: each run holds the controller's run
//! lock on its blocking thread, so a loop started right after `stop` waits
//! for the previous loop's in-flight fetch before its immediate run.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use hermes_core::SyncOrigin;
use hermes_sync::{Orchestrator, SessionToken};
use tokio::sync::Mutex as RunLock;
use tokio::task::JoinHandle;

struct LoopHandle {
    cancelled: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl LoopHandle {
    fn is_live(&self) -> bool {
        !self.task.is_finished()
    }
}

pub struct CadenceController {
    orchestrator: Arc<Orchestrator>,
    slot: Mutex<Option<LoopHandle>>,
    run_lock: Arc<RunLock<()>>,
    runs: Arc<AtomicU64>,
}

impl CadenceController {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            slot: Mutex::new(None),
            run_lock: Arc::new(RunLock::new(())),
            runs: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Begin the loop with an immediate run. Must be called from within a
    /// tokio runtime. Returns `false` when a loop was already live.
    pub fn start(&self) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(LoopHandle::is_live) {
            tracing::debug!("frequent loop already running");
            return false;
        }

        let cancelled = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(frequent_loop(
            Arc::clone(&self.orchestrator),
            self.orchestrator.session().token(),
            Arc::clone(&cancelled),
            Arc::clone(&self.run_lock),
            Arc::clone(&self.runs),
        ));
        *slot = Some(LoopHandle { cancelled, task });
        tracing::info!(
            interval_ms = self.orchestrator.config().frequent_interval().as_millis() as u64,
            "frequent sync started"
        );
        true
    }

    /// Cancel the pending sleep or run. An in-flight fetch finishes on its
    /// blocking thread and keeps the run lock until then; no new run starts
    /// afterwards. Returns `false` when no loop was live.
    pub fn stop(&self) -> bool {
        let Some(handle) = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return false;
        };
        handle.cancelled.store(true, Ordering::SeqCst);
        handle.task.abort();
        tracing::info!("frequent sync stopped");
        true
    }

    pub fn is_running(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(LoopHandle::is_live)
    }

    /// Number of loops with a pending invocation; never more than one.
    pub fn pending(&self) -> usize {
        usize::from(self.is_running())
    }

    /// Frequent runs started since creation.
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::SeqCst)
    }
}

impl Drop for CadenceController {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn frequent_loop(
    orchestrator: Arc<Orchestrator>,
    token: SessionToken,
    cancelled: Arc<AtomicBool>,
    run_lock: Arc<RunLock<()>>,
    runs: Arc<AtomicU64>,
) {
    loop {
        if !orchestrator.config().frequent_enabled() {
            tracing::info!("frequent sync disabled, loop idle");
            return;
        }

        let guard = Arc::clone(&run_lock).lock_owned().await;
        let run = {
            let orchestrator = Arc::clone(&orchestrator);
            let cancelled = Arc::clone(&cancelled);
            let runs = Arc::clone(&runs);
            tokio::task::spawn_blocking(move || {
                let _guard = guard;
                if cancelled.load(Ordering::SeqCst) {
                    return None;
                }
                runs.fetch_add(1, Ordering::SeqCst);
                Some(orchestrator.run_in(SyncOrigin::Frequent, token))
            })
        };
        match run.await {
            Ok(Some(outcome)) => {
                tracing::debug!(succeeded = outcome.succeeded, "frequent run complete");
            }
            Ok(None) => return,
            Err(err) => tracing::error!(error = %err, "frequent run panicked"),
        }

        if cancelled.load(Ordering::SeqCst) {
            return;
        }
        // Re-read: the preference may have flipped during the fetch.
        if !orchestrator.config().frequent_enabled() {
            tracing::info!("frequent sync disabled, loop idle");
            return;
        }
        tokio::time::sleep(orchestrator.config().frequent_interval()).await;
    }
}
