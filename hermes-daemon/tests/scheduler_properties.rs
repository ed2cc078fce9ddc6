//! Lifecycle and cadence behaviour under paused tokio time.
//!
//! Every test drives a real `Supervisor` (or `CadenceController`) with an
//! in-memory preference store, a spy fetcher, and a wall clock that follows
//! tokio's paused clock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use hermes_core::{
    ActiveAlarms, Clock, ControlAction, FetchOutcome, PreferenceStore, SyncConfig, SyncError,
    PREF_FREQUENT_SYNC_ENABLED,
};
use hermes_daemon::{
    CadenceController, LifecycleState, Supervisor, TimerMode, TokioWakeTimer,
};
use hermes_sync::{
    CacheWrite, Fetcher, LogSink, NoopPublisher, Orchestrator, PayloadCache, StatusPresenter,
};
use tokio::sync::mpsc;
use tokio::time::sleep;

struct TokioClock {
    base: DateTime<Utc>,
    start: tokio::time::Instant,
}

impl TokioClock {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            base: Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap(),
            start: tokio::time::Instant::now(),
        })
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        self.base + chrono::Duration::from_std(self.start.elapsed()).unwrap()
    }
}

struct NullCache;

impl PayloadCache for NullCache {
    fn save(&self, _: &str) -> Result<CacheWrite, SyncError> {
        Ok(CacheWrite::Unchanged {
            path: "payload.json".into(),
        })
    }
}

/// Counts calls. When gated, the first call blocks until released and
/// returns `gated_alarms`; every other call returns no alarms.
struct SpyFetcher {
    calls: AtomicU64,
    gate: Mutex<Option<(mpsc::UnboundedSender<()>, std_mpsc::Receiver<()>)>>,
    gated_alarms: ActiveAlarms,
}

impl SpyFetcher {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU64::new(0),
            gate: Mutex::new(None),
            gated_alarms: ActiveAlarms::new(),
        })
    }

    /// Returns the fetcher, a "fetch started" receiver and the release sender.
    fn gated() -> (Arc<Self>, mpsc::UnboundedReceiver<()>, std_mpsc::Sender<()>) {
        Self::gated_with(&[])
    }

    fn gated_with(
        alarms: &[&str],
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<()>, std_mpsc::Sender<()>) {
        let (started_tx, started_rx) = mpsc::unbounded_channel();
        let (release_tx, release_rx) = std_mpsc::channel();
        let fetcher = Arc::new(Self {
            calls: AtomicU64::new(0),
            gate: Mutex::new(Some((started_tx, release_rx))),
            gated_alarms: alarms.iter().copied().collect(),
        });
        (fetcher, started_rx, release_tx)
    }

    fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Fetcher for SpyFetcher {
    fn fetch(&self) -> Result<FetchOutcome, SyncError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().take();
        let mut alarms = ActiveAlarms::new();
        if let Some((started, release)) = gate {
            let _ = started.send(());
            let _ = release.recv();
            alarms = self.gated_alarms.clone();
        }
        Ok(FetchOutcome {
            raw_payload: "{}".to_string(),
            active_alarm_items: alarms,
        })
    }
}

struct Fixture {
    supervisor: Arc<Supervisor>,
    timer: Arc<TokioWakeTimer>,
    prefs: Arc<PreferenceStore>,
}

fn orchestrator(
    fetcher: Arc<dyn Fetcher>,
    prefs: Arc<PreferenceStore>,
    frequent: Duration,
    critical: Duration,
    clock: Arc<dyn Clock>,
) -> Arc<Orchestrator> {
    let config = SyncConfig::new(prefs, frequent, critical);
    Arc::new(
        Orchestrator::new(
            fetcher,
            Arc::new(NullCache),
            Arc::new(StatusPresenter::with_clock(Box::new(LogSink), clock.clone())),
            Arc::new(NoopPublisher),
            config,
        )
        .with_clock(clock),
    )
}

fn supervisor(
    fetcher: Arc<dyn Fetcher>,
    frequent: Duration,
    critical: Duration,
    exact_permitted: bool,
) -> Fixture {
    let clock = TokioClock::new();
    let prefs = Arc::new(PreferenceStore::in_memory());
    let orch = orchestrator(fetcher, prefs.clone(), frequent, critical, clock.clone());

    let (tx, rx) = mpsc::unbounded_channel();
    let timer = Arc::new(TokioWakeTimer::new(
        tx.clone(),
        exact_permitted,
        Duration::from_secs(5),
        clock.clone(),
    ));
    let supervisor = Arc::new(Supervisor::new(orch, timer.clone(), clock, tx));
    tokio::spawn(supervisor.clone().run_actions(rx));
    Fixture {
        supervisor,
        timer,
        prefs,
    }
}

#[tokio::test(start_paused = true, flavor = "current_thread")]
async fn frequent_loop_runs_immediately_then_every_interval() {
    let clock = TokioClock::new();
    let spy = SpyFetcher::new();
    let orch = orchestrator(
        spy.clone(),
        Arc::new(PreferenceStore::in_memory()),
        Duration::from_millis(1000),
        Duration::from_secs(3600),
        clock,
    );
    let cadence = CadenceController::new(orch.clone());
    cadence.start();

    let began = tokio::time::Instant::now();
    let mut stamps = Vec::new();
    for (at_ms, expected_calls) in [(500u64, 1u64), (1500, 2), (2500, 3), (3100, 4)] {
        tokio::time::sleep_until(began + Duration::from_millis(at_ms)).await;
        assert_eq!(spy.calls(), expected_calls, "calls at {at_ms}ms");
        stamps.push(orch.presenter().snapshot().updated_at.expect("snapshot stamped"));
    }

    assert!(
        stamps.windows(2).all(|pair| pair[0] < pair[1]),
        "snapshot timestamps must increase: {stamps:?}"
    );
    assert_eq!(cadence.runs(), 4);
    cadence.stop();
}

#[tokio::test(start_paused = true, flavor = "current_thread")]
async fn start_stop_sequences_never_leave_two_loops() {
    let spy = SpyFetcher::new();
    let fx = supervisor(spy.clone(), Duration::from_millis(700), Duration::from_secs(3600), true);

    // Deterministic pseudo-random action sequence.
    let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
    for _ in 0..60 {
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        let action = match seed % 4 {
            0 => ControlAction::Start,
            1 => ControlAction::Stop,
            2 => ControlAction::StartFrequent,
            _ => ControlAction::StopFrequent,
        };
        fx.supervisor.dispatch(action);
        assert!(fx.supervisor.cadence().pending() <= 1);
        sleep(Duration::from_millis(seed % 900)).await;
        assert!(fx.supervisor.cadence().pending() <= 1);
    }
    fx.supervisor.stop();
}

#[tokio::test(start_paused = true, flavor = "current_thread")]
async fn no_fetch_after_stop_and_stop_is_idempotent() {
    let spy = SpyFetcher::new();
    let fx = supervisor(spy.clone(), Duration::from_secs(1), Duration::from_secs(60), true);

    assert!(fx.supervisor.dispatch(ControlAction::Start));
    sleep(Duration::from_millis(2500)).await;
    assert!(spy.calls() >= 3, "frequent runs plus the bootstrap critical run");

    assert!(fx.supervisor.dispatch(ControlAction::Stop));
    let after_first_stop = fx.supervisor.status();
    assert!(!fx.supervisor.dispatch(ControlAction::Stop));
    let after_second_stop = fx.supervisor.status();

    assert_eq!(after_first_stop.state, LifecycleState::Stopped);
    assert_eq!(after_second_stop.state, LifecycleState::Stopped);
    assert_eq!(after_first_stop.frequent_running, after_second_stop.frequent_running);
    assert_eq!(after_first_stop.next_critical, after_second_stop.next_critical);
    assert!(after_second_stop.next_critical.is_none());
    assert!(fx.timer.armed().is_none());

    let calls = spy.calls();
    assert!(!fx.supervisor.dispatch(ControlAction::CriticalTick));
    assert!(!fx.supervisor.dispatch(ControlAction::StartFrequent));
    sleep(Duration::from_secs(300)).await;
    assert_eq!(spy.calls(), calls, "stopped cadences must not fetch");
}

#[tokio::test(start_paused = true, flavor = "current_thread")]
async fn frequent_pref_flip_mid_run_finishes_run_then_idles() {
    let (spy, mut started, release) = SpyFetcher::gated();
    let fx = supervisor(spy.clone(), Duration::from_secs(1), Duration::from_secs(3600), true);

    fx.supervisor.start();
    fx.supervisor.critical().cancel();
    started.recv().await.expect("first fetch started");

    fx.prefs.set_bool(PREF_FREQUENT_SYNC_ENABLED, false).unwrap();
    release.send(()).unwrap();

    sleep(Duration::from_secs(10)).await;
    assert_eq!(fx.supervisor.cadence().runs(), 1);
    assert!(!fx.supervisor.cadence().is_running());
    assert_eq!(fx.supervisor.state(), LifecycleState::Running);
    let snapshot = fx.supervisor.orchestrator().presenter().snapshot();
    assert!(
        snapshot.status_text.starts_with("Sync: Success @ "),
        "in-flight run still applied: {}",
        snapshot.status_text
    );

    // Flipping back resumes through the subscription.
    fx.prefs.set_bool(PREF_FREQUENT_SYNC_ENABLED, true).unwrap();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(fx.supervisor.cadence().runs(), 2);
    fx.supervisor.stop();
}

#[tokio::test(start_paused = true, flavor = "current_thread")]
async fn in_flight_result_discarded_after_stop() {
    let (spy, mut started, release) = SpyFetcher::gated();
    let fx = supervisor(spy.clone(), Duration::from_secs(1), Duration::from_secs(3600), true);

    fx.supervisor.start();
    started.recv().await.expect("fetch started");
    fx.supervisor.stop();
    release.send(()).unwrap();
    sleep(Duration::from_secs(5)).await;

    let orch = fx.supervisor.orchestrator();
    assert_eq!(orch.presenter().snapshot().status_text, "Initializing...");
    assert!(orch.last_outcome().is_none());
    assert_eq!(spy.calls(), 1);
}

#[tokio::test(start_paused = true, flavor = "current_thread")]
async fn critical_cadence_rearms_itself() {
    let spy = SpyFetcher::new();
    let fx = supervisor(spy.clone(), Duration::from_secs(1), Duration::from_secs(60), true);
    fx.prefs.set_bool(PREF_FREQUENT_SYNC_ENABLED, false).unwrap();

    fx.supervisor.start();
    let first = fx.supervisor.status().next_critical.expect("bootstrap armed");
    assert_eq!(first.mode, TimerMode::Exact);

    sleep(Duration::from_secs(2)).await;
    let status = fx.supervisor.status();
    assert_eq!(status.critical_runs, 1);
    let next = status.next_critical.expect("re-armed");
    assert_eq!((next.fires_at - first.fires_at).num_seconds(), 60);
    assert!(status.last_outcome.expect("applied").was_critical);

    sleep(Duration::from_secs(60)).await;
    assert_eq!(fx.supervisor.status().critical_runs, 2);
    assert_eq!(spy.calls(), 2);
    fx.supervisor.stop();
}

#[tokio::test(start_paused = true, flavor = "current_thread")]
async fn exact_denied_falls_back_to_inexact_and_records_degradation_once() {
    let spy = SpyFetcher::new();
    let fx = supervisor(spy.clone(), Duration::from_secs(1), Duration::from_secs(60), false);
    fx.prefs.set_bool(PREF_FREQUENT_SYNC_ENABLED, false).unwrap();

    fx.supervisor.start();
    let status = fx.supervisor.status();
    let scheduled = status.next_critical.expect("armed");
    assert_eq!(scheduled.mode, TimerMode::Inexact);
    assert!(scheduled.fires_at >= scheduled.deadline);
    assert_eq!(status.degraded_count, 1);
    assert!(status.scheduling_degraded);

    // 09:00:01 rounds up to the 5 s window boundary at 09:00:05.
    sleep(Duration::from_secs(4)).await;
    assert_eq!(spy.calls(), 0);
    sleep(Duration::from_secs(2)).await;
    assert_eq!(spy.calls(), 1, "inexact timer still fires");

    let status = fx.supervisor.status();
    assert_eq!(status.degraded_count, 1, "still the same degraded period");
    assert!(status.scheduling_degraded);
    assert_eq!(status.next_critical.expect("re-armed").mode, TimerMode::Inexact);

    // Two more inexact ticks, each re-arm denied again.
    sleep(Duration::from_secs(130)).await;
    let status = fx.supervisor.status();
    assert_eq!(status.critical_runs, 3);
    assert_eq!(status.degraded_count, 1);

    fx.timer.set_exact_permitted(true);
    sleep(Duration::from_secs(60)).await;
    let status = fx.supervisor.status();
    assert_eq!(status.critical_runs, 4);
    assert_eq!(status.degraded_count, 1);
    assert!(!status.scheduling_degraded);
    assert_eq!(status.next_critical.expect("re-armed").mode, TimerMode::Exact);
    fx.supervisor.stop();
}

#[tokio::test(start_paused = true, flavor = "current_thread")]
async fn restart_during_fetch_discards_stale_result_and_serializes_runs() {
    let (spy, mut started, release) = SpyFetcher::gated_with(&["STALE"]);
    let fx = supervisor(spy.clone(), Duration::from_secs(1), Duration::from_secs(3600), true);

    fx.supervisor.start();
    started.recv().await.expect("first fetch started");
    fx.supervisor.stop();
    fx.supervisor.start();

    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(spy.calls(), 1, "new loop waits for the in-flight fetch");
    assert_eq!(fx.supervisor.cadence().pending(), 1);

    release.send(()).unwrap();
    sleep(Duration::from_millis(100)).await;

    assert_eq!(spy.calls(), 2);
    assert_eq!(fx.supervisor.cadence().runs(), 2);
    let outcome = fx
        .supervisor
        .orchestrator()
        .last_outcome()
        .expect("new session's run applied");
    assert!(outcome.succeeded);
    assert!(
        outcome.active_alarm_items.is_empty(),
        "stale result applied: {}",
        outcome.active_alarm_items
    );
    fx.supervisor.stop();
}

#[tokio::test(start_paused = true, flavor = "current_thread")]
async fn critical_run_from_before_a_restart_does_not_rearm() {
    let (spy, mut started, release) = SpyFetcher::gated();
    let fx = supervisor(spy.clone(), Duration::from_secs(1), Duration::from_secs(1800), true);
    fx.prefs.set_bool(PREF_FREQUENT_SYNC_ENABLED, false).unwrap();

    fx.supervisor.start();
    started.recv().await.expect("bootstrap critical fetch started");
    fx.supervisor.stop();
    fx.supervisor.start();

    let bootstrap = fx.supervisor.status().next_critical.expect("bootstrap armed");
    assert_eq!(
        bootstrap.fires_at,
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 2).unwrap()
    );

    release.send(()).unwrap();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(fx.supervisor.status().next_critical, Some(bootstrap));
    assert!(fx.supervisor.orchestrator().last_outcome().is_none());

    sleep(Duration::from_secs(2)).await;
    let status = fx.supervisor.status();
    assert_eq!(status.critical_runs, 2, "restarted bootstrap tick runs");
    assert_eq!(spy.calls(), 2);
    assert!(status.last_outcome.expect("applied").was_critical);
    let next = status.next_critical.expect("re-armed");
    assert_eq!((next.fires_at - bootstrap.fires_at).num_seconds(), 1800);
    fx.supervisor.stop();
}
