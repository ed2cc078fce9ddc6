//! End-to-end runs through `Orchestrator::run_once` with a recording sink,
//! a scripted fetcher, and a real `FileCache` in a temp home.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hermes_core::{
    ActiveAlarms, FetchOutcome, PreferenceStore, SyncConfig, SyncError, SyncOrigin,
    PREF_ALARMS_ENABLED,
};
use hermes_sync::{
    Channel, EventPublisher, FileCache, Fetcher, Notification, NotificationKind, NotificationSink,
    Orchestrator, StatusPresenter, SyncEvent,
};
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Rendered {
    Ongoing(String),
    Alarm(String),
    ClearAlarm,
}

#[derive(Clone, Default)]
struct RecordingSink(Arc<Mutex<Vec<Rendered>>>);

impl RecordingSink {
    fn alarm_events(&self) -> Vec<Rendered> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|r| !matches!(r, Rendered::Ongoing(_)))
            .cloned()
            .collect()
    }
}

impl NotificationSink for RecordingSink {
    fn open_channels(&self, _: &[Channel]) -> Result<(), SyncError> {
        Ok(())
    }

    fn post(&self, n: &Notification) -> Result<(), SyncError> {
        let entry = match n.kind {
            NotificationKind::Ongoing => Rendered::Ongoing(n.body.clone()),
            NotificationKind::Alarm => Rendered::Alarm(n.body.clone()),
        };
        self.0.lock().unwrap().push(entry);
        Ok(())
    }

    fn cancel(&self, kind: NotificationKind) -> Result<(), SyncError> {
        if kind == NotificationKind::Alarm {
            self.0.lock().unwrap().push(Rendered::ClearAlarm);
        }
        Ok(())
    }

    fn release(&self) -> Result<(), SyncError> {
        Ok(())
    }
}

#[derive(Default)]
struct RecordingPublisher(Mutex<Vec<SyncEvent>>);

impl EventPublisher for RecordingPublisher {
    fn publish(&self, event: SyncEvent) {
        self.0.lock().unwrap().push(event);
    }
}

/// Pops scripted results in order; repeats the last one once exhausted.
/// `Err(reason)` becomes a `SyncError::Fetch`.
struct ScriptedFetcher(Mutex<VecDeque<Result<FetchOutcome, &'static str>>>);

impl ScriptedFetcher {
    fn new(script: Vec<Result<FetchOutcome, &'static str>>) -> Arc<Self> {
        Arc::new(Self(Mutex::new(script.into())))
    }
}

impl Fetcher for ScriptedFetcher {
    fn fetch(&self) -> Result<FetchOutcome, SyncError> {
        let mut script = self.0.lock().unwrap();
        let step = if script.len() > 1 {
            script.pop_front().unwrap()
        } else {
            script.front().cloned().unwrap()
        };
        step.map_err(|reason| SyncError::Fetch(reason.to_string()))
    }
}

fn payload(alarms: &[&str]) -> Result<FetchOutcome, &'static str> {
    let items: ActiveAlarms = alarms.iter().copied().collect();
    let doc: serde_json::Map<String, serde_json::Value> = items
        .iter()
        .map(|name| (name.to_string(), serde_json::json!({"urgency": "Alarm"})))
        .collect();
    Ok(FetchOutcome {
        raw_payload: serde_json::Value::Object(doc).to_string(),
        active_alarm_items: items,
    })
}

struct Harness {
    _home: TempDir,
    sink: RecordingSink,
    events: Arc<RecordingPublisher>,
    cache: Arc<FileCache>,
    prefs: Arc<PreferenceStore>,
    orch: Arc<Orchestrator>,
}

fn harness(fetcher: Arc<dyn Fetcher>) -> Harness {
    let home = TempDir::new().unwrap();
    let sink = RecordingSink::default();
    let events = Arc::new(RecordingPublisher::default());
    let cache = Arc::new(FileCache::open_at(home.path()));
    let prefs = Arc::new(PreferenceStore::in_memory());
    let presenter = Arc::new(StatusPresenter::new(Box::new(sink.clone())));
    let config = SyncConfig::new(
        Arc::clone(&prefs),
        Duration::from_secs(60),
        Duration::from_secs(1800),
    );
    let orch = Arc::new(Orchestrator::new(
        fetcher,
        cache.clone(),
        presenter,
        events.clone(),
        config,
    ));
    Harness {
        _home: home,
        sink,
        events,
        cache,
        prefs,
        orch,
    }
}

#[test]
fn alarm_shown_then_cleared_in_order() {
    let h = harness(ScriptedFetcher::new(vec![payload(&["SPX"]), payload(&[])]));

    h.orch.run_once(SyncOrigin::Frequent);
    h.orch.run_once(SyncOrigin::Frequent);

    assert_eq!(
        h.sink.alarm_events(),
        vec![
            Rendered::Alarm("Alarm: SPX is active!".to_string()),
            Rendered::ClearAlarm,
        ]
    );
}

#[test]
fn multi_item_alarm_message() {
    let h = harness(ScriptedFetcher::new(vec![payload(&["SPX", "DAX"])]));
    let outcome = h.orch.run_once(SyncOrigin::Critical);

    assert_eq!(outcome.active_alarm_items.as_slice(), ["SPX", "DAX"]);
    assert_eq!(
        h.sink.alarm_events(),
        vec![Rendered::Alarm("2 alarms active. Check app.".to_string())]
    );
}

#[test]
fn alarms_disabled_never_renders_an_alarm() {
    let h = harness(ScriptedFetcher::new(vec![
        payload(&["SPX"]),
        payload(&["SPX", "DAX"]),
        payload(&[]),
    ]));
    h.prefs.set_bool(PREF_ALARMS_ENABLED, false).unwrap();

    for _ in 0..4 {
        assert!(h.orch.run_once(SyncOrigin::Frequent).succeeded);
    }

    assert!(h
        .sink
        .alarm_events()
        .iter()
        .all(|r| !matches!(r, Rendered::Alarm(_))));
}

#[test]
fn fetch_error_then_success_recovers() {
    let h = harness(ScriptedFetcher::new(vec![
        Err("connection refused"),
        payload(&[]),
    ]));

    let first = h.orch.run_once(SyncOrigin::Frequent);
    assert!(!first.succeeded);
    assert_eq!(first.failure.as_deref(), Some("fetch failed: connection refused"));
    assert!(h.orch.presenter().snapshot().status_text.starts_with("Sync: Failed @ "));
    assert!(h.events.0.lock().unwrap().is_empty());
    assert!(h.cache.latest().is_none());

    let second = h.orch.run_once(SyncOrigin::Frequent);
    assert!(second.succeeded);
    assert!(h.orch.presenter().snapshot().status_text.starts_with("Sync: Success @ "));
    assert_eq!(
        *h.events.0.lock().unwrap(),
        vec![SyncEvent::DataUpdated { critical: false }]
    );
    assert_eq!(h.cache.latest().unwrap().raw, "{}");
}

#[test]
fn concurrent_runs_leave_a_whole_snapshot() {
    let h = harness(ScriptedFetcher::new(vec![payload(&["SPX"])]));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let orch = Arc::clone(&h.orch);
            let origin = if i % 2 == 0 {
                SyncOrigin::Frequent
            } else {
                SyncOrigin::Critical
            };
            std::thread::spawn(move || orch.run_once(origin))
        })
        .collect();
    for handle in handles {
        assert!(handle.join().unwrap().succeeded);
    }

    let snapshot = h.orch.presenter().snapshot();
    assert!(snapshot.status_text.starts_with("Sync: Success @ "));
    assert!(snapshot.status_text.contains(&snapshot.last_update_time));
    assert_eq!(h.events.0.lock().unwrap().len(), 8);
}
