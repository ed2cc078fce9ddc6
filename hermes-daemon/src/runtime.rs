use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

use hermes_core::{
    prefs::prefs_path_at, ControlAction, HermesConfig, PreferenceStore, SinkKind, SyncConfig,
    SystemClock,
};
use hermes_sync::{
    FileCache, FileSink, HttpFetcher, LogSink, NotificationSink, Orchestrator, StatusPresenter,
};

use crate::bus::EventBus;
use crate::critical::TokioWakeTimer;
use crate::error::{io_err, DaemonError};
use crate::paths::{
    hermes_root, logs_dir, notifications_dir, run_dir, socket_path, PREFS_DEBOUNCE_WINDOW,
};
use crate::protocol::{DaemonRequest, DaemonResponse, CMD_SHUTDOWN, CMD_STATUS, CMD_SUBSCRIBE};
use crate::supervisor::Supervisor;

/// Overrides from the `hermes daemon start` command line.
#[derive(Debug, Clone, Default)]
pub struct DaemonOptions {
    pub frequent_interval: Option<Duration>,
    pub critical_interval: Option<Duration>,
    pub json_logs: bool,
}

/// Everything a socket client can reach.
pub struct DaemonState {
    pub home: PathBuf,
    pub supervisor: Arc<Supervisor>,
    pub cache: Arc<FileCache>,
    pub prefs: Arc<PreferenceStore>,
    pub events: EventBus,
    pub started_at: DateTime<Utc>,
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path, options: DaemonOptions) -> Result<(), DaemonError> {
    init_tracing(options.json_logs);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf(), options))
}

/// Run the daemon runtime.
pub async fn run(home: PathBuf, options: DaemonOptions) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;

    let config = HermesConfig::load_at(&home)?;
    let prefs = Arc::new(PreferenceStore::open_at(&home)?);
    let fetcher = Arc::new(HttpFetcher::from_config(&config.source)?);
    let cache = Arc::new(FileCache::open_at(&home));
    let sink: Box<dyn NotificationSink> = match config.notifications.sink {
        SinkKind::File => Box::new(FileSink::new(notifications_dir(&home))),
        SinkKind::Log => Box::new(LogSink),
    };
    let presenter = Arc::new(StatusPresenter::new(sink));
    let events = EventBus::default();
    let sync_config = SyncConfig::new(
        Arc::clone(&prefs),
        options
            .frequent_interval
            .unwrap_or_else(|| config.schedule.frequent_interval()),
        options
            .critical_interval
            .unwrap_or_else(|| config.schedule.critical_interval()),
    );
    tracing::info!(
        url = %fetcher.url(),
        config = ?sync_config,
        exact_alarms = config.schedule.exact_alarms,
        "daemon starting"
    );

    let orchestrator = Arc::new(Orchestrator::new(
        fetcher,
        cache.clone(),
        presenter,
        Arc::new(events.clone()),
        sync_config,
    ));

    let (action_tx, action_rx) = mpsc::unbounded_channel::<ControlAction>();
    let clock = Arc::new(SystemClock);
    let timer = Arc::new(TokioWakeTimer::new(
        action_tx.clone(),
        config.schedule.exact_alarms,
        config.schedule.inexact_window(),
        clock.clone(),
    ));
    let supervisor = Arc::new(Supervisor::new(orchestrator, timer, clock, action_tx));
    supervisor.start();

    let state = Arc::new(DaemonState {
        home: home.clone(),
        supervisor: supervisor.clone(),
        cache,
        prefs: prefs.clone(),
        events,
        started_at: Utc::now(),
    });

    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let control_handle = {
        let shutdown = shutdown_tx.clone();
        let supervisor = supervisor.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => {}
                _ = supervisor.run_actions(action_rx) => {
                    let _ = shutdown.send(());
                }
            }
            Ok::<(), DaemonError>(())
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let state = state.clone();
        tokio::spawn(async move {
            let result = socket_server_task(state, shutdown.clone(), shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let prefs_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        tokio::spawn(async move {
            let result = prefs_watcher_task(home, prefs, shutdown.subscribe()).await;
            if let Err(err) = &result {
                tracing::error!(error = %err, "preferences watcher stopped");
                let _ = shutdown.send(());
            }
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!(
                            "ctrl-c handler failed: {err}"
                        ))),
                    }
                }
            }
        })
    };

    let (control_result, socket_result, prefs_result, signal_result) =
        tokio::join!(control_handle, socket_handle, prefs_handle, signal_handle);

    supervisor.stop();

    handle_join("control", control_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("prefs_watcher", prefs_result)?;
    handle_join("signal_handler", signal_result)?;
    tracing::info!("daemon exited");
    Ok(())
}

async fn prefs_watcher_task(
    home: PathBuf,
    prefs: Arc<PreferenceStore>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let root = hermes_root(&home);
    // FSEvents reports real paths (/private/var/... on macOS).
    let root = fs::canonicalize(&root).unwrap_or(root);
    let prefs_name = prefs_path_at(&home)
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher: RecommendedWatcher = recommended_watcher(move |event| {
        let _ = event_tx.send(event);
    })?;
    watcher.watch(&root, RecursiveMode::NonRecursive)?;
    tracing::debug!(path = %root.display(), "watching preferences");

    let mut debounce = Debounce::new(PREFS_DEBOUNCE_WINDOW);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(error = %err, "watcher event error");
                        continue;
                    }
                };
                if !is_relevant_event_kind(&event.kind) {
                    continue;
                }
                let touches_prefs = event
                    .paths
                    .iter()
                    .any(|path| path.file_name() == Some(prefs_name.as_os_str()));
                if !touches_prefs || !debounce.should_fire(&root, Instant::now()) {
                    continue;
                }

                // Let the burst settle so the reload sees the final file.
                tokio::time::sleep(PREFS_DEBOUNCE_WINDOW).await;
                match prefs.reload() {
                    Ok(changed) if changed.is_empty() => {}
                    Ok(changed) => tracing::info!(keys = ?changed, "preferences reloaded"),
                    Err(err) => tracing::warn!(error = %err, "preferences reload failed"),
                }
            }
        }
    }

    Ok(())
}

async fn socket_server_task(
    state: Arc<DaemonState>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&state.home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let state = state.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, state, shutdown_tx).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    state: Arc<DaemonState>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        match request.cmd.as_str() {
            CMD_SUBSCRIBE => {
                return stream_events(&mut writer, &state, shutdown_tx.subscribe()).await;
            }
            CMD_SHUTDOWN => {
                write_response(&mut writer, &DaemonResponse::ok(json!({ "stopping": true })))
                    .await?;
                let _ = shutdown_tx.send(());
                return Ok(());
            }
            _ => {
                let response = handle_command(&state, &request.cmd);
                write_response(&mut writer, &response).await?;
            }
        }
    }

    Ok(())
}

fn handle_command(state: &DaemonState, cmd: &str) -> DaemonResponse {
    if cmd == CMD_STATUS {
        return match build_status_payload(state) {
            Ok(payload) => DaemonResponse::ok(payload),
            Err(err) => DaemonResponse::error(err.to_string()),
        };
    }
    match cmd.parse::<ControlAction>() {
        Ok(action) => {
            let applied = state.supervisor.dispatch(action);
            DaemonResponse::ok(json!({
                "action": action,
                "applied": applied,
                "state": state.supervisor.state(),
            }))
        }
        Err(_) => DaemonResponse::error(format!("unknown command '{cmd}'")),
    }
}

async fn stream_events(
    writer: &mut OwnedWriteHalf,
    state: &DaemonState,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut events = state.events.subscribe();
    write_response(writer, &DaemonResponse::ok(json!({ "subscribed": true }))).await?;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => return Ok(()),
            event = events.recv() => {
                let event = match event {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "subscriber lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => return Ok(()),
                };
                let line = serde_json::to_string(&event)?;
                let sent = async {
                    writer.write_all(line.as_bytes()).await?;
                    writer.write_all(b"\n").await?;
                    writer.flush().await
                }
                .await;
                if let Err(err) = sent {
                    // Client went away.
                    tracing::debug!(error = %err, "subscriber disconnected");
                    return Ok(());
                }
            }
        }
    }
}

fn build_status_payload(state: &DaemonState) -> Result<Value, DaemonError> {
    let supervisor = serde_json::to_value(state.supervisor.status())?;
    let cache = state.cache.latest().map(|cached| {
        json!({
            "path": state.cache.path().display().to_string(),
            "sha256": cached.sha256,
            "saved_at": cached.saved_at,
            "bytes": cached.raw.len(),
        })
    });
    Ok(json!({
        "running": true,
        "label": crate::paths::DAEMON_LABEL,
        "started_at": state.started_at,
        "supervisor": supervisor,
        "cache": cache,
        "prefs": state.prefs.values(),
        "subscribers": state.events.subscriber_count(),
        "socket": socket_path(&state.home).display().to_string(),
    }))
}

/// Per-key leading-edge debounce.
struct Debounce {
    window: Duration,
    seen: HashMap<PathBuf, Instant>,
}

impl Debounce {
    fn new(window: Duration) -> Self {
        Self {
            window,
            seen: HashMap::new(),
        }
    }

    fn should_fire(&mut self, key: &Path, now: Instant) -> bool {
        self.seen
            .retain(|_, seen_at| now.duration_since(*seen_at) <= Duration::from_secs(30));
        match self.seen.get(key) {
            Some(last) if now.duration_since(*last) < self.window => false,
            _ => {
                self.seen.insert(key.to_path_buf(), now);
                true
            }
        }
    }
}

fn is_relevant_event_kind(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_))
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    for dir in [hermes_root(home), run_dir(home), logs_dir(home)] {
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        }
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

/// Install the global subscriber: `RUST_LOG` filter (default `info`),
/// target suppressed, JSON lines when `json` is set.
pub fn init_tracing(json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        let _ = fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .try_init();
    } else {
        let _ = fmt().with_env_filter(filter).with_target(false).try_init();
    }
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}
