use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind};
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::time::{Instant, MissedTickBehavior};

use mooring_core::{Config, SyncResult};
use mooring_sync::{pipeline, MountPrimitive, ProcessSupervisor};

use crate::error::{io_err, DaemonError};
use crate::log_rotation::{rotate_logs, RotationPolicy};
use crate::paths::{self, logs_dir, run_dir, socket_path};
use crate::protocol::{DaemonRequest, DaemonResponse, CMD_STATUS, CMD_STOP, CMD_SYNC};
use crate::s3fs::S3fsMount;
use crate::supervisor::LocalSupervisor;

/// `MOORING_LOG_FORMAT=json` switches log output to JSON lines.
pub const ENV_LOG_FORMAT: &str = "MOORING_LOG_FORMAT";

const ROTATION_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Where log lines go. The CLI keeps stdout for command output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    Stdout,
    Stderr,
    /// Every event appends to `log`; warnings and errors also go to
    /// `errors`. Files are reopened per event so rotation never strands
    /// writes.
    Files { log: PathBuf, errors: PathBuf },
}

impl LogTarget {
    /// The daemon's log files under `home`.
    pub fn daemon_files(home: &Path) -> Self {
        Self::Files {
            log: paths::log_path(home),
            errors: paths::error_log_path(home),
        }
    }
}

struct AppendFile(PathBuf);

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for AppendFile {
    type Writer = Box<dyn io::Write>;

    fn make_writer(&'a self) -> Self::Writer {
        match OpenOptions::new().create(true).append(true).open(&self.0) {
            Ok(file) => Box::new(file),
            Err(_) => Box::new(io::sink()),
        }
    }
}

/// What the daemon remembers between runs. In memory only.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DaemonState {
    pub started_at_unix: u64,
    pub last_run_at_unix: Option<u64>,
    pub last_result: Option<SyncResult>,
    pub runs: u64,
}

type SharedState = Arc<RwLock<DaemonState>>;

struct SyncJob {
    source: &'static str,
    respond_to: oneshot::Sender<SyncResult>,
}

/// Everything a sync run needs, shared by the processor task.
#[derive(Clone)]
pub struct SyncBackends {
    pub supervisor: Arc<dyn ProcessSupervisor>,
    pub mounter: Arc<dyn MountPrimitive>,
}

impl SyncBackends {
    /// `sh -c` on this host plus the `s3fs` driver.
    pub fn local() -> Self {
        Self {
            supervisor: Arc::new(LocalSupervisor::new()),
            mounter: Arc::new(S3fsMount::new()),
        }
    }
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path, logs: LogTarget) -> Result<(), DaemonError> {
    ensure_runtime_dirs(home)?;
    init_tracing(logs);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Run the daemon with the effective config and local backends.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    let config = mooring_core::config::load_at(&home)?;
    if !config.is_configured() {
        tracing::warn!("R2 storage is not configured; every sync will report failure until it is");
    }
    run_with(home, config, SyncBackends::local()).await
}

/// Run the daemon until `stop`, ctrl-c, or a task failure.
pub async fn run_with(
    home: PathBuf,
    config: Config,
    backends: SyncBackends,
) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;

    let config = Arc::new(config);
    let state: SharedState = Arc::new(RwLock::new(DaemonState {
        started_at_unix: unix_seconds_now(),
        ..DaemonState::default()
    }));

    let (sync_tx, sync_rx) = mpsc::channel::<SyncJob>(16);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    tracing::info!(
        bucket = %config.bucket,
        mount_path = %config.mount_path.display(),
        interval_secs = config.sync_interval_secs,
        "daemon starting",
    );

    let scheduler_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        let sync_tx = sync_tx.clone();
        let interval_secs = config.sync_interval_secs;
        tokio::spawn(async move {
            let result = scheduler_task(interval_secs, sync_tx, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let processor_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        let config = Arc::clone(&config);
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            let result =
                sync_processor_task(config, backends, state, sync_rx, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        let home = home.clone();
        let config = Arc::clone(&config);
        let state = Arc::clone(&state);
        let sync_tx = sync_tx.clone();
        tokio::spawn(async move {
            let result = socket_server_task(
                home,
                config,
                state,
                sync_tx,
                shutdown.clone(),
                shutdown_rx,
            )
            .await;
            let _ = shutdown.send(());
            result
        })
    };
    drop(sync_tx);

    let rotation_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        let home = home.clone();
        tokio::spawn(async move {
            let result = log_rotation_task(home, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (scheduler_result, processor_result, socket_result, rotation_result, signal_result) = tokio::join!(
        scheduler_handle,
        processor_handle,
        socket_handle,
        rotation_handle,
        signal_handle
    );

    handle_join("scheduler", scheduler_result)?;
    handle_join("sync_processor", processor_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("log_rotation", rotation_result)?;
    handle_join("signal_handler", signal_result)?;
    tracing::info!("daemon stopped");
    Ok(())
}

/// Enqueue a sync every `interval_secs`, starting immediately. `0` disables
/// scheduling; syncs then only run on request.
async fn scheduler_task(
    interval_secs: u64,
    sync_tx: mpsc::Sender<SyncJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    if interval_secs == 0 {
        tracing::info!("periodic sync disabled");
        let _ = shutdown_rx.recv().await;
        return Ok(());
    }

    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    // A sync longer than the interval must not queue catch-up runs.
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                match enqueue_sync(&sync_tx, "scheduler").await {
                    Ok(result) if result.success => {
                        tracing::info!(last_sync = ?result.last_sync, details = ?result.details, "scheduled sync finished");
                    }
                    Ok(result) => {
                        tracing::warn!(error = ?result.error, details = ?result.details, "scheduled sync failed");
                    }
                    Err(DaemonError::ChannelClosed(_)) => break,
                    Err(err) => tracing::error!(error = %err, "scheduled sync could not run"),
                }
            }
        }
    }
    Ok(())
}

/// Single consumer: runs never overlap inside one daemon.
async fn sync_processor_task(
    config: Arc<Config>,
    backends: SyncBackends,
    state: SharedState,
    mut sync_rx: mpsc::Receiver<SyncJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe_job = sync_rx.recv() => {
                let Some(job) = maybe_job else { break };
                let started = Instant::now();

                let result = pipeline::run(
                    &config,
                    backends.supervisor.as_ref(),
                    backends.mounter.as_ref(),
                )
                .await;

                tracing::info!(
                    source = job.source,
                    success = result.success,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "sync run finished",
                );
                record_result(&state, &result).await;
                let _ = job.respond_to.send(result);
            }
        }
    }
    Ok(())
}

async fn record_result(state: &SharedState, result: &SyncResult) {
    let mut state = state.write().await;
    state.runs += 1;
    state.last_run_at_unix = Some(unix_seconds_now());
    state.last_result = Some(result.clone());
}

async fn socket_server_task(
    home: PathBuf,
    config: Arc<Config>,
    state: SharedState,
    sync_tx: mpsc::Sender<SyncJob>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "control socket listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let home = home.clone();
                let config = Arc::clone(&config);
                let state = Arc::clone(&state);
                let sync_tx = sync_tx.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) =
                        handle_socket_client(stream, home, config, state, sync_tx, shutdown_tx).await
                    {
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
    home: PathBuf,
    config: Arc<Config>,
    state: SharedState,
    sync_tx: mpsc::Sender<SyncJob>,
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

        let response = match request.cmd.as_str() {
            CMD_STATUS => DaemonResponse::ok(build_status_payload(&home, &config, &state).await),
            CMD_SYNC => match enqueue_sync(&sync_tx, "socket").await {
                Ok(result) => DaemonResponse::ok(json!(result)),
                Err(err) => DaemonResponse::error(err.to_string()),
            },
            CMD_STOP => DaemonResponse::ok(json!({ "stopping": true })),
            other => DaemonResponse::error(format!("unknown command '{other}'")),
        };

        write_response(&mut writer, &response).await?;
        if request.cmd == CMD_STOP {
            // Answer first: the runtime may exit as soon as shutdown fans out.
            let _ = shutdown_tx.send(());
            break;
        }
    }

    Ok(())
}

async fn build_status_payload(home: &Path, config: &Config, state: &SharedState) -> Value {
    let snapshot = state.read().await.clone();
    json!({
        "running": true,
        "pid": std::process::id(),
        "started_at_unix": snapshot.started_at_unix,
        "last_run_at_unix": snapshot.last_run_at_unix,
        "runs": snapshot.runs,
        "last_result": snapshot.last_result,
        "configured": config.is_configured(),
        "bucket": config.bucket,
        "mount_path": config.mount_path.display().to_string(),
        "sync_interval_secs": config.sync_interval_secs,
        "socket": socket_path(home).display().to_string(),
    })
}

async fn enqueue_sync(
    sync_tx: &mpsc::Sender<SyncJob>,
    source: &'static str,
) -> Result<SyncResult, DaemonError> {
    let (tx, rx) = oneshot::channel();
    sync_tx
        .send(SyncJob {
            source,
            respond_to: tx,
        })
        .await
        .map_err(|_| DaemonError::ChannelClosed("sync queue"))?;

    rx.await
        .map_err(|_| DaemonError::ChannelClosed("sync response"))
}

async fn log_rotation_task(
    home: PathBuf,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(ROTATION_CHECK_INTERVAL);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval.tick().await; // no rotation at startup

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                let home = home.clone();
                // Rotation logs its own failures.
                let _ = tokio::task::spawn_blocking(move || {
                    rotate_logs(&home, RotationPolicy::default())
                })
                .await;
            }
        }
    }
    Ok(())
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
    for dir in [run_dir(home), logs_dir(home)] {
        fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let mut payload = serde_json::to_string(response)?;
    payload.push('\n');
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))
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

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Install the global subscriber: `RUST_LOG` filter (default `info`), plain
/// text unless [`ENV_LOG_FORMAT`] asks for JSON.
pub fn init_tracing(target: LogTarget) {
    use tracing_subscriber::fmt::writer::BoxMakeWriter;
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let writer = match target {
        LogTarget::Stdout => BoxMakeWriter::new(std::io::stdout),
        LogTarget::Stderr => BoxMakeWriter::new(std::io::stderr),
        LogTarget::Files { log, errors } => file_writer(log, errors),
    };
    let json = std::env::var(ENV_LOG_FORMAT).is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let _ = if json {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(writer)
            .try_init()
    } else {
        fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_target(false)
            .try_init()
    };
}

fn file_writer(log: PathBuf, errors: PathBuf) -> tracing_subscriber::fmt::writer::BoxMakeWriter {
    use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};

    BoxMakeWriter::new(AppendFile(log).and(AppendFile(errors).with_max_level(tracing::Level::WARN)))
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
