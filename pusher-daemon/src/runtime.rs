use std::fs;
use std::future::Future;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use notify::{recommended_watcher, Event};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;

use pusher_core::{store, Settings};
use pusher_upload::{auth, DriveUploader, UploadContext, Uploader};

use crate::dispatcher::{Dispatcher, DirectoryWatcher, DispatcherStatus};
use crate::error::{io_err, DaemonError};
use crate::log_rotation::rotate_logs;
use crate::paths::{logs_dir, socket_path};
use crate::pool::{PoolOptions, WorkerPool};
use crate::protocol::{DaemonRequest, DaemonResponse};

const ROTATION_INTERVAL: Duration = Duration::from_secs(5);

/// Live state shared between the dispatcher and the control socket.
#[derive(Debug, Clone, Default)]
pub struct StatusBoard {
    pub dispatcher: DispatcherStatus,
    pub active_lanes: usize,
}

type SharedStatus = Arc<RwLock<StatusBoard>>;
type TaskHandle = (&'static str, JoinHandle<Result<(), DaemonError>>);

/// What every control-socket connection needs to answer a request.
struct Control {
    home: PathBuf,
    status: SharedStatus,
    shutdown: broadcast::Sender<()>,
    started_at: DateTime<Utc>,
}

impl Control {
    async fn answer(&self, request: DaemonRequest) -> DaemonResponse {
        match request {
            DaemonRequest::Status => {
                let board = self.status.read().await.clone();
                DaemonResponse::ok(build_status_payload(&self.home, &board, self.started_at))
            }
            DaemonRequest::Stop => {
                tracing::info!("stop requested over control socket");
                let _ = self.shutdown.send(());
                DaemonResponse::ok(json!({ "stopping": true }))
            }
        }
    }
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let settings = Settings::from_env();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf(), settings))
}

/// Run the daemon against Google Drive.
///
/// Missing credentials abort startup; everything else is recovered from.
pub async fn run(home: PathBuf, settings: Settings) -> Result<(), DaemonError> {
    store::ensure_all_at(&home)?;
    let credentials = auth::load_at(&home)?;
    let uploader: Arc<dyn Uploader> = Arc::new(DriveUploader::new(&settings, &credentials));
    run_with_uploader(home, settings, uploader).await
}

/// Run the daemon with an arbitrary remote store.
pub async fn run_with_uploader(
    home: PathBuf,
    settings: Settings,
    uploader: Arc<dyn Uploader>,
) -> Result<(), DaemonError> {
    store::ensure_all_at(&home)?;
    let logs = logs_dir(&home);
    fs::create_dir_all(&logs).map_err(|e| io_err(&logs, e))?;

    let ctx = Arc::new(UploadContext::new(&home, uploader));
    resolve_container(ctx.clone()).await;

    tracing::info!(
        home = %home.display(),
        workers = settings.workers,
        timeout_secs = settings.upload_timeout.as_secs(),
        "daemon starting",
    );

    let status: SharedStatus = Arc::new(RwLock::new(StatusBoard::default()));
    let (shutdown_tx, _) = broadcast::channel::<()>(16);
    let control = Arc::new(Control {
        home: home.clone(),
        status: status.clone(),
        shutdown: shutdown_tx.clone(),
        started_at: Utc::now(),
    });

    let tasks: [TaskHandle; 4] = [
        supervise(
            "dispatcher",
            &shutdown_tx,
            dispatcher_task(
                home.clone(),
                ctx,
                PoolOptions::from(&settings),
                status,
                shutdown_tx.clone(),
            ),
        ),
        supervise(
            "control_socket",
            &shutdown_tx,
            socket_server_task(control, shutdown_tx.subscribe()),
        ),
        supervise(
            "log_rotation",
            &shutdown_tx,
            log_rotation_task(home, shutdown_tx.subscribe()),
        ),
        supervise(
            "signal_handler",
            &shutdown_tx,
            wait_for_ctrl_c(shutdown_tx.subscribe()),
        ),
    ];

    let mut first_error = None;
    for (task, handle) in tasks {
        if let Err(err) = handle_join(task, handle.await) {
            tracing::error!(task, error = %err, "daemon task failed");
            first_error.get_or_insert(err);
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => {
            tracing::info!("daemon stopped");
            Ok(())
        }
    }
}

/// Spawn `future`; whichever way it ends, every other task is told to stop.
fn supervise<F>(task: &'static str, shutdown: &broadcast::Sender<()>, future: F) -> TaskHandle
where
    F: Future<Output = Result<(), DaemonError>> + Send + 'static,
{
    let shutdown = shutdown.clone();
    let handle = tokio::spawn(async move {
        let result = future.await;
        let _ = shutdown.send(());
        result
    });
    (task, handle)
}

/// Find or create the upload container. Failure is logged; uploads recreate
/// it on demand.
async fn resolve_container(ctx: Arc<UploadContext>) {
    match tokio::task::spawn_blocking(move || ctx.ensure_container()).await {
        Ok(Ok(folder_id)) => tracing::info!(folder_id = %folder_id, "upload container ready"),
        Ok(Err(err)) => {
            tracing::warn!(error = %err, "could not resolve upload container; will retry on upload")
        }
        Err(err) => tracing::error!(error = %err, "container lookup task failed"),
    }
}

async fn dispatcher_task(
    home: PathBuf,
    ctx: Arc<UploadContext>,
    options: PoolOptions,
    status: SharedStatus,
    shutdown: broadcast::Sender<()>,
) -> Result<(), DaemonError> {
    let mut shutdown_rx = shutdown.subscribe();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let watcher = recommended_watcher(move |event| {
        let _ = event_tx.send(event);
    })?;

    let mut dispatcher = Dispatcher::new(&home, watcher)?;
    let mut pool = WorkerPool::new(ctx, options, shutdown);
    publish_status(&status, &dispatcher, &pool).await;

    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => break,
            event = event_rx.recv() => {
                match event {
                    None => break,
                    Some(Err(err)) => tracing::warn!(error = %err, "watcher event error"),
                    Some(Ok(event)) => {
                        for directory_event in dispatcher.handle(&event) {
                            tracing::debug!(event = ?directory_event, "dispatching");
                            pool.dispatch(directory_event);
                        }
                    }
                }
                publish_status(&status, &dispatcher, &pool).await;
            }
        }
    }

    // The watcher goes with the dispatcher, and every subscription with it.
    drop(dispatcher);
    tracing::info!(lanes = pool.active_lanes(), "waiting for in-flight uploads");
    pool.join().await;
    Ok(())
}

async fn publish_status<W: DirectoryWatcher>(
    status: &SharedStatus,
    dispatcher: &Dispatcher<W>,
    pool: &WorkerPool,
) {
    let mut board = status.write().await;
    board.dispatcher = dispatcher.status();
    board.active_lanes = pool.active_lanes();
}

async fn socket_server_task(
    control: Arc<Control>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&control.home);
    clear_stale_socket(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "control socket listening");

    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    let control = control.clone();
                    tokio::spawn(async move {
                        if let Err(err) = serve_client(stream, &control).await {
                            tracing::warn!(error = %err, "control client failed");
                        }
                    });
                }
                Err(err) => tracing::warn!(error = %err, "control socket accept failed"),
            },
        }
    }

    match fs::remove_file(&socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(&socket, err)),
    }
}

async fn serve_client(stream: UnixStream, control: &Control) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("control socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let (response, hang_up) = match serde_json::from_str::<DaemonRequest>(&line) {
            Ok(request) => (
                control.answer(request).await,
                request == DaemonRequest::Stop,
            ),
            Err(err) => (DaemonResponse::error(format!("invalid request: {err}")), false),
        };
        write_response(&mut writer, &response).await?;
        if hang_up {
            break;
        }
    }
    Ok(())
}

fn build_status_payload(home: &Path, board: &StatusBoard, started_at: DateTime<Utc>) -> Value {
    json!({
        "running": true,
        "pid": std::process::id(),
        "started_at": started_at.to_rfc3339(),
        "subscriptions": board.dispatcher.subscriptions,
        "queued": board.dispatcher.queued,
        "folder_configured": board.dispatcher.folder_configured,
        "active_lanes": board.active_lanes,
        "socket": socket_path(home).display().to_string(),
    })
}

async fn log_rotation_task(
    home: PathBuf,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(ROTATION_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                let home = home.clone();
                // rotate_logs logs its own failures
                if let Err(err) = tokio::task::spawn_blocking(move || rotate_logs(&home)).await {
                    tracing::warn!(error = %err, "log rotation task failed");
                }
            }
        }
    }
    Ok(())
}

async fn wait_for_ctrl_c(mut shutdown_rx: broadcast::Receiver<()>) -> Result<(), DaemonError> {
    tokio::select! {
        _ = shutdown_rx.recv() => Ok(()),
        signal = tokio::signal::ctrl_c() => {
            signal.map_err(|e| io_err("ctrl-c handler", e))?;
            tracing::info!("received ctrl-c, shutting down daemon");
            Ok(())
        }
    }
}

/// Remove a socket file left behind by a daemon that died without cleaning
/// up. A socket that still accepts connections belongs to a live daemon.
fn clear_stale_socket(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }
    if StdUnixStream::connect(socket).is_ok() {
        return Err(DaemonError::Protocol(format!(
            "another daemon is already listening on {}",
            socket.display()
        )));
    }

    tracing::warn!(socket = %socket.display(), "removing stale control socket");
    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let mut line = serde_json::to_vec(response)?;
    line.push(b'\n');
    writer
        .write_all(&line)
        .await
        .map_err(|e| io_err("control socket write", e))
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

/// `RUST_LOG`-driven subscriber; defaults to `info`.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}
