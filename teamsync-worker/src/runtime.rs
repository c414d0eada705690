use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::time::Instant;

use teamsync_sync::{CancelFlag, CheckoutJob, Connector, HttpConnector, LogSink, TracingSink};

use crate::error::{io_err, WorkerError};
use crate::paths::{socket_path, teamsync_root};
use crate::protocol::{WorkerRequest, WorkerResponse};

struct RunRequest {
    job: CheckoutJob,
    workspace: PathBuf,
    log_tx: mpsc::UnboundedSender<String>,
    respond_to: oneshot::Sender<bool>,
}

/// Counters reported by `status`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkerStats {
    pub jobs_run: u64,
    pub jobs_failed: u64,
    pub current_build: Option<i64>,
    pub last_build: Option<i64>,
    pub last_success: Option<bool>,
    pub last_duration_ms: u128,
    pub last_finished_at_unix: u64,
}

/// Start the worker with the HTTP connector and block until it exits.
pub fn start_blocking(home: &Path, json_logs: bool) -> Result<(), WorkerError> {
    init_tracing(json_logs);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf(), Arc::new(HttpConnector::new())))
}

/// Run the worker: one job processor, the socket server and a signal handler.
pub async fn run(home: PathBuf, connector: Arc<dyn Connector>) -> Result<(), WorkerError> {
    ensure_runtime_dirs(&home)?;

    let stats = Arc::new(RwLock::new(WorkerStats::default()));
    let started_at_unix = unix_seconds_now();

    let (job_tx, job_rx) = mpsc::channel::<RunRequest>(16);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let processor_handle = {
        let shutdown = shutdown_tx.clone();
        let stats = stats.clone();
        tokio::spawn(async move {
            let result = job_processor_task(connector, stats, job_rx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let stats = stats.clone();
        tokio::spawn(async move {
            let result = socket_server_task(
                home,
                stats,
                job_tx,
                shutdown.clone(),
                shutdown.subscribe(),
                started_at_unix,
            )
            .await;
            let _ = shutdown.send(());
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
                            tracing::info!("received ctrl-c, shutting down worker");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(WorkerError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (processor_result, socket_result, signal_result) =
        tokio::join!(processor_handle, socket_handle, signal_handle);

    handle_join("job_processor", processor_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

/// Executes queued jobs one at a time. A shutdown during a job raises its
/// cancel flag and waits for it to stop.
async fn job_processor_task(
    connector: Arc<dyn Connector>,
    stats: Arc<RwLock<WorkerStats>>,
    mut job_rx: mpsc::Receiver<RunRequest>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), WorkerError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe_job = job_rx.recv() => {
                let Some(RunRequest { job, workspace, log_tx, respond_to }) = maybe_job else { break };
                let build = job.build_number;
                let started = Instant::now();
                stats.write().await.current_build = Some(build);
                tracing::info!(build, workspace = %workspace.display(), "starting checkout job");

                let cancel = CancelFlag::new();
                let mut handle = {
                    let connector = connector.clone();
                    let cancel = cancel.clone();
                    tokio::task::spawn_blocking(move || {
                        // Job output goes to the submitter and into the worker's own log.
                        let sink = move |line: &str| {
                            TracingSink.line(line);
                            let _ = log_tx.send(line.to_string());
                        };
                        job.execute_with_cancel(&workspace, connector.as_ref(), &cancel, &sink)
                    })
                };

                let joined = tokio::select! {
                    joined = &mut handle => joined,
                    _ = shutdown_rx.recv() => {
                        tracing::info!(build, "shutdown requested, interrupting running job");
                        cancel.cancel();
                        handle.await
                    }
                };
                let success = joined.unwrap_or_else(|err| {
                    tracing::error!(build, error = %err, "checkout job task failed");
                    false
                });

                {
                    let mut stats = stats.write().await;
                    stats.jobs_run += 1;
                    if !success {
                        stats.jobs_failed += 1;
                    }
                    stats.current_build = None;
                    stats.last_build = Some(build);
                    stats.last_success = Some(success);
                    stats.last_duration_ms = started.elapsed().as_millis();
                    stats.last_finished_at_unix = unix_seconds_now();
                }
                tracing::info!(build, success, "checkout job finished");
                let _ = respond_to.send(success);

                if cancel.is_cancelled() {
                    break;
                }
            }
        }
    }

    Ok(())
}

async fn socket_server_task(
    home: PathBuf,
    stats: Arc<RwLock<WorkerStats>>,
    job_tx: mpsc::Sender<RunRequest>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
    started_at_unix: u64,
) -> Result<(), WorkerError> {
    let socket = socket_path(&home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "worker listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let home = home.clone();
                let stats = stats.clone();
                let job_tx = job_tx.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(
                        stream,
                        home,
                        stats,
                        job_tx,
                        shutdown_tx,
                        started_at_unix,
                    ).await {
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
    stats: Arc<RwLock<WorkerStats>>,
    job_tx: mpsc::Sender<RunRequest>,
    shutdown_tx: broadcast::Sender<()>,
    started_at_unix: u64,
) -> Result<(), WorkerError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("worker socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: WorkerRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &WorkerResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let cmd = request.cmd.clone();
        match cmd.as_str() {
            "status" => {
                let payload = build_status_payload(&home, stats.clone(), started_at_unix).await;
                write_response(&mut writer, &WorkerResponse::ok(payload)).await?;
            }
            "run" => match (request.job, request.workspace) {
                (Some(job), Some(workspace)) => {
                    stream_job(&job_tx, job, workspace, &mut writer).await?;
                }
                _ => {
                    write_response(
                        &mut writer,
                        &WorkerResponse::error("run requires a job and a workspace"),
                    )
                    .await?;
                }
            },
            "stop" => {
                let _ = shutdown_tx.send(());
                write_response(&mut writer, &WorkerResponse::ok(json!({ "stopping": true })))
                    .await?;
                break;
            }
            other => {
                write_response(
                    &mut writer,
                    &WorkerResponse::error(format!("unknown command '{other}'")),
                )
                .await?;
            }
        }
    }

    Ok(())
}

/// Queue a job, relay its log lines, then report completion.
async fn stream_job(
    job_tx: &mpsc::Sender<RunRequest>,
    job: CheckoutJob,
    workspace: PathBuf,
    writer: &mut OwnedWriteHalf,
) -> Result<(), WorkerError> {
    let (log_tx, mut log_rx) = mpsc::unbounded_channel::<String>();
    let (respond_to, done_rx) = oneshot::channel();
    let queued = job_tx
        .send(RunRequest {
            job,
            workspace,
            log_tx,
            respond_to,
        })
        .await;
    if queued.is_err() {
        return write_response(writer, &WorkerResponse::error("worker is shutting down")).await;
    }

    // The sender lives inside the running job, so this ends when the job does.
    while let Some(line) = log_rx.recv().await {
        write_response(writer, &WorkerResponse::ok(json!({ "log": line }))).await?;
    }

    let response = match done_rx.await {
        Ok(success) => WorkerResponse::ok(json!({ "done": true, "success": success })),
        Err(_) => WorkerResponse::error("worker stopped before the job finished"),
    };
    write_response(writer, &response).await
}

async fn build_status_payload(
    home: &Path,
    stats: Arc<RwLock<WorkerStats>>,
    started_at_unix: u64,
) -> Value {
    let snapshot = stats.read().await.clone();
    json!({
        "running": true,
        "started_at_unix": started_at_unix,
        "busy": snapshot.current_build.is_some(),
        "jobs": snapshot,
        "socket": socket_path(home).display().to_string(),
    })
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), WorkerError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(WorkerError::Protocol(format!(
                "worker socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale worker socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), WorkerError> {
    let root = teamsync_root(home);
    if !root.exists() {
        fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &WorkerResponse,
) -> Result<(), WorkerError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("worker socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("worker socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("worker socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), WorkerError>, tokio::task::JoinError>,
) -> Result<(), WorkerError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(WorkerError::Protocol(format!(
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

fn init_tracing(json_logs: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json_logs {
        let _ = fmt().json().with_env_filter(filter).try_init();
    } else {
        let _ = fmt().with_env_filter(filter).with_target(false).try_init();
    }
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), WorkerError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), WorkerError> {
    Ok(())
}
