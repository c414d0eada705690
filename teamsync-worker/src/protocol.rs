use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use teamsync_sync::{CheckoutJob, LogSink};

use crate::error::{io_err, WorkerError};
use crate::paths::socket_path;

/// JSON newline-delimited request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub cmd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<CheckoutJob>,
    /// Workspace root on the worker's host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<PathBuf>,
}

impl WorkerRequest {
    pub fn command(cmd: &str) -> Self {
        Self {
            cmd: cmd.to_string(),
            job: None,
            workspace: None,
        }
    }

    pub fn run(job: CheckoutJob, workspace: PathBuf) -> Self {
        Self {
            cmd: "run".to_string(),
            job: Some(job),
            workspace: Some(workspace),
        }
    }
}

/// JSON newline-delimited response. A `run` request is answered with a
/// stream of `{"log": ..}` responses followed by one `{"done": true, ..}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkerResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

fn connect(home: &Path) -> Result<(UnixStream, PathBuf), WorkerError> {
    let socket = socket_path(home);
    if !socket.exists() {
        return Err(WorkerError::WorkerNotRunning { socket });
    }

    let stream = UnixStream::connect(&socket).map_err(|err| {
        if matches!(
            err.kind(),
            std::io::ErrorKind::NotFound
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
        ) {
            WorkerError::WorkerNotRunning {
                socket: socket.clone(),
            }
        } else {
            io_err(&socket, err)
        }
    })?;
    Ok((stream, socket))
}

fn write_request(
    stream: &mut UnixStream,
    socket: &Path,
    request: &WorkerRequest,
) -> Result<(), WorkerError> {
    let payload = serde_json::to_string(request)?;
    stream
        .write_all(payload.as_bytes())
        .map_err(|e| io_err(socket, e))?;
    stream.write_all(b"\n").map_err(|e| io_err(socket, e))?;
    stream.flush().map_err(|e| io_err(socket, e))
}

/// Send one JSON request to the worker socket and return one response.
pub fn send_request(home: &Path, request: &WorkerRequest) -> Result<WorkerResponse, WorkerError> {
    let (mut stream, socket) = connect(home)?;
    write_request(&mut stream, &socket, request)?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    let read = reader
        .read_line(&mut line)
        .map_err(|e| io_err(&socket, e))?;
    if read == 0 {
        return Err(WorkerError::Protocol(
            "worker closed connection before responding".to_string(),
        ));
    }

    let response: WorkerResponse = serde_json::from_str(line.trim_end())?;
    Ok(response)
}

/// Run `job` on the worker against `workspace`, forwarding its log lines to
/// `sink`. Returns the job's success flag.
pub fn submit_job(
    home: &Path,
    job: &CheckoutJob,
    workspace: &Path,
    sink: &dyn LogSink,
) -> Result<bool, WorkerError> {
    let (mut stream, socket) = connect(home)?;
    write_request(
        &mut stream,
        &socket,
        &WorkerRequest::run(job.clone(), workspace.to_path_buf()),
    )?;

    let reader = BufReader::new(stream);
    for line in reader.lines() {
        let line = line.map_err(|e| io_err(&socket, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let response: WorkerResponse = serde_json::from_str(&line)?;
        let data = response_into_data(response)?;
        if let Some(message) = data.get("log").and_then(Value::as_str) {
            sink.line(message);
            continue;
        }
        if data.get("done").and_then(Value::as_bool) == Some(true) {
            return Ok(data.get("success").and_then(Value::as_bool).unwrap_or(false));
        }
    }

    Err(WorkerError::Protocol(
        "worker closed connection before the job finished".to_string(),
    ))
}

pub fn request_status(home: &Path) -> Result<Value, WorkerError> {
    let request = WorkerRequest::command("status");

    let mut last_not_running: Option<WorkerError> = None;
    for attempt in 0..5 {
        match send_request(home, &request) {
            Ok(response) => return response_into_data(response),
            Err(err @ WorkerError::WorkerNotRunning { .. }) => {
                last_not_running = Some(err);
                if attempt < 4 {
                    sleep(Duration::from_millis(100));
                    continue;
                }
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_not_running.unwrap_or_else(|| {
        WorkerError::Protocol("worker status retry loop exited unexpectedly".to_string())
    }))
}

pub fn request_stop(home: &Path) -> Result<(), WorkerError> {
    let response = send_request(home, &WorkerRequest::command("stop"))?;
    response_into_data(response).map(|_| ())
}

fn response_into_data(response: WorkerResponse) -> Result<Value, WorkerError> {
    if response.ok {
        Ok(response.data.unwrap_or(Value::Null))
    } else {
        Err(WorkerError::Protocol(
            response
                .error
                .unwrap_or_else(|| "unknown worker error".to_string()),
        ))
    }
}
