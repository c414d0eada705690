use std::path::PathBuf;

use thiserror::Error;

/// Error surface for the worker runtime and its socket protocol.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("worker protocol error: {0}")]
    Protocol(String),

    #[error("worker is not running (socket missing: {socket})")]
    WorkerNotRunning { socket: PathBuf },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> WorkerError {
    WorkerError::Io {
        path: path.into(),
        source,
    }
}
