//! Repository session boundary.
//!
//! The server is a black box behind [`Connector`] and [`Session`].
//! [`RepositorySession`] adds the lifecycle on top:
//!
//! ```text
//! Uninitialized ──initialize──▶ Connected ──close──▶ Closed
//!       │                                              ▲
//!       └──────initialize fails──▶ Failed ──close──────┘
//! ```
//!
//! The underlying [`Session::close`] runs exactly once, either through an
//! explicit `close()` or on drop.

use std::fmt;
use std::thread::sleep;
use std::time::Duration;

use thiserror::Error;

use teamsync_core::{ConnectionParams, RemoteNode, Selection};

use crate::error::SyncError;

/// Failure reported by a repository session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The connection itself is unusable; fatal to the run.
    #[error("connection failure: {0}")]
    Connection(String),

    /// A single file could not be fetched; the run may continue.
    #[error("cannot fetch {path}: {reason}")]
    File { path: String, reason: String },
}

/// An open connection to the repository server.
pub trait Session: Send {
    /// Current tree of the selected folder.
    fn tree(&mut self) -> Result<RemoteNode, SessionError>;

    /// Content of the file at `path`, relative to the selected folder.
    fn fetch(&mut self, path: &str) -> Result<Vec<u8>, SessionError>;

    fn close(&mut self);
}

/// Opens sessions.
pub trait Connector: Send + Sync {
    fn connect(
        &self,
        params: &ConnectionParams,
        selection: &Selection,
    ) -> Result<Box<dyn Session>, SessionError>;
}

/// Anything file content can be fetched from.
pub trait ContentSource {
    fn fetch(&mut self, path: &str) -> Result<Vec<u8>, SessionError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Connected,
    Failed,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Uninitialized => write!(f, "uninitialized"),
            SessionState::Connected => write!(f, "connected"),
            SessionState::Failed => write!(f, "failed"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// Scoped session: connects on `initialize`, releases on `close` or drop.
pub struct RepositorySession<'c> {
    connector: &'c dyn Connector,
    params: ConnectionParams,
    selection: Selection,
    state: SessionState,
    inner: Option<Box<dyn Session>>,
}

impl<'c> RepositorySession<'c> {
    pub fn new(connector: &'c dyn Connector, params: ConnectionParams, selection: Selection) -> Self {
        Self {
            connector,
            params,
            selection,
            state: SessionState::Uninitialized,
            inner: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The selection this session was opened with, labels resolved once
    /// `initialize` has run.
    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    /// Connect for `run_number`, retrying connection failures according to
    /// the configured retry policy.
    pub fn initialize(&mut self, run_number: i64) -> Result<(), SyncError> {
        if self.state != SessionState::Uninitialized {
            return Err(SyncError::Connection(format!(
                "cannot initialize a session that is {}",
                self.state
            )));
        }

        self.selection.selector = self.selection.selector.resolve(run_number);
        let attempts = self.params.retry.attempts.max(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match self.connector.connect(&self.params, &self.selection) {
                Ok(session) => {
                    self.inner = Some(session);
                    self.state = SessionState::Connected;
                    return Ok(());
                }
                Err(err) => {
                    tracing::warn!(
                        "connect attempt {attempt}/{attempts} to {} failed: {err}",
                        self.params.base_url()
                    );
                    last_error = err.to_string();
                    if attempt < attempts {
                        sleep(Duration::from_millis(
                            self.params.retry.backoff_ms.saturating_mul(attempt as u64),
                        ));
                    }
                }
            }
        }

        self.state = SessionState::Failed;
        Err(SyncError::Connection(format!(
            "unable to connect to {}:{} after {attempts} attempt(s): {last_error}",
            self.params.host, self.params.port
        )))
    }

    /// Current tree of the selected folder.
    pub fn tree(&mut self) -> Result<RemoteNode, SyncError> {
        let session = self.connected()?;
        session
            .tree()
            .map_err(|err| SyncError::Connection(err.to_string()))
    }

    /// Release the connection. Safe to call in any state, any number of times.
    pub fn close(&mut self) {
        if let Some(mut session) = self.inner.take() {
            session.close();
        }
        self.state = SessionState::Closed;
    }

    fn connected(&mut self) -> Result<&mut Box<dyn Session>, SyncError> {
        match (self.state, self.inner.as_mut()) {
            (SessionState::Connected, Some(session)) => Ok(session),
            (state, _) => Err(SyncError::Connection(format!("session is {state}"))),
        }
    }
}

impl ContentSource for RepositorySession<'_> {
    fn fetch(&mut self, path: &str) -> Result<Vec<u8>, SessionError> {
        match (self.state, self.inner.as_mut()) {
            (SessionState::Connected, Some(session)) => session.fetch(path),
            (state, _) => Err(SessionError::Connection(format!("session is {state}"))),
        }
    }
}

impl Drop for RepositorySession<'_> {
    fn drop(&mut self) {
        self.close();
    }
}
