//! Error types for teamsync-sync.

use std::path::PathBuf;

use thiserror::Error;

use teamsync_renderer::RenderError;

/// All errors that can arise from a synchronization run.
///
/// Only [`SyncError::Connection`] and [`SyncError::Checkout`] abort a run;
/// see [`SyncError::is_fatal`].
#[derive(Debug, Error)]
pub enum SyncError {
    /// Connect, authentication, or network failure before or during the tree walk.
    #[error("connection error: {0}")]
    Connection(String),

    /// Fatal failure while applying a change set; workspace changes made so
    /// far are kept.
    #[error("checkout error: {0}")]
    Checkout(String),

    /// FilePoint store read/write failure.
    #[error("file point store error at {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Change-log rendering failure.
    #[error("change log serialization error: {0}")]
    Serialization(#[from] RenderError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SyncError {
    /// `true` for errors that end a run with a failure result.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Connection(_) | SyncError::Checkout(_))
    }
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}

/// Convenience constructor for [`SyncError::Persistence`].
pub(crate) fn persistence_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Persistence {
        path: path.into(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connection_and_checkout_are_fatal() {
        assert!(SyncError::Connection("refused".into()).is_fatal());
        assert!(SyncError::Checkout("lost".into()).is_fatal());
        assert!(!persistence_err("/x", std::io::Error::other("disk full")).is_fatal());
        assert!(!io_err("/x", std::io::Error::other("denied")).is_fatal());
    }
}
