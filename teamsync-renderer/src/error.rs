//! Error types for teamsync-renderer.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    /// A built-in or user template failed to parse.
    #[error("invalid change-log template: {0}")]
    Template(#[source] tera::Error),

    /// The change-log entries could not be turned into a template context.
    #[error("change-log context: {0}")]
    Context(#[source] tera::Error),

    /// Rendering `template` failed, usually a missing variable in an override.
    #[error("rendering {template} failed: {source}")]
    Render {
        template: String,
        #[source]
        source: tera::Error,
    },

    /// A user template directory or file could not be read.
    #[error("template io error at {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
}
