//! teamsync core library: domain types and checkout configuration.
//!
//! Public API surface:
//! - [`types`]: FilePoints, remote tree nodes, change sets
//! - [`config`]: checkout configuration and connection parameters
//! - [`error`]: [`ConfigError`]

pub mod config;
pub mod error;
pub mod types;

pub use config::{
    BaselinePolicy, CheckoutConfig, ConnectionParams, RetryPolicy, Selection, ViewSelector,
};
pub use error::ConfigError;
pub use types::{
    ChangeLogEntry, ChangeSet, ChangeType, FilePoint, FilePoints, NodeKind, RemoteFile,
    RemoteNode, Update, UpdateReason,
};
