//! # teamsync-sync
//!
//! Incremental workspace synchronization against a repository server.
//!
//! A run compares the server's current tree with the FilePoints recorded by
//! the previous run, applies the difference to the workspace, then records
//! new FilePoints and a change-log document. [`CheckoutJob`] packages a run
//! as plain data so it can execute on a different host from the one that
//! owns the run history.

pub mod changelog;
pub mod changeset;
pub mod checkout;
pub mod error;
pub mod file_point_store;
pub mod http;
pub mod log_sink;
pub mod memory;
pub mod pipeline;
pub mod runs;
pub mod session;

pub use checkout::{CancelFlag, CheckoutOptions, CheckoutOutcome, CheckoutReport};
pub use error::SyncError;
pub use http::HttpConnector;
pub use log_sink::{LogSink, MemorySink, NullSink, TracingSink};
pub use memory::MemoryRepository;
pub use pipeline::{CheckoutJob, RunSummary};
pub use session::{Connector, ContentSource, RepositorySession, Session, SessionError, SessionState};
