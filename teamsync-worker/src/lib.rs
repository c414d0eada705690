//! Checkout worker: runs packaged checkout jobs received over a Unix socket
//! and streams their log lines back to the submitter.

mod error;
pub mod paths;
pub mod protocol;
mod runtime;

pub use error::WorkerError;
pub use protocol::{
    request_status, request_stop, send_request, submit_job, WorkerRequest, WorkerResponse,
};
pub use runtime::{run, start_blocking, WorkerStats};
