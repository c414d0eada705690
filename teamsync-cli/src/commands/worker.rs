//! `teamsync worker`: checkout worker lifecycle.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use teamsync_worker::paths::socket_path;
use teamsync_worker::{request_status, request_stop, start_blocking, WorkerError};

#[derive(Subcommand, Debug)]
pub enum WorkerCommand {
    /// Run the worker in the foreground.
    Start(WorkerStartArgs),
    /// Request graceful worker shutdown over the Unix socket.
    Stop,
    /// Query worker status over the Unix socket.
    Status,
}

#[derive(Args, Debug)]
pub struct WorkerStartArgs {
    /// Log as JSON lines.
    #[arg(long)]
    pub json_logs: bool,
}

pub fn run(command: WorkerCommand) -> Result<()> {
    let home = dirs::home_dir().context("could not determine home directory")?;

    match command {
        WorkerCommand::Start(args) => {
            start_blocking(&home, args.json_logs).context("worker exited with error")?;
        }
        WorkerCommand::Stop => match request_stop(&home) {
            Ok(()) => println!("worker stop requested"),
            Err(WorkerError::WorkerNotRunning { .. }) => {
                println!("worker is not running");
            }
            Err(err) => return Err(err).context("failed to stop worker"),
        },
        WorkerCommand::Status => match request_status(&home) {
            Ok(status) => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&status)
                        .context("failed to render worker status JSON")?
                );
            }
            Err(WorkerError::WorkerNotRunning { .. }) => {
                let payload = serde_json::json!({
                    "running": false,
                    "socket": socket_path(&home).display().to_string(),
                });
                println!(
                    "{}",
                    serde_json::to_string_pretty(&payload)
                        .context("failed to render worker status JSON")?
                );
            }
            Err(err) => return Err(err).context("failed to query worker status"),
        },
    }

    Ok(())
}
