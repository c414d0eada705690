//! `teamsync submit`: package a checkout here and run it on the worker.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use teamsync_sync::CheckoutJob;
use teamsync_worker::{submit_job, WorkerError};

use super::{load_config, stdout_sink};

/// Arguments for `teamsync submit`.
#[derive(Args, Debug)]
pub struct SubmitArgs {
    /// Checkout configuration (YAML).
    #[arg(long)]
    pub config: PathBuf,

    /// Workspace root on the worker's host.
    #[arg(long)]
    pub workspace: PathBuf,

    /// Build number of this run.
    #[arg(long)]
    pub build: i64,
}

impl SubmitArgs {
    pub fn run(self) -> Result<()> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        let (config, state_dir) = load_config(&self.config)?;
        let job = CheckoutJob::package(&config, self.build, &state_dir, &stdout_sink);

        let success = match submit_job(&home, &job, &self.workspace, &stdout_sink) {
            Ok(success) => success,
            Err(err @ WorkerError::WorkerNotRunning { .. }) => {
                return Err(err).context("start one with `teamsync worker start`");
            }
            Err(err) => return Err(err).context("failed to submit job to worker"),
        };
        if !success {
            bail!("checkout of build {} failed on the worker", self.build);
        }
        println!("{} build {} checked out by worker", "✓".green().bold(), self.build);
        Ok(())
    }
}
