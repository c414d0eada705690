//! `teamsync checkout`: run a checkout in-process.

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Args;
use colored::Colorize;

use teamsync_sync::{CheckoutJob, HttpConnector};

use super::{load_config, stdout_sink};

/// Arguments for `teamsync checkout`.
#[derive(Args, Debug)]
pub struct CheckoutArgs {
    /// Checkout configuration (YAML).
    #[arg(long)]
    pub config: PathBuf,

    /// Workspace root to bring up to date.
    #[arg(long)]
    pub workspace: PathBuf,

    /// Build number of this run.
    #[arg(long)]
    pub build: i64,
}

impl CheckoutArgs {
    pub fn run(self) -> Result<()> {
        let (config, state_dir) = load_config(&self.config)?;
        let job = CheckoutJob::package(&config, self.build, &state_dir, &stdout_sink);

        if !job.execute(&self.workspace, &HttpConnector::new(), &stdout_sink) {
            bail!("checkout of build {} failed", self.build);
        }
        println!(
            "{} build {} checked out into {}",
            "✓".green().bold(),
            self.build,
            self.workspace.display()
        );
        println!("  change log: {}", job.changelog_path.display());
        Ok(())
    }
}
