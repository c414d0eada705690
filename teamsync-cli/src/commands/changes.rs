//! `teamsync changes`: preview the next checkout.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;

use teamsync_core::{ChangeSet, UpdateReason};
use teamsync_sync::{CheckoutJob, HttpConnector};

use super::{load_config, stderr_sink};

/// Arguments for `teamsync changes`.
#[derive(Args, Debug)]
pub struct ChangesArgs {
    /// Checkout configuration (YAML).
    #[arg(long)]
    pub config: PathBuf,

    /// Build number the preview is computed for.
    #[arg(long)]
    pub build: i64,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct ChangesJson<'a> {
    build: i64,
    baseline: bool,
    changes: Option<&'a ChangeSet>,
}

impl ChangesArgs {
    pub fn run(self) -> Result<()> {
        let (config, state_dir) = load_config(&self.config)?;
        let job = CheckoutJob::package(&config, self.build, &state_dir, &stderr_sink);
        let changes = job
            .preview(&HttpConnector::new(), &stderr_sink)
            .with_context(|| format!("failed to compute changes for build {}", self.build))?;

        if self.json {
            let payload = ChangesJson {
                build: self.build,
                baseline: job.historic.is_some(),
                changes: changes.as_ref(),
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&payload).context("failed to serialize changes")?
            );
            return Ok(());
        }

        match changes {
            Some(changes) => print_changes(&changes),
            None => println!(
                "No previous run to compare against; the next checkout fetches the full tree."
            ),
        }
        Ok(())
    }
}

fn print_changes(changes: &ChangeSet) {
    if changes.is_empty() {
        println!("Workspace is up to date ({} files).", changes.unchanged.len());
        return;
    }
    for file in &changes.additions {
        println!("{} {} (rev {})", "+".green().bold(), file.path, file.revision);
    }
    for update in &changes.updates {
        let detail = match update.reason {
            UpdateReason::Content => {
                format!("rev {} -> {}", update.previous.revision, update.file.revision)
            }
            UpdateReason::Metadata => "metadata only".to_string(),
        };
        println!("{} {} ({detail})", "~".yellow().bold(), update.file.path);
    }
    for point in &changes.deletions {
        println!("{} {}", "-".red().bold(), point.relative_path);
    }
    println!(
        "{} added, {} updated, {} deleted, {} unchanged",
        changes.additions.len(),
        changes.updates.len(),
        changes.deletions.len(),
        changes.unchanged.len()
    );
}
