pub mod changes;
pub mod checkout;
pub mod status;
pub mod submit;
pub mod worker;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use teamsync_core::{config, CheckoutConfig};

/// Load `path` and resolve its state directory.
pub(crate) fn load_config(path: &Path) -> Result<(CheckoutConfig, PathBuf)> {
    let config = config::load_at(path)
        .with_context(|| format!("failed to load config {}", path.display()))?;
    let state_dir = config
        .state_dir()
        .context("could not determine state directory")?;
    Ok((config, state_dir))
}

/// Run output printed line by line.
pub(crate) fn stdout_sink(line: &str) {
    println!("{line}");
}

/// Progress printed to stderr, keeping stdout free for `--json`.
pub(crate) fn stderr_sink(line: &str) {
    eprintln!("{line}");
}
