//! `teamsync status`: FilePoints recorded by a run.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use teamsync_core::FilePoint;
use teamsync_sync::{changelog, file_point_store, runs};

use super::{load_config, stderr_sink};

/// Arguments for `teamsync status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Checkout configuration (YAML).
    #[arg(long)]
    pub config: PathBuf,

    /// Run to show; defaults to the most recent one.
    #[arg(long)]
    pub build: Option<i64>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct StatusJson {
    state_dir: String,
    runs: Vec<i64>,
    build: Option<i64>,
    changelog_empty: Option<bool>,
    points: Vec<FilePoint>,
}

#[derive(Tabled)]
struct PointRow {
    #[tabled(rename = "path")]
    path: String,
    #[tabled(rename = "revision")]
    revision: i64,
    #[tabled(rename = "size")]
    size: u64,
    #[tabled(rename = "modified")]
    modified: String,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let (_config, state_dir) = load_config(&self.config)?;
        let builds = runs::list_builds(&state_dir);
        let build = self.build.or_else(|| builds.last().copied());

        let points = match build {
            Some(build) => file_point_store::load(&runs::file_points_path(&state_dir, build), &stderr_sink)
                .map(|points| points.into_vec())
                .unwrap_or_default(),
            None => Vec::new(),
        };
        let changelog_empty = build.and_then(|b| changelog_is_empty(&state_dir, b));

        if self.json {
            let payload = StatusJson {
                state_dir: state_dir.display().to_string(),
                runs: builds,
                build,
                changelog_empty,
                points,
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&payload).context("failed to serialize status JSON")?
            );
            return Ok(());
        }

        print_table(&state_dir, &builds, build, changelog_empty, points);
        Ok(())
    }
}

/// `None` when the run wrote no change log.
fn changelog_is_empty(state_dir: &Path, build: i64) -> Option<bool> {
    std::fs::read_to_string(runs::changelog_path(state_dir, build))
        .ok()
        .map(|doc| doc.trim() == changelog::EMPTY_CHANGELOG)
}

fn print_table(
    state_dir: &Path,
    builds: &[i64],
    build: Option<i64>,
    changelog_empty: Option<bool>,
    points: Vec<FilePoint>,
) {
    println!(
        "teamsync v{} | {} | {} runs",
        env!("CARGO_PKG_VERSION"),
        state_dir.display(),
        builds.len()
    );

    let Some(build) = build else {
        println!("No runs recorded yet.");
        return;
    };

    let changelog = match changelog_empty {
        Some(true) => "empty".bright_black().to_string(),
        Some(false) => "written".green().to_string(),
        None => "missing".yellow().to_string(),
    };
    println!(
        "{} build {build} | {} files | change log {changelog}",
        "■".green().bold(),
        points.len()
    );

    if points.is_empty() {
        println!("No file points recorded for build {build}.");
        return;
    }

    let rows: Vec<PointRow> = points
        .into_iter()
        .map(|p| PointRow {
            path: p.relative_path,
            revision: p.revision,
            size: p.size,
            modified: p.last_modified.format("%Y-%m-%d %H:%M:%S").to_string(),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}
