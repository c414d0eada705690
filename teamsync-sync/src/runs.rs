//! Per-run output layout under the state directory.
//!
//! `<state_dir>/runs/<build>/filepoints.json` and
//! `<state_dir>/runs/<build>/changelog.xml`.

use std::path::{Path, PathBuf};

use teamsync_core::FilePoints;

use crate::file_point_store::{self, FILE_POINT_FILENAME};
use crate::log_sink::LogSink;

/// File name of the change-log document inside a run directory.
pub const CHANGELOG_FILENAME: &str = "changelog.xml";

pub fn runs_root(state_dir: &Path) -> PathBuf {
    state_dir.join("runs")
}

pub fn run_dir(state_dir: &Path, build: i64) -> PathBuf {
    runs_root(state_dir).join(build.to_string())
}

pub fn file_points_path(state_dir: &Path, build: i64) -> PathBuf {
    run_dir(state_dir, build).join(FILE_POINT_FILENAME)
}

pub fn changelog_path(state_dir: &Path, build: i64) -> PathBuf {
    run_dir(state_dir, build).join(CHANGELOG_FILENAME)
}

/// Build numbers that have a run directory, ascending.
pub fn list_builds(state_dir: &Path) -> Vec<i64> {
    let Ok(entries) = std::fs::read_dir(runs_root(state_dir)) else {
        return Vec::new();
    };
    let mut builds: Vec<i64> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter_map(|e| e.file_name().to_str().and_then(|n| n.parse().ok()))
        .collect();
    builds.sort_unstable();
    builds
}

/// The most recent run before `build`, if any.
pub fn previous_build(state_dir: &Path, build: i64) -> Option<i64> {
    list_builds(state_dir)
        .into_iter()
        .filter(|b| *b < build)
        .max()
}

/// Load the baseline recorded by the run preceding `build`.
///
/// Absent when there is no earlier run or it left no FilePoint file.
pub fn load_previous(state_dir: &Path, build: i64, sink: &dyn LogSink) -> Option<FilePoints> {
    let previous = previous_build(state_dir, build)?;
    let points = file_point_store::load(&file_points_path(state_dir, previous), sink);
    if points.is_none() {
        sink.line(&format!("run {previous} recorded no file points"));
    }
    points
}
