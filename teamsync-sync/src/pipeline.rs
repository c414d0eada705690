//! Checkout pipeline shared by the CLI and the worker.
//!
//! A [`CheckoutJob`] is plain data. It is packaged on the host that owns the
//! run history, with the previous FilePoints already loaded, and may then be
//! executed on another host against a workspace there.
//!
//! Order of a run:
//!
//! 1. initialize the session
//! 2. read the remote tree
//! 3. compute the change set against the packaged baseline
//! 4. apply it to the work folder
//! 5. save the new FilePoints
//! 6. write the change log
//! 7. close the session
//!
//! Steps 5 and 6 never fail the run.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use teamsync_core::{
    types::normalize_relative_path, BaselinePolicy, ChangeSet, CheckoutConfig, ConnectionParams,
    FilePoints, Selection,
};

use crate::changelog;
use crate::changeset;
use crate::checkout::{self, CancelFlag, CheckoutOptions, CheckoutReport};
use crate::error::SyncError;
use crate::file_point_store;
use crate::log_sink::LogSink;
use crate::runs;
use crate::session::{Connector, RepositorySession};

/// A self-contained unit of checkout work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutJob {
    pub build_number: i64,
    pub connection: ConnectionParams,
    pub selection: Selection,
    #[serde(default)]
    pub cleanup: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subfolder: Option<String>,
    #[serde(default)]
    pub baseline: BaselinePolicy,
    /// Baseline captured at packaging time; `None` when there was none.
    #[serde(default)]
    pub historic: Option<FilePoints>,
    pub file_points_path: PathBuf,
    pub changelog_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changelog_templates: Option<PathBuf>,
}

/// What a successful run did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub build_number: i64,
    /// `None` when change computation was skipped for lack of a baseline.
    pub change_count: Option<usize>,
    pub report: CheckoutReport,
    pub file_points: usize,
    pub file_points_saved: bool,
    pub changelog_written: bool,
}

impl CheckoutJob {
    /// Build a job for run `build`, loading the previous run's FilePoints
    /// from `state_dir`.
    pub fn package(
        config: &CheckoutConfig,
        build: i64,
        state_dir: &Path,
        sink: &dyn LogSink,
    ) -> Self {
        let historic = runs::load_previous(state_dir, build, sink);
        let mut connection = config.server.clone();
        connection.password = Some(connection.resolved_password());

        CheckoutJob {
            build_number: build,
            connection,
            selection: config.selection(),
            cleanup: config.cleanup,
            subfolder: config.trimmed_subfolder(),
            baseline: config.baseline,
            historic,
            file_points_path: runs::file_points_path(state_dir, build),
            changelog_path: runs::changelog_path(state_dir, build),
            changelog_templates: config.changelog_templates.clone(),
        }
    }

    /// `root`, or `root/<subfolder>` when a subfolder is configured.
    pub fn work_folder(&self, root: &Path) -> Result<PathBuf, SyncError> {
        let Some(subfolder) = self.subfolder.as_deref() else {
            return Ok(root.to_path_buf());
        };
        let normalized = normalize_relative_path(subfolder);
        let mut folder = root.to_path_buf();
        for segment in normalized.split('/').filter(|s| !s.is_empty()) {
            if segment == ".." {
                return Err(SyncError::Checkout(format!(
                    "subfolder {subfolder} leaves the workspace"
                )));
            }
            folder.push(segment);
        }
        Ok(folder)
    }

    /// Run the job and report success as a flag.
    ///
    /// Every error and panic is caught, logged on `sink` and turned into
    /// `false`. The session is closed on every path.
    pub fn execute(&self, root: &Path, connector: &dyn Connector, sink: &dyn LogSink) -> bool {
        self.execute_with_cancel(root, connector, &CancelFlag::new(), sink)
    }

    /// [`execute`](Self::execute) with an interrupt flag.
    pub fn execute_with_cancel(
        &self,
        root: &Path,
        connector: &dyn Connector,
        cancel: &CancelFlag,
        sink: &dyn LogSink,
    ) -> bool {
        match catch_unwind(AssertUnwindSafe(|| self.run(root, connector, cancel, sink))) {
            Ok(Ok(summary)) => {
                tracing::info!(
                    "build {} checked out: {} fetched, {} removed, {} skipped",
                    summary.build_number,
                    summary.report.fetched,
                    summary.report.removed,
                    summary.report.skipped.len()
                );
                true
            }
            Ok(Err(err)) => {
                sink.line(&format!("checkout failed: {err}"));
                tracing::error!("build {} failed: {err}", self.build_number);
                false
            }
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                sink.line(&format!("checkout aborted: {reason}"));
                tracing::error!("build {} panicked: {reason}", self.build_number);
                false
            }
        }
    }

    /// Run the job, returning fatal errors.
    pub fn run(
        &self,
        root: &Path,
        connector: &dyn Connector,
        cancel: &CancelFlag,
        sink: &dyn LogSink,
    ) -> Result<RunSummary, SyncError> {
        let work_folder = self.work_folder(root)?;
        let mut session = self.open_session(connector, sink)?;
        let tree = session.tree()?;

        let selection = session.selection();
        sink.line(&format!(
            "Computing change set for {}-{}-{}",
            selection.project, selection.view, selection.folder
        ));
        let changes = changeset::compute(&tree, self.historic.as_ref(), self.baseline);
        let to_apply = match &changes {
            Some(changes) => {
                sink.line(&format!(
                    "{} added, {} updated, {} deleted, {} unchanged",
                    changes.additions.len(),
                    changes.updates.len(),
                    changes.deletions.len(),
                    changes.unchanged.len()
                ));
                changes.clone()
            }
            None => {
                sink.line("no previous file points, checking out the full tree");
                changeset::initial(&tree)
            }
        };

        sink.line(&format!("performing checkout into {} ...", work_folder.display()));
        let options = CheckoutOptions {
            cleanup: self.cleanup,
            cancel: cancel.clone(),
        };
        let outcome = checkout::apply(&mut session, &to_apply, &work_folder, &options, sink)?;

        let file_points_saved = absorb(
            "save file points",
            file_point_store::save(&self.file_points_path, &outcome.points),
            sink,
        )?;

        sink.line("creating change log file");
        let changelog_written = absorb(
            "changelog",
            changelog::write_file(
                &self.changelog_path,
                changes.as_ref(),
                self.changelog_templates.as_deref(),
                sink,
            ),
            sink,
        )?;

        session.close();
        Ok(RunSummary {
            build_number: self.build_number,
            change_count: changes.as_ref().map(ChangeSet::change_count),
            file_points: outcome.points.len(),
            report: outcome.report,
            file_points_saved,
            changelog_written,
        })
    }

    /// Compute the change set without touching the workspace or run history.
    pub fn preview(
        &self,
        connector: &dyn Connector,
        sink: &dyn LogSink,
    ) -> Result<Option<ChangeSet>, SyncError> {
        let mut session = self.open_session(connector, sink)?;
        let tree = session.tree()?;
        let changes = changeset::compute(&tree, self.historic.as_ref(), self.baseline);
        session.close();
        Ok(changes)
    }

    fn open_session<'c>(
        &self,
        connector: &'c dyn Connector,
        sink: &dyn LogSink,
    ) -> Result<RepositorySession<'c>, SyncError> {
        sink.line(&format!(
            "Initializing connection to {}:{} ...",
            self.connection.host, self.connection.port
        ));
        let started = Instant::now();
        let mut session =
            RepositorySession::new(connector, self.connection.clone(), self.selection.clone());
        session.initialize(self.build_number)?;
        sink.line(&format!(
            "Initialized connection. took {} ms.",
            started.elapsed().as_millis()
        ));
        Ok(session)
    }
}

/// Report a non-fatal `result` on `sink` and carry on; fatal errors end the run.
fn absorb(stage: &str, result: Result<(), SyncError>, sink: &dyn LogSink) -> Result<bool, SyncError> {
    match result {
        Ok(()) => Ok(true),
        Err(err) if err.is_fatal() => Err(err),
        Err(err) => {
            sink.line(&format!("[{stage}] {err}"));
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_sink::{MemorySink, NullSink};
    use crate::memory::MemoryRepository;
    use chrono::{TimeZone, Utc};
    use teamsync_core::{FilePoint, RetryPolicy, ViewSelector};
    use tempfile::TempDir;

    fn config(cleanup: bool) -> CheckoutConfig {
        CheckoutConfig {
            server: ConnectionParams {
                host: "memory".into(),
                port: 1,
                agent_host: None,
                agent_port: None,
                user: "builder".into(),
                password: Some("pw".into()),
                scheme: "http".into(),
                timeout_secs: 1,
                retry: RetryPolicy {
                    attempts: 1,
                    backoff_ms: 0,
                },
            },
            project: "P".into(),
            view: "V".into(),
            folder: "F".into(),
            subfolder: None,
            cleanup,
            view_selector: ViewSelector::Current,
            baseline: BaselinePolicy::SkipWhenAbsent,
            state_dir: None,
            changelog_templates: None,
        }
    }

    fn ts(secs: i64) -> chrono::DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn package_captures_previous_points() {
        let state = TempDir::new().unwrap();
        let points = FilePoints::from_points(vec![FilePoint::new("a.txt", 1, ts(0), 1)]);
        file_point_store::save(&runs::file_points_path(state.path(), 3), &points).unwrap();

        let job = CheckoutJob::package(&config(false), 4, state.path(), &NullSink);
        assert_eq!(job.historic, Some(points));
        assert_eq!(job.file_points_path, runs::file_points_path(state.path(), 4));
        assert_eq!(job.changelog_path, runs::changelog_path(state.path(), 4));
    }

    #[test]
    fn first_run_checks_out_everything_with_empty_change_log() {
        let state = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let repo = MemoryRepository::new();
        repo.add_file("a.txt", 1, ts(0), b"a".to_vec());

        let job = CheckoutJob::package(&config(false), 1, state.path(), &NullSink);
        assert!(job.historic.is_none());
        let summary = job
            .run(work.path(), &repo, &CancelFlag::new(), &NullSink)
            .unwrap();

        assert_eq!(summary.change_count, None);
        assert!(work.path().join("a.txt").exists());
        assert_eq!(
            std::fs::read_to_string(&job.changelog_path).unwrap(),
            changelog::EMPTY_CHANGELOG
        );
        assert!(file_point_store::load(&job.file_points_path, &NullSink)
            .unwrap()
            .contains("a.txt"));
    }

    #[test]
    fn subfolder_is_honoured_and_escapes_rejected() {
        let mut job = CheckoutJob::package(&config(false), 1, Path::new("/state"), &NullSink);
        job.subfolder = Some("game\\assets".into());
        assert_eq!(
            job.work_folder(Path::new("/ws")).unwrap(),
            PathBuf::from("/ws/game/assets")
        );
        job.subfolder = Some("../outside".into());
        assert!(job.work_folder(Path::new("/ws")).is_err());
    }

    #[test]
    fn connect_failure_is_false_and_logged() {
        let state = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let repo = MemoryRepository::new();
        repo.fail_connect("auth rejected");

        let sink = MemorySink::new();
        let job = CheckoutJob::package(&config(false), 1, state.path(), &sink);
        assert!(!job.execute(work.path(), &repo, &sink));
        assert!(sink.contains("checkout failed"));
        assert!(!job.file_points_path.exists());
    }

    #[test]
    fn unwritable_state_still_succeeds() {
        let state = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let repo = MemoryRepository::new();
        repo.add_file("a.txt", 1, ts(0), b"a".to_vec());

        let mut job = CheckoutJob::package(&config(false), 1, state.path(), &NullSink);
        let blocker = state.path().join("blocker");
        std::fs::write(&blocker, "x").unwrap();
        job.file_points_path = blocker.join("filepoints.json");
        job.changelog_path = blocker.join("changelog.xml");

        let sink = MemorySink::new();
        assert!(job.execute(work.path(), &repo, &sink));
        assert!(sink.contains("[save file points]"));
        assert!(sink.contains("[changelog]"));
        assert_eq!(repo.stats().closes, 1);
    }

    #[test]
    fn absorb_logs_recoverable_errors_and_passes_fatal_ones() {
        let sink = MemorySink::new();
        let disk_full = crate::error::io_err("/state/x", std::io::Error::other("disk full"));
        assert!(!absorb("save file points", Err(disk_full), &sink).unwrap());
        assert!(sink.contains("[save file points] I/O error at /state/x: disk full"));

        let lost = absorb("changelog", Err(SyncError::Connection("reset".into())), &sink);
        assert!(matches!(lost, Err(SyncError::Connection(_))));
        assert!(absorb("changelog", Ok(()), &sink).unwrap());
    }

    #[test]
    fn preview_leaves_workspace_alone() {
        let state = TempDir::new().unwrap();
        let repo = MemoryRepository::new();
        repo.add_file("a.txt", 1, ts(0), b"a".to_vec());
        let mut job = CheckoutJob::package(&config(false), 1, state.path(), &NullSink);
        job.baseline = BaselinePolicy::FullCheckout;

        let changes = job.preview(&repo, &NullSink).unwrap().expect("full checkout");
        assert_eq!(changes.additions.len(), 1);
        assert_eq!(repo.stats().fetches, 0);
        assert_eq!(repo.stats().closes, 1);
        assert!(!job.file_points_path.exists());
    }
}
