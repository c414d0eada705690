//! Checkout executor: applies a [`ChangeSet`] to the workspace.
//!
//! ## Per-file write protocol
//!
//! 1. Fetch the bytes from the session.
//! 2. Ensure the parent directory exists.
//! 3. Write to `<path>.teamsync.tmp` and stamp it with the server timestamp.
//! 4. Rename to the final path (atomic on POSIX).
//! 5. Re-stat the final path and record a FilePoint from what is on disk.
//!
//! Deletions run before additions and updates so that a folder replaced by a
//! file (or the reverse) on the server can be materialised in one pass.
//!
//! A file-level failure skips that file and leaves it out of the returned
//! collection, so the next run sees it again. A connection failure aborts the
//! checkout; work already done stays on disk.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use filetime::FileTime;
use serde::Serialize;
use walkdir::WalkDir;

use teamsync_core::{types::normalize_relative_path, ChangeSet, FilePoint, FilePoints, RemoteFile};

use crate::error::{io_err, SyncError};
use crate::log_sink::LogSink;
use crate::session::{ContentSource, SessionError};

/// Suffix of in-flight writes.
pub const TMP_SUFFIX: &str = ".teamsync.tmp";

// ---------------------------------------------------------------------------
// Options and results
// ---------------------------------------------------------------------------

/// Shared interrupt flag, checked before every file.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CheckoutOptions {
    /// Remove deleted and orphaned files from disk.
    pub cleanup: bool,
    pub cancel: CancelFlag,
}

/// Counters for one checkout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CheckoutReport {
    pub fetched: usize,
    pub removed: usize,
    pub orphans_removed: usize,
    /// Paths that could not be materialised this run.
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutOutcome {
    /// FilePoints for everything present after the checkout.
    pub points: FilePoints,
    pub report: CheckoutReport,
}

// ---------------------------------------------------------------------------
// apply
// ---------------------------------------------------------------------------

/// Apply `changes` under `work_folder`, fetching content from `source`.
pub fn apply(
    source: &mut dyn ContentSource,
    changes: &ChangeSet,
    work_folder: &Path,
    options: &CheckoutOptions,
    sink: &dyn LogSink,
) -> Result<CheckoutOutcome, SyncError> {
    std::fs::create_dir_all(work_folder).map_err(|e| {
        SyncError::Checkout(format!(
            "cannot create work folder {}: {e}",
            work_folder.display()
        ))
    })?;

    let mut report = CheckoutReport::default();
    let mut points: Vec<FilePoint> = changes.unchanged.clone();
    let mut emptied_dirs: Vec<PathBuf> = Vec::new();

    for point in &changes.deletions {
        check_cancel(options)?;
        if !options.cleanup {
            sink.line(&format!("[delete] {} (kept on disk)", point.relative_path));
            continue;
        }
        let Some(target) = workspace_path(work_folder, &point.relative_path) else {
            sink.line(&format!(
                "[delete] {}: path escapes work folder, ignored",
                point.relative_path
            ));
            continue;
        };
        match remove_file(&target) {
            Ok(removed) => {
                if removed {
                    report.removed += 1;
                }
                sink.line(&format!("[delete] {}", point.relative_path));
                if let Some(parent) = target.parent() {
                    emptied_dirs.push(parent.to_path_buf());
                }
            }
            Err(err) => sink.line(&format!("[delete] {}: {err}", point.relative_path)),
        }
    }
    // A folder emptied here may be replaced by a file of the same name below.
    prune_empty_dirs(work_folder, std::mem::take(&mut emptied_dirs));

    let fetches = changes
        .additions
        .iter()
        .map(|file| (file, "add"))
        .chain(changes.updates.iter().map(|u| (&u.file, "update")));

    for (file, stage) in fetches {
        check_cancel(options)?;
        match checkout_file(source, file, work_folder) {
            Ok(point) => {
                sink.line(&format!("[{stage}] {} (rev {})", file.path, file.revision));
                report.fetched += 1;
                points.push(point);
            }
            Err(FileFailure::Connection(reason)) => {
                sink.line(&format!("[{stage}] {}: {reason}", file.path));
                return Err(SyncError::Checkout(format!(
                    "connection lost while fetching {}: {reason}",
                    file.path
                )));
            }
            Err(FileFailure::Skipped(reason)) => {
                sink.line(&format!("[{stage}] {} skipped: {reason}", file.path));
                report.skipped.push(file.path.clone());
            }
        }
    }

    if options.cleanup {
        let remote: HashSet<&str> = changes
            .additions
            .iter()
            .map(|f| f.path.as_str())
            .chain(changes.updates.iter().map(|u| u.file.path.as_str()))
            .chain(changes.unchanged.iter().map(|p| p.relative_path.as_str()))
            .collect();
        remove_orphans(work_folder, &remote, options, &mut report, &mut emptied_dirs, sink)?;
        prune_empty_dirs(work_folder, emptied_dirs);
    }

    Ok(CheckoutOutcome {
        points: FilePoints::from_points(points),
        report,
    })
}

fn check_cancel(options: &CheckoutOptions) -> Result<(), SyncError> {
    if options.cancel.is_cancelled() {
        return Err(SyncError::Checkout("checkout interrupted".to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Single file
// ---------------------------------------------------------------------------

enum FileFailure {
    Connection(String),
    Skipped(String),
}

impl From<SyncError> for FileFailure {
    fn from(err: SyncError) -> Self {
        FileFailure::Skipped(err.to_string())
    }
}

fn checkout_file(
    source: &mut dyn ContentSource,
    file: &RemoteFile,
    work_folder: &Path,
) -> Result<FilePoint, FileFailure> {
    let target = workspace_path(work_folder, &file.path)
        .ok_or_else(|| FileFailure::Skipped("path escapes work folder".to_string()))?;

    let bytes = source.fetch(&file.path).map_err(|err| match err {
        SessionError::Connection(reason) => FileFailure::Connection(reason),
        SessionError::File { reason, .. } => FileFailure::Skipped(reason),
    })?;

    write_atomic(&target, &bytes, file.last_modified)?;

    let meta = std::fs::metadata(&target).map_err(|e| io_err(&target, e))?;
    let modified = meta.modified().map_err(|e| io_err(&target, e))?;
    Ok(FilePoint::new(
        &file.path,
        file.revision,
        DateTime::<Utc>::from(modified),
        meta.len(),
    ))
}

/// Write `bytes` to `path` through a temp file stamped with `modified`.
pub(crate) fn write_atomic(
    path: &Path,
    bytes: &[u8],
    modified: DateTime<Utc>,
) -> Result<(), SyncError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(TMP_SUFFIX);
    let tmp = PathBuf::from(tmp);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    std::fs::write(&tmp, bytes).map_err(|e| io_err(&tmp, e))?;

    let stamp = FileTime::from_unix_time(modified.timestamp(), modified.timestamp_subsec_nanos());
    if let Err(e) = filetime::set_file_mtime(&tmp, stamp) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(&tmp, e));
    }

    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(path, e));
    }
    Ok(())
}

/// Join a normalised relative path onto `root`, refusing `..` segments.
fn workspace_path(root: &Path, relative: &str) -> Option<PathBuf> {
    let normalized = normalize_relative_path(relative);
    if normalized.is_empty() || normalized.split('/').any(|s| s == "..") {
        return None;
    }
    let mut path = root.to_path_buf();
    for segment in normalized.split('/') {
        path.push(segment);
    }
    Some(path)
}

/// `Ok(false)` when the file was already gone.
fn remove_file(path: &Path) -> Result<bool, SyncError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(io_err(path, err)),
    }
}

// ---------------------------------------------------------------------------
// Cleanup
// ---------------------------------------------------------------------------

fn remove_orphans(
    work_folder: &Path,
    remote: &HashSet<&str>,
    options: &CheckoutOptions,
    report: &mut CheckoutReport,
    emptied_dirs: &mut Vec<PathBuf>,
    sink: &dyn LogSink,
) -> Result<(), SyncError> {
    let mut orphans = Vec::new();
    for entry in WalkDir::new(work_folder).min_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                sink.line(&format!("[cleanup] cannot scan {}: {err}", work_folder.display()));
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(work_folder) else {
            continue;
        };
        let relative = normalize_relative_path(&relative.to_string_lossy());
        if !remote.contains(relative.as_str()) {
            orphans.push((relative, entry.path().to_path_buf()));
        }
    }

    for (relative, path) in orphans {
        check_cancel(options)?;
        match remove_file(&path) {
            Ok(_) => {
                report.orphans_removed += 1;
                sink.line(&format!("[cleanup] {relative} (not in repository)"));
                if let Some(parent) = path.parent() {
                    emptied_dirs.push(parent.to_path_buf());
                }
            }
            Err(err) => sink.line(&format!("[cleanup] {relative}: {err}")),
        }
    }
    Ok(())
}

/// Remove directories left empty by deletions, walking up to `work_folder`.
fn prune_empty_dirs(work_folder: &Path, mut dirs: Vec<PathBuf>) {
    // Deepest first so children go before their parents.
    dirs.sort_by_key(|d| std::cmp::Reverse(d.components().count()));
    dirs.dedup();
    for dir in dirs {
        let mut current = dir.as_path();
        while current != work_folder && current.starts_with(work_folder) {
            if std::fs::remove_dir(current).is_err() {
                break;
            }
            match current.parent() {
                Some(parent) => current = parent,
                None => break,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changeset;
    use crate::log_sink::{MemorySink, NullSink};
    use crate::memory::MemoryRepository;
    use crate::session::{Connector, Session};
    use chrono::TimeZone;
    use teamsync_core::{
        BaselinePolicy, ConnectionParams, RetryPolicy, Selection, ViewSelector,
    };
    use tempfile::TempDir;

    struct Direct(Box<dyn Session>);

    impl ContentSource for Direct {
        fn fetch(&mut self, path: &str) -> Result<Vec<u8>, SessionError> {
            self.0.fetch(path)
        }
    }

    fn open(repo: &MemoryRepository) -> Direct {
        let params = ConnectionParams {
            host: "memory".into(),
            port: 1,
            agent_host: None,
            agent_port: None,
            user: "u".into(),
            password: None,
            scheme: "http".into(),
            timeout_secs: 1,
            retry: RetryPolicy::default(),
        };
        let selection = Selection {
            project: "P".into(),
            view: "V".into(),
            folder: String::new(),
            selector: ViewSelector::Current,
        };
        Direct(repo.connect(&params, &selection).expect("connect"))
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn options(cleanup: bool) -> CheckoutOptions {
        CheckoutOptions {
            cleanup,
            cancel: CancelFlag::new(),
        }
    }

    #[test]
    fn additions_are_written_with_server_timestamp() {
        let work = TempDir::new().unwrap();
        let repo = MemoryRepository::new();
        repo.add_file("a.txt", 1, ts(0), b"alpha".to_vec());
        repo.add_file("nested/dir/b.txt", 3, ts(30), b"beta!".to_vec());

        let changes = changeset::initial(&repo.tree());
        let outcome =
            apply(&mut open(&repo), &changes, work.path(), &options(false), &NullSink).unwrap();

        assert_eq!(std::fs::read(work.path().join("a.txt")).unwrap(), b"alpha");
        assert!(work.path().join("nested/dir/b.txt").exists());
        assert_eq!(outcome.report.fetched, 2);

        let b = outcome.points.get("nested/dir/b.txt").expect("point");
        assert_eq!(b.revision, 3);
        assert_eq!(b.size, 5);
        assert_eq!(b.last_modified, ts(30));
    }

    #[test]
    fn checked_out_tree_compares_unchanged_next_time() {
        let work = TempDir::new().unwrap();
        let repo = MemoryRepository::new();
        repo.add_file("a.txt", 1, ts(0), b"alpha".to_vec());

        let tree = repo.tree();
        let outcome = apply(
            &mut open(&repo),
            &changeset::initial(&tree),
            work.path(),
            &options(false),
            &NullSink,
        )
        .unwrap();
        let next = changeset::compute(&tree, Some(&outcome.points), BaselinePolicy::SkipWhenAbsent)
            .unwrap();
        assert!(next.is_empty(), "re-stat must agree with the server: {next:?}");
    }

    #[test]
    fn deletion_without_cleanup_keeps_file_but_drops_point() {
        let work = TempDir::new().unwrap();
        std::fs::write(work.path().join("c.txt"), "stale").unwrap();
        let repo = MemoryRepository::new();
        let historic = FilePoints::from_points(vec![FilePoint::new("c.txt", 2, ts(0), 5)]);
        let changes =
            changeset::compute(&repo.tree(), Some(&historic), BaselinePolicy::SkipWhenAbsent)
                .unwrap();
        assert_eq!(changes.deletions.len(), 1);

        let outcome =
            apply(&mut open(&repo), &changes, work.path(), &options(false), &NullSink).unwrap();
        assert!(work.path().join("c.txt").exists());
        assert!(!outcome.points.contains("c.txt"));
        assert_eq!(outcome.report.removed, 0);
    }

    #[test]
    fn deletion_with_cleanup_removes_file_and_empty_folder() {
        let work = TempDir::new().unwrap();
        std::fs::create_dir_all(work.path().join("old")).unwrap();
        std::fs::write(work.path().join("old/c.txt"), "stale").unwrap();
        let repo = MemoryRepository::new();
        let historic = FilePoints::from_points(vec![FilePoint::new("old/c.txt", 2, ts(0), 5)]);
        let changes =
            changeset::compute(&repo.tree(), Some(&historic), BaselinePolicy::SkipWhenAbsent)
                .unwrap();

        let outcome =
            apply(&mut open(&repo), &changes, work.path(), &options(true), &NullSink).unwrap();
        assert!(!work.path().join("old/c.txt").exists());
        assert!(!work.path().join("old").exists());
        assert!(work.path().exists());
        assert_eq!(outcome.report.removed, 1);
    }

    #[test]
    fn deletion_of_missing_file_is_not_an_error() {
        let work = TempDir::new().unwrap();
        let repo = MemoryRepository::new();
        let historic = FilePoints::from_points(vec![FilePoint::new("ghost.txt", 2, ts(0), 5)]);
        let changes =
            changeset::compute(&repo.tree(), Some(&historic), BaselinePolicy::SkipWhenAbsent)
                .unwrap();
        let outcome =
            apply(&mut open(&repo), &changes, work.path(), &options(true), &NullSink).unwrap();
        assert!(outcome.points.is_empty());
    }

    #[test]
    fn file_failure_is_skipped_and_excluded() {
        let work = TempDir::new().unwrap();
        let repo = MemoryRepository::new();
        repo.add_file("good.txt", 1, ts(0), b"ok".to_vec());
        repo.add_file("bad.txt", 1, ts(0), b"nope".to_vec());
        repo.break_file("bad.txt");

        let sink = MemorySink::new();
        let outcome = apply(
            &mut open(&repo),
            &changeset::initial(&repo.tree()),
            work.path(),
            &options(false),
            &sink,
        )
        .unwrap();
        assert!(outcome.points.contains("good.txt"));
        assert!(!outcome.points.contains("bad.txt"));
        assert_eq!(outcome.report.skipped, vec!["bad.txt".to_string()]);
        assert!(sink.contains("bad.txt skipped"));
        assert!(!work.path().join("bad.txt").exists());
    }

    #[test]
    fn connection_loss_aborts_checkout() {
        let work = TempDir::new().unwrap();
        let repo = MemoryRepository::new();
        for name in ["a.txt", "b.txt", "c.txt"] {
            repo.add_file(name, 1, ts(0), name.as_bytes().to_vec());
        }
        repo.lose_connection_after(1);

        let err = apply(
            &mut open(&repo),
            &changeset::initial(&repo.tree()),
            work.path(),
            &options(false),
            &NullSink,
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::Checkout(_)));
        assert!(work.path().join("a.txt").exists(), "partial work is kept");
        assert!(!work.path().join("b.txt").exists());
    }

    #[test]
    fn cancelled_checkout_stops_before_next_file() {
        let work = TempDir::new().unwrap();
        let repo = MemoryRepository::new();
        repo.add_file("a.txt", 1, ts(0), b"a".to_vec());

        let opts = options(false);
        opts.cancel.cancel();
        let err = apply(
            &mut open(&repo),
            &changeset::initial(&repo.tree()),
            work.path(),
            &opts,
            &NullSink,
        )
        .unwrap_err();
        assert!(err.to_string().contains("interrupted"));
        assert!(!work.path().join("a.txt").exists());
    }

    #[test]
    fn cleanup_removes_orphans_but_keeps_tracked_files() {
        let work = TempDir::new().unwrap();
        std::fs::write(work.path().join("keep.txt"), "k").unwrap();
        std::fs::create_dir_all(work.path().join("build")).unwrap();
        std::fs::write(work.path().join("build/out.o"), "o").unwrap();
        std::fs::write(work.path().join("half.txt.teamsync.tmp"), "partial").unwrap();

        let repo = MemoryRepository::new();
        repo.add_file("keep.txt", 1, ts(0), b"k".to_vec());
        let historic = FilePoints::from_points(vec![FilePoint::new("keep.txt", 1, ts(0), 1)]);
        let changes =
            changeset::compute(&repo.tree(), Some(&historic), BaselinePolicy::SkipWhenAbsent)
                .unwrap();

        let outcome =
            apply(&mut open(&repo), &changes, work.path(), &options(true), &NullSink).unwrap();
        assert!(work.path().join("keep.txt").exists());
        assert!(!work.path().join("build/out.o").exists());
        assert!(!work.path().join("build").exists());
        assert!(!work.path().join("half.txt.teamsync.tmp").exists());
        assert_eq!(outcome.report.orphans_removed, 2);
        assert!(outcome.points.contains("keep.txt"));
    }

    #[test]
    fn folder_replaced_by_file_is_materialised() {
        let work = TempDir::new().unwrap();
        std::fs::create_dir_all(work.path().join("docs")).unwrap();
        std::fs::write(work.path().join("docs/index.md"), "old").unwrap();

        let repo = MemoryRepository::new();
        repo.add_file("docs", 5, ts(0), b"now a file".to_vec());
        let historic =
            FilePoints::from_points(vec![FilePoint::new("docs/index.md", 1, ts(0), 3)]);
        let changes =
            changeset::compute(&repo.tree(), Some(&historic), BaselinePolicy::SkipWhenAbsent)
                .unwrap();

        let outcome =
            apply(&mut open(&repo), &changes, work.path(), &options(true), &NullSink).unwrap();
        assert_eq!(
            std::fs::read_to_string(work.path().join("docs")).unwrap(),
            "now a file"
        );
        assert!(outcome.points.contains("docs"));
        assert!(!outcome.points.contains("docs/index.md"));
    }

    #[test]
    fn parent_escape_is_refused() {
        assert!(workspace_path(Path::new("/w"), "../etc/passwd").is_none());
        assert!(workspace_path(Path::new("/w"), "").is_none());
        assert_eq!(
            workspace_path(Path::new("/w"), "a\\b.txt"),
            Some(PathBuf::from("/w/a/b.txt"))
        );
    }

    #[test]
    fn write_atomic_leaves_no_tmp_file() {
        let work = TempDir::new().unwrap();
        let path = work.path().join("x/y.txt");
        write_atomic(&path, b"data", ts(0)).unwrap();
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(TMP_SUFFIX);
        assert!(!PathBuf::from(tmp).exists());
        assert_eq!(std::fs::read(&path).unwrap(), b"data");
    }
}
