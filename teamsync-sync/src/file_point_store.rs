//! FilePoint store: the persisted baseline of a run.
//!
//! Persists a `FilePointFile` JSON document, one per run. Writes go to
//! `<path>.tmp` and are renamed over `<path>`, so a reader never sees a
//! half-written collection.
//!
//! Loading never fails: a missing file means "no baseline", and an unreadable
//! or corrupt file is reported on the sink and treated the same way.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use teamsync_core::FilePoints;

use crate::error::{persistence_err, SyncError};
use crate::log_sink::LogSink;

/// File name of the FilePoint collection inside a run directory.
pub const FILE_POINT_FILENAME: &str = "filepoints.json";

/// On-disk FilePoint payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FilePointFile {
    pub saved_at: DateTime<Utc>,
    pub points: FilePoints,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FilePointCompat {
    Structured(FilePointFile),
    Bare(FilePoints),
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Load the FilePoint collection stored at `path`.
///
/// Returns `None` when the file does not exist or cannot be decoded.
pub fn load(path: &Path, sink: &dyn LogSink) -> Option<FilePoints> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return None,
        Err(err) => {
            sink.line(&format!(
                "[load file points] unable to read {}: {err}; continuing without baseline",
                path.display()
            ));
            return None;
        }
    };

    match serde_json::from_str::<FilePointCompat>(&contents) {
        Ok(FilePointCompat::Structured(file)) => Some(file.points),
        Ok(FilePointCompat::Bare(points)) => Some(points),
        Err(err) => {
            sink.line(&format!(
                "[load file points] {} is corrupt: {err}; continuing without baseline",
                path.display()
            ));
            None
        }
    }
}

/// Save `points` to `path` atomically.
///
/// Writes to `<path>.tmp` then renames to `<path>`.
pub fn save(path: &Path, points: &FilePoints) -> Result<(), SyncError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| persistence_err(dir, e))?;
    }

    let file = FilePointFile {
        saved_at: Utc::now(),
        points: points.clone(),
    };
    let json = serde_json::to_string_pretty(&file)
        .map_err(|e| persistence_err(path, std::io::Error::other(e)))?;

    let tmp = tmp_path(path);
    std::fs::write(&tmp, json).map_err(|e| persistence_err(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(persistence_err(path, e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_sink::MemorySink;
    use chrono::TimeZone;
    use teamsync_core::FilePoint;
    use tempfile::TempDir;

    fn points() -> FilePoints {
        let ts = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        FilePoints::from_points(vec![
            FilePoint::new("src/main.rs", 4, ts, 120),
            FilePoint::new("README.md", 1, ts, 42),
        ])
    }

    #[test]
    fn missing_file_is_absent_without_noise() {
        let tmp = TempDir::new().unwrap();
        let sink = MemorySink::new();
        assert!(load(&tmp.path().join("nope.json"), &sink).is_none());
        assert!(sink.lines().is_empty());
    }

    #[test]
    fn roundtrip_save_load() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("runs").join("7").join(FILE_POINT_FILENAME);
        save(&path, &points()).unwrap();
        let loaded = load(&path, &MemorySink::new()).expect("baseline");
        assert_eq!(loaded, points());
    }

    #[test]
    fn tmp_file_cleaned_up_after_save() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(FILE_POINT_FILENAME);
        save(&path, &points()).unwrap();
        assert!(
            !tmp_path(&path).exists(),
            "tmp file should be removed after atomic rename"
        );
    }

    #[test]
    fn corrupt_file_is_absent_and_reported() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(FILE_POINT_FILENAME);
        std::fs::write(&path, "{ not json").unwrap();
        let sink = MemorySink::new();
        assert!(load(&path, &sink).is_none());
        assert!(sink.contains("corrupt"));
    }

    #[test]
    fn bare_list_is_accepted() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(FILE_POINT_FILENAME);
        std::fs::write(
            &path,
            r#"[{"relative_path":"b.txt","revision":2,"last_modified":"2024-01-01T00:00:00Z","size":3},
                {"relative_path":"a.txt","revision":1,"last_modified":"2024-01-01T00:00:00Z","size":1}]"#,
        )
        .unwrap();
        let loaded = load(&path, &MemorySink::new()).expect("baseline");
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.as_slice()[0].relative_path, "a.txt");
    }

    #[test]
    fn unsorted_document_with_duplicate_path_is_normalized() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(FILE_POINT_FILENAME);
        std::fs::write(
            &path,
            r#"{"saved_at":"2024-01-02T00:00:00Z","points":[
                {"relative_path":"b.txt","revision":1,"last_modified":"2024-01-01T00:00:00Z","size":3},
                {"relative_path":"a.txt","revision":1,"last_modified":"2024-01-01T00:00:00Z","size":1},
                {"relative_path":"a.txt","revision":2,"last_modified":"2024-01-01T00:00:00Z","size":1}]}"#,
        )
        .unwrap();
        let loaded = load(&path, &MemorySink::new()).expect("baseline");
        assert_eq!(loaded.len(), 2);
        assert!(loaded.contains("b.txt"));
        assert_eq!(loaded.get("a.txt").map(|p| p.revision), Some(2));
    }

    #[test]
    fn save_replaces_previous_collection_wholesale() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(FILE_POINT_FILENAME);
        save(&path, &points()).unwrap();
        save(&path, &FilePoints::default()).unwrap();
        let loaded = load(&path, &MemorySink::new()).expect("baseline");
        assert!(loaded.is_empty());
    }

    #[test]
    #[cfg(unix)]
    fn save_into_readonly_dir_fails_and_keeps_original() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("ro");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(FILE_POINT_FILENAME);
        save(&path, &points()).unwrap();

        std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o555)).unwrap();
        let result = save(&path, &FilePoints::default());
        std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o755)).unwrap();

        // Root ignores directory permissions; only assert when the write failed.
        if let Err(err) = result {
            assert!(matches!(err, SyncError::Persistence { .. }));
            let loaded = load(&path, &MemorySink::new()).expect("baseline");
            assert_eq!(loaded, points());
        }
    }
}
