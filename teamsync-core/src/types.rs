//! Domain types for workspace synchronization.
//!
//! Relative paths are always `/`-separated strings so that FilePoints written
//! on one host compare equal on another. Timestamps carry millisecond
//! precision; see [`truncate_millis`].

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Drop sub-millisecond precision so values survive a trip through the
/// filesystem and through JSON unchanged.
pub fn truncate_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ts.timestamp_millis())
        .single()
        .unwrap_or(ts)
}

/// Normalise a workspace-relative path: `\` becomes `/`, leading `./` and `/`
/// are stripped, empty and `.` segments are dropped.
pub fn normalize_relative_path(path: &str) -> String {
    path.replace('\\', "/")
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

// ---------------------------------------------------------------------------
// FilePoint
// ---------------------------------------------------------------------------

/// One tracked file's identity and version fingerprint at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilePoint {
    pub relative_path: String,
    pub revision: i64,
    pub last_modified: DateTime<Utc>,
    pub size: u64,
}

impl FilePoint {
    pub fn new(
        relative_path: impl AsRef<str>,
        revision: i64,
        last_modified: DateTime<Utc>,
        size: u64,
    ) -> Self {
        Self {
            relative_path: normalize_relative_path(relative_path.as_ref()),
            revision,
            last_modified: truncate_millis(last_modified),
            size,
        }
    }
}

impl fmt::Display for FilePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.relative_path, self.revision)
    }
}

/// Ordered FilePoint collection, unique by path.
///
/// Serialized as a plain list. Deserialization goes through
/// [`FilePoints::from_points`], so a hand-edited or foreign list is
/// normalized, sorted and deduplicated on the way in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<FilePoint>", into = "Vec<FilePoint>")]
pub struct FilePoints(Vec<FilePoint>);

impl FilePoints {
    /// Build a collection sorted by path. When a path occurs more than once
    /// the last occurrence wins.
    pub fn from_points(points: impl IntoIterator<Item = FilePoint>) -> Self {
        let unique: BTreeMap<String, FilePoint> = points
            .into_iter()
            .map(|p| (p.relative_path.clone(), p))
            .collect();
        Self(unique.into_values().collect())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FilePoint> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[FilePoint] {
        &self.0
    }

    /// Look up a point by its relative path.
    pub fn get(&self, relative_path: &str) -> Option<&FilePoint> {
        self.0
            .binary_search_by(|p| p.relative_path.as_str().cmp(relative_path))
            .ok()
            .map(|i| &self.0[i])
    }

    pub fn contains(&self, relative_path: &str) -> bool {
        self.get(relative_path).is_some()
    }

    pub fn into_vec(self) -> Vec<FilePoint> {
        self.0
    }
}

impl From<Vec<FilePoint>> for FilePoints {
    fn from(points: Vec<FilePoint>) -> Self {
        Self::from_points(points.into_iter().map(|p| {
            FilePoint::new(p.relative_path, p.revision, p.last_modified, p.size)
        }))
    }
}

impl From<FilePoints> for Vec<FilePoint> {
    fn from(points: FilePoints) -> Self {
        points.0
    }
}

impl FromIterator<FilePoint> for FilePoints {
    fn from_iter<I: IntoIterator<Item = FilePoint>>(iter: I) -> Self {
        Self::from_points(iter)
    }
}

impl<'a> IntoIterator for &'a FilePoints {
    type Item = &'a FilePoint;
    type IntoIter = std::slice::Iter<'a, FilePoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

// ---------------------------------------------------------------------------
// Remote tree
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    #[default]
    File,
    Folder,
}

/// A folder or file as reported by the repository server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteNode {
    pub name: String,
    #[serde(default)]
    pub kind: NodeKind,
    #[serde(default)]
    pub revision: i64,
    pub last_modified: DateTime<Utc>,
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<RemoteNode>,
}

impl RemoteNode {
    pub fn file(
        name: impl Into<String>,
        revision: i64,
        last_modified: DateTime<Utc>,
        size: u64,
    ) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::File,
            revision,
            last_modified,
            size,
            author: None,
            comment: None,
            children: Vec::new(),
        }
    }

    pub fn folder(name: impl Into<String>, children: Vec<RemoteNode>) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::Folder,
            revision: 0,
            last_modified: DateTime::<Utc>::default(),
            size: 0,
            author: None,
            comment: None,
            children,
        }
    }

    pub fn with_author(mut self, author: impl Into<String>, comment: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self.comment = Some(comment.into());
        self
    }

    pub fn is_folder(&self) -> bool {
        self.kind == NodeKind::Folder
    }

    /// Flatten the tree below this node into file entries keyed by their
    /// path relative to this node. The node's own name is not part of the
    /// paths. A file root yields itself under its own name.
    pub fn files(&self) -> Vec<RemoteFile> {
        if !self.is_folder() {
            return vec![RemoteFile::from_node(&self.name, self)];
        }

        let mut out = Vec::new();
        let mut stack: Vec<(String, &RemoteNode)> = self
            .children
            .iter()
            .rev()
            .map(|child| (child.name.clone(), child))
            .collect();
        while let Some((path, node)) = stack.pop() {
            if node.is_folder() {
                for child in node.children.iter().rev() {
                    stack.push((format!("{path}/{}", child.name), child));
                }
            } else {
                out.push(RemoteFile::from_node(&path, node));
            }
        }
        out
    }
}

/// A remote file flattened to its workspace-relative path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub path: String,
    pub revision: i64,
    pub last_modified: DateTime<Utc>,
    pub size: u64,
    pub author: Option<String>,
    pub comment: Option<String>,
}

impl RemoteFile {
    fn from_node(path: &str, node: &RemoteNode) -> Self {
        Self {
            path: normalize_relative_path(path),
            revision: node.revision,
            last_modified: truncate_millis(node.last_modified),
            size: node.size,
            author: node.author.clone(),
            comment: node.comment.clone(),
        }
    }

    /// The FilePoint this file would have if written exactly as reported.
    pub fn to_file_point(&self) -> FilePoint {
        FilePoint::new(&self.path, self.revision, self.last_modified, self.size)
    }
}

// ---------------------------------------------------------------------------
// Change set
// ---------------------------------------------------------------------------

/// Why a file present on both sides needs to be fetched again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateReason {
    /// The revision number moved.
    Content,
    /// Same revision, but size or timestamp changed on the server.
    Metadata,
}

impl fmt::Display for UpdateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateReason::Content => write!(f, "content"),
            UpdateReason::Metadata => write!(f, "metadata"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Update {
    pub file: RemoteFile,
    pub previous: FilePoint,
    pub reason: UpdateReason,
}

/// Dispositions for every path in `historic ∪ remote`. Each list is sorted
/// by path and no path appears in more than one list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub additions: Vec<RemoteFile>,
    pub updates: Vec<Update>,
    pub deletions: Vec<FilePoint>,
    pub unchanged: Vec<FilePoint>,
}

impl ChangeSet {
    /// `true` when there is nothing to add, update, or delete.
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.updates.is_empty() && self.deletions.is_empty()
    }

    /// Number of additions, updates, and deletions.
    pub fn change_count(&self) -> usize {
        self.additions.len() + self.updates.len() + self.deletions.len()
    }

    /// Change-log entries: additions, then updates, then deletions.
    /// Unchanged files are never reported.
    pub fn log_entries(&self) -> Vec<ChangeLogEntry> {
        let mut entries = Vec::with_capacity(self.change_count());
        for file in &self.additions {
            entries.push(ChangeLogEntry::from_remote(file, ChangeType::Added));
        }
        for update in &self.updates {
            let change_type = match update.reason {
                UpdateReason::Content => ChangeType::Modified,
                UpdateReason::Metadata => ChangeType::Metadata,
            };
            entries.push(ChangeLogEntry::from_remote(&update.file, change_type));
        }
        for point in &self.deletions {
            entries.push(ChangeLogEntry {
                path: point.relative_path.clone(),
                revision: point.revision,
                author: String::new(),
                timestamp: point.last_modified,
                message: String::new(),
                change_type: ChangeType::Deleted,
            });
        }
        entries
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Added,
    Modified,
    Metadata,
    Deleted,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeType::Added => write!(f, "added"),
            ChangeType::Modified => write!(f, "modified"),
            ChangeType::Metadata => write!(f, "metadata"),
            ChangeType::Deleted => write!(f, "deleted"),
        }
    }
}

/// One record of the change-log document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeLogEntry {
    pub path: String,
    pub revision: i64,
    pub author: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub change_type: ChangeType,
}

impl ChangeLogEntry {
    fn from_remote(file: &RemoteFile, change_type: ChangeType) -> Self {
        Self {
            path: file.path.clone(),
            revision: file.revision,
            author: file.author.clone().unwrap_or_default(),
            timestamp: file.last_modified,
            message: file.comment.clone().unwrap_or_default(),
            change_type,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    #[test]
    fn normalize_strips_prefixes_and_backslashes() {
        assert_eq!(normalize_relative_path("./src\\main.rs"), "src/main.rs");
        assert_eq!(normalize_relative_path("/a//b/./c.txt"), "a/b/c.txt");
        assert_eq!(normalize_relative_path("plain.txt"), "plain.txt");
    }

    #[test]
    fn file_point_truncates_to_millis() {
        let precise = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        let point = FilePoint::new("a.txt", 1, precise, 3);
        assert_eq!(point.last_modified.timestamp_subsec_nanos(), 123_000_000);
    }

    #[test]
    fn file_points_are_sorted_and_unique() {
        let points = FilePoints::from_points(vec![
            FilePoint::new("b.txt", 1, ts(0), 1),
            FilePoint::new("a.txt", 1, ts(0), 1),
            FilePoint::new("b.txt", 2, ts(0), 1),
        ]);
        assert_eq!(points.len(), 2);
        assert_eq!(points.as_slice()[0].relative_path, "a.txt");
        assert_eq!(points.get("b.txt").map(|p| p.revision), Some(2));
        assert!(points.get("c.txt").is_none());
    }

    #[test]
    fn deserialized_points_are_sorted_unique_and_normalized() {
        let json = r#"[
            {"relative_path":"b.txt","revision":1,"last_modified":"2024-01-01T00:00:00Z","size":1},
            {"relative_path":"./a.txt","revision":1,"last_modified":"2024-01-01T00:00:00.123456Z","size":1},
            {"relative_path":"a.txt","revision":2,"last_modified":"2024-01-01T00:00:00Z","size":1}
        ]"#;
        let points: FilePoints = serde_json::from_str(json).unwrap();
        assert_eq!(points.len(), 2);
        assert!(points.contains("b.txt"));
        assert_eq!(points.get("a.txt").map(|p| p.revision), Some(2));

        let json = r#"[{"relative_path":"src\\x.rs","revision":1,"last_modified":"2024-01-01T00:00:00.123456Z","size":1}]"#;
        let points: FilePoints = serde_json::from_str(json).unwrap();
        let point = points.get("src/x.rs").expect("normalized path");
        assert_eq!(point.last_modified.timestamp_subsec_nanos(), 123_000_000);
    }

    #[test]
    fn file_points_serialize_as_plain_list() {
        let points = FilePoints::from_points(vec![FilePoint::new("a.txt", 1, ts(0), 1)]);
        let value = serde_json::to_value(&points).unwrap();
        assert_eq!(value.as_array().map(Vec::len), Some(1));
        assert_eq!(value[0]["relative_path"], "a.txt");
    }

    #[test]
    fn flatten_skips_root_name_and_folders() {
        let tree = RemoteNode::folder(
            "root",
            vec![
                RemoteNode::file("a.txt", 1, ts(0), 1),
                RemoteNode::folder(
                    "src",
                    vec![
                        RemoteNode::file("lib.rs", 4, ts(0), 10),
                        RemoteNode::folder("empty", vec![]),
                    ],
                ),
            ],
        );
        let paths: Vec<_> = tree.files().into_iter().map(|f| f.path).collect();
        assert_eq!(paths, vec!["a.txt".to_string(), "src/lib.rs".to_string()]);
    }

    #[test]
    fn log_entries_skip_unchanged_and_keep_order() {
        let added = RemoteNode::file("new.txt", 1, ts(0), 1)
            .with_author("alice", "initial import")
            .files()
            .remove(0);
        let set = ChangeSet {
            additions: vec![added],
            updates: vec![],
            deletions: vec![FilePoint::new("gone.txt", 3, ts(0), 1)],
            unchanged: vec![FilePoint::new("same.txt", 1, ts(0), 1)],
        };
        let entries = set.log_entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].change_type, ChangeType::Added);
        assert_eq!(entries[0].author, "alice");
        assert_eq!(entries[1].change_type, ChangeType::Deleted);
        assert_eq!(set.change_count(), 2);
    }

    #[test]
    fn remote_node_json_defaults_missing_fields() {
        let json = r#"{"name":"x.txt","last_modified":"2024-01-01T00:00:00Z"}"#;
        let node: RemoteNode = serde_json::from_str(json).expect("parse");
        assert_eq!(node.kind, NodeKind::File);
        assert!(node.children.is_empty());
        assert!(node.author.is_none());
    }
}
