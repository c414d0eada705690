//! In-process repository.
//!
//! [`MemoryRepository`] is a [`Connector`] backed by a flat map of files. It
//! can be told to reject connections, fail individual fetches, or drop the
//! connection after a number of fetches, and it counts connects, closes, and
//! fetches.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use teamsync_core::{
    types::normalize_relative_path, ConnectionParams, RemoteNode, Selection,
};

use crate::session::{Connector, Session, SessionError};

/// Call counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub connects: usize,
    pub closes: usize,
    pub fetches: usize,
}

#[derive(Debug, Clone)]
struct StoredFile {
    revision: i64,
    modified: DateTime<Utc>,
    contents: Vec<u8>,
    author: Option<String>,
    comment: Option<String>,
}

#[derive(Debug, Default)]
struct Inner {
    files: BTreeMap<String, StoredFile>,
    connect_error: Option<String>,
    failing_connects: usize,
    broken: BTreeSet<String>,
    lose_connection_after: Option<usize>,
    stats: MemoryStats,
    last_selection: Option<Selection>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryRepository {
    inner: Arc<Mutex<Inner>>,
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a file.
    pub fn add_file(&self, path: &str, revision: i64, modified: DateTime<Utc>, contents: Vec<u8>) {
        self.insert(path, revision, modified, contents, None, None);
    }

    /// Add or replace a file with change-log attribution.
    pub fn add_file_by(
        &self,
        path: &str,
        revision: i64,
        modified: DateTime<Utc>,
        contents: Vec<u8>,
        author: &str,
        comment: &str,
    ) {
        self.insert(
            path,
            revision,
            modified,
            contents,
            Some(author.to_string()),
            Some(comment.to_string()),
        );
    }

    fn insert(
        &self,
        path: &str,
        revision: i64,
        modified: DateTime<Utc>,
        contents: Vec<u8>,
        author: Option<String>,
        comment: Option<String>,
    ) {
        lock(&self.inner).files.insert(
            normalize_relative_path(path),
            StoredFile {
                revision,
                modified,
                contents,
                author,
                comment,
            },
        );
    }

    /// Change a file's timestamp without a new revision.
    pub fn touch(&self, path: &str, modified: DateTime<Utc>) {
        if let Some(file) = lock(&self.inner)
            .files
            .get_mut(&normalize_relative_path(path))
        {
            file.modified = modified;
        }
    }

    pub fn remove_file(&self, path: &str) {
        lock(&self.inner).files.remove(&normalize_relative_path(path));
    }

    /// Reject every connection attempt with `reason`.
    pub fn fail_connect(&self, reason: &str) {
        lock(&self.inner).connect_error = Some(reason.to_string());
    }

    /// Reject the next `count` connection attempts.
    pub fn fail_next_connects(&self, count: usize) {
        lock(&self.inner).failing_connects = count;
    }

    /// Make fetches of `path` fail with a file-level error.
    pub fn break_file(&self, path: &str) {
        lock(&self.inner).broken.insert(normalize_relative_path(path));
    }

    /// Fail every fetch after the first `fetches` with a connection error.
    pub fn lose_connection_after(&self, fetches: usize) {
        lock(&self.inner).lose_connection_after = Some(fetches);
    }

    pub fn stats(&self) -> MemoryStats {
        lock(&self.inner).stats
    }

    /// Selection passed to the most recent successful connect.
    pub fn last_selection(&self) -> Option<Selection> {
        lock(&self.inner).last_selection.clone()
    }

    /// The current tree, rooted at a folder named `root`.
    pub fn tree(&self) -> RemoteNode {
        build_tree(&lock(&self.inner).files)
    }
}

fn build_tree(files: &BTreeMap<String, StoredFile>) -> RemoteNode {
    let mut root = RemoteNode::folder("root", Vec::new());
    for (path, file) in files {
        let segments: Vec<&str> = path.split('/').collect();
        let Some((name, parents)) = segments.split_last() else {
            continue;
        };
        let mut node = RemoteNode::file(
            *name,
            file.revision,
            file.modified,
            file.contents.len() as u64,
        );
        node.author = file.author.clone();
        node.comment = file.comment.clone();
        insert_node(&mut root, parents, node);
    }
    root
}

fn insert_node(folder: &mut RemoteNode, parents: &[&str], leaf: RemoteNode) {
    let Some((first, rest)) = parents.split_first() else {
        folder.children.push(leaf);
        return;
    };
    let index = match folder
        .children
        .iter()
        .position(|c| c.is_folder() && c.name == *first)
    {
        Some(index) => index,
        None => {
            folder
                .children
                .push(RemoteNode::folder(*first, Vec::new()));
            folder.children.len() - 1
        }
    };
    insert_node(&mut folder.children[index], rest, leaf);
}

impl Connector for MemoryRepository {
    fn connect(
        &self,
        _params: &ConnectionParams,
        selection: &Selection,
    ) -> Result<Box<dyn Session>, SessionError> {
        let mut inner = lock(&self.inner);
        inner.stats.connects += 1;
        if inner.failing_connects > 0 {
            inner.failing_connects -= 1;
            return Err(SessionError::Connection("server busy".to_string()));
        }
        if let Some(reason) = &inner.connect_error {
            return Err(SessionError::Connection(reason.clone()));
        }
        inner.last_selection = Some(selection.clone());
        Ok(Box::new(MemorySession {
            inner: Arc::clone(&self.inner),
            closed: false,
        }))
    }
}

struct MemorySession {
    inner: Arc<Mutex<Inner>>,
    closed: bool,
}

impl Session for MemorySession {
    fn tree(&mut self) -> Result<RemoteNode, SessionError> {
        Ok(build_tree(&lock(&self.inner).files))
    }

    fn fetch(&mut self, path: &str) -> Result<Vec<u8>, SessionError> {
        let mut inner = lock(&self.inner);
        inner.stats.fetches += 1;
        if let Some(limit) = inner.lose_connection_after {
            if inner.stats.fetches > limit {
                return Err(SessionError::Connection("connection reset by peer".to_string()));
            }
        }
        let key = normalize_relative_path(path);
        if inner.broken.contains(&key) {
            return Err(SessionError::File {
                path: key,
                reason: "content unavailable".to_string(),
            });
        }
        match inner.files.get(&key) {
            Some(file) => Ok(file.contents.clone()),
            None => Err(SessionError::File {
                path: key,
                reason: "not found".to_string(),
            }),
        }
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            lock(&self.inner).stats.closes += 1;
        }
    }
}
