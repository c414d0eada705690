//! Change-set computation.
//!
//! Both sides are hashed by relative path, then the sorted union of paths is
//! walked once:
//!
//! | remote | historic | result                                   |
//! |--------|----------|------------------------------------------|
//! | yes    | no       | addition                                 |
//! | no     | yes      | deletion                                 |
//! | yes    | yes      | revision differs → content update        |
//! |        |          | same revision, size/mtime differ → metadata update |
//! |        |          | otherwise unchanged                      |
//!
//! The revision number is authoritative. Size and timestamp are only looked
//! at when revisions match.

use std::collections::{BTreeSet, HashMap};

use teamsync_core::{
    BaselinePolicy, ChangeSet, FilePoint, FilePoints, RemoteFile, RemoteNode, Update,
    UpdateReason,
};

/// Compare the remote tree against the historic FilePoints.
///
/// Returns `None` only when there is no baseline and `policy` is
/// [`BaselinePolicy::SkipWhenAbsent`]. A missing baseline under
/// [`BaselinePolicy::FullCheckout`] yields every remote file as an addition.
pub fn compute(
    remote: &RemoteNode,
    historic: Option<&FilePoints>,
    policy: BaselinePolicy,
) -> Option<ChangeSet> {
    match (historic, policy) {
        (None, BaselinePolicy::SkipWhenAbsent) => None,
        (None, BaselinePolicy::FullCheckout) => Some(initial(remote)),
        (Some(points), _) => Some(diff(remote.files(), points.as_slice())),
    }
}

/// Every remote file as an addition; used to populate a workspace when there
/// is nothing to compare against.
pub fn initial(remote: &RemoteNode) -> ChangeSet {
    diff(remote.files(), &[])
}

fn diff(remote_files: Vec<RemoteFile>, historic: &[FilePoint]) -> ChangeSet {
    let remote: HashMap<&str, &RemoteFile> = remote_files
        .iter()
        .map(|f| (f.path.as_str(), f))
        .collect();
    let previous: HashMap<&str, &FilePoint> = historic
        .iter()
        .map(|p| (p.relative_path.as_str(), p))
        .collect();
    let paths: BTreeSet<&str> = remote.keys().chain(previous.keys()).copied().collect();

    let mut changes = ChangeSet::default();
    for path in paths {
        match (remote.get(path), previous.get(path)) {
            (Some(file), None) => changes.additions.push((*file).clone()),
            (None, Some(point)) => changes.deletions.push((*point).clone()),
            (Some(file), Some(point)) => match classify(file, point) {
                Some(reason) => changes.updates.push(Update {
                    file: (*file).clone(),
                    previous: (*point).clone(),
                    reason,
                }),
                None => changes.unchanged.push((*point).clone()),
            },
            (None, None) => {}
        }
    }
    changes
}

fn classify(file: &RemoteFile, point: &FilePoint) -> Option<UpdateReason> {
    if file.revision != point.revision {
        return Some(UpdateReason::Content);
    }
    if file.size != point.size
        || file.last_modified.timestamp_millis() != point.last_modified.timestamp_millis()
    {
        return Some(UpdateReason::Metadata);
    }
    None
}
