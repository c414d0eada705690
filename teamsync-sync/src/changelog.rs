//! Change-log document writer.
//!
//! The document is always produced: a missing change set or any render
//! failure yields [`EMPTY_CHANGELOG`] instead of an error.

use std::path::{Path, PathBuf};

use teamsync_core::ChangeSet;
use teamsync_renderer::Renderer;

use crate::error::{io_err, SyncError};
use crate::log_sink::LogSink;

/// Document written when there is nothing to report.
pub const EMPTY_CHANGELOG: &str = "<log/>";

/// Render `changes` with the embedded template or an override from
/// `template_dir`. A missing change set renders as [`EMPTY_CHANGELOG`].
pub fn render(changes: Option<&ChangeSet>, template_dir: Option<&Path>) -> Result<String, SyncError> {
    let Some(changes) = changes else {
        return Ok(EMPTY_CHANGELOG.to_string());
    };
    let renderer = Renderer::with_templates(template_dir)?;
    Ok(renderer.render_change_set(changes)?)
}

/// Render `changes` to a change-log document, falling back to
/// [`EMPTY_CHANGELOG`] when rendering fails.
///
/// `template_dir` may hold a `changelog.xml.tera` overriding the embedded one.
pub fn write(changes: Option<&ChangeSet>, template_dir: Option<&Path>, sink: &dyn LogSink) -> String {
    if changes.is_none() {
        sink.line("no baseline to compare against, creating an empty change log");
    }
    match render(changes, template_dir) {
        Ok(document) => document,
        Err(err) => {
            sink.line(&format!("[changelog] render failed, writing empty change log: {err}"));
            EMPTY_CHANGELOG.to_string()
        }
    }
}

/// Render and atomically write the change log to `path`.
///
/// Render failures are already absorbed by [`write`]; only the I/O error of
/// the final write is returned.
pub fn write_file(
    path: &Path,
    changes: Option<&ChangeSet>,
    template_dir: Option<&Path>,
    sink: &dyn LogSink,
) -> Result<(), SyncError> {
    let document = write(changes, template_dir, sink);
    write_document(path, &document)
}

fn write_document(path: &Path, document: &str) -> Result<(), SyncError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    std::fs::write(&tmp, document).map_err(|e| io_err(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(path, e));
    }
    Ok(())
}
