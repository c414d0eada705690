//! Template context: serializable rendering payload built from a [`ChangeSet`].

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use teamsync_core::{ChangeLogEntry, ChangeSet};

use crate::engine::strip_invalid_xml_chars;
use crate::error::RenderError;

/// Rendering payload for the change-log template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeLogContext {
    /// Records in document order.
    pub entries: Vec<EntryCtx>,
    pub generated_at: String,
}

/// One `<entry>` of the change log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryCtx {
    pub file_name: String,
    pub revision: i64,
    pub date: String,
    pub user: String,
    pub message: String,
    pub change_type: String,
}

impl ChangeLogContext {
    pub fn from_change_set(changes: &ChangeSet) -> Self {
        Self::from_entries(&changes.log_entries())
    }

    pub fn from_entries(entries: &[ChangeLogEntry]) -> Self {
        Self {
            entries: entries.iter().map(EntryCtx::from_entry).collect(),
            generated_at: format_date(Utc::now()),
        }
    }

    pub fn to_tera_context(&self) -> Result<tera::Context, RenderError> {
        tera::Context::from_serialize(self).map_err(RenderError::Context)
    }
}

impl EntryCtx {
    fn from_entry(entry: &ChangeLogEntry) -> Self {
        Self {
            file_name: strip_invalid_xml_chars(&entry.path),
            revision: entry.revision,
            date: format_date(entry.timestamp),
            user: strip_invalid_xml_chars(&entry.author),
            message: strip_invalid_xml_chars(&entry.message.replace("\r\n", "\n")),
            change_type: entry.change_type.to_string(),
        }
    }
}

fn format_date(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}
