//! Tera rendering engine for the change-log document.
//!
//! The embedded `changelog.xml.tera` template is baked into the binary. A user
//! template directory may contain a file with the same name to override it.

use std::path::{Path, PathBuf};

use tera::Tera;

use teamsync_core::{ChangeLogEntry, ChangeSet};

use crate::context::ChangeLogContext;
use crate::error::RenderError;

/// Name of the change-log template, embedded or user supplied.
pub const CHANGELOG_TEMPLATE: &str = "changelog.xml.tera";

const TPLS: &[(&str, &str)] = &[(
    CHANGELOG_TEMPLATE,
    include_str!("templates/changelog.xml.tera"),
)];

// ---------------------------------------------------------------------------
// Template loading helpers
// ---------------------------------------------------------------------------

fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RenderError {
    RenderError::Io {
        path: path.into(),
        source,
    }
}

fn load_user_templates(dir: &Path) -> Result<Vec<(String, String)>, RenderError> {
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut templates = Vec::new();
    let entries = std::fs::read_dir(dir).map_err(|e| io_err(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some("tera") {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_lowercase();
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        templates.push((name, contents));
    }
    Ok(templates)
}

fn build_tera(user_template_dir: Option<&Path>) -> Result<Tera, RenderError> {
    let mut templates: Vec<(String, String)> = TPLS
        .iter()
        .map(|(name, content)| (name.to_string(), content.to_string()))
        .collect();
    if let Some(dir) = user_template_dir {
        for (name, content) in load_user_templates(dir)? {
            templates.retain(|(existing, _)| *existing != name);
            templates.push((name, content));
        }
    }

    let mut tera = Tera::default();
    tera.autoescape_on(vec![".xml.tera"]);
    tera.set_escape_fn(xml_escape);
    tera.add_raw_templates(templates)
        .map_err(RenderError::Template)?;
    Ok(tera)
}

/// Whether `c` may appear in an XML 1.0 document.
fn is_xml_char(c: char) -> bool {
    matches!(c,
        '\t' | '\n' | '\r'
        | '\u{20}'..='\u{D7FF}'
        | '\u{E000}'..='\u{FFFD}'
        | '\u{10000}'..='\u{10FFFF}')
}

/// Replace characters XML 1.0 forbids (NUL, ESC and the other C0 controls,
/// U+FFFE, U+FFFF) with U+FFFD.
pub fn strip_invalid_xml_chars(input: &str) -> String {
    if input.chars().all(is_xml_char) {
        return input.to_string();
    }
    input
        .chars()
        .map(|c| if is_xml_char(c) { c } else { char::REPLACEMENT_CHARACTER })
        .collect()
}

/// Escape the five XML special characters.
pub fn xml_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Renderer
// ---------------------------------------------------------------------------

/// Renders change-log documents.
pub struct Renderer {
    tera: Tera,
}

impl Renderer {
    /// Renderer using the embedded template only.
    pub fn new() -> Result<Self, RenderError> {
        Self::with_templates(None)
    }

    /// Renderer with optional overrides loaded from `user_template_dir`.
    pub fn with_templates(user_template_dir: Option<&Path>) -> Result<Self, RenderError> {
        let tera = build_tera(user_template_dir)?;
        Ok(Renderer { tera })
    }

    pub fn render_context(&self, ctx: &ChangeLogContext) -> Result<String, RenderError> {
        let tera_ctx = ctx.to_tera_context()?;
        let rendered = self
            .tera
            .render(CHANGELOG_TEMPLATE, &tera_ctx)
            .map_err(|source| RenderError::Render {
                template: CHANGELOG_TEMPLATE.to_string(),
                source,
            })?;
        Ok(strip_invalid_xml_chars(&rendered.replace("\r\n", "\n")))
    }

    pub fn render_entries(&self, entries: &[ChangeLogEntry]) -> Result<String, RenderError> {
        self.render_context(&ChangeLogContext::from_entries(entries))
    }

    /// Render additions, updates, and deletions of `changes`.
    pub fn render_change_set(&self, changes: &ChangeSet) -> Result<String, RenderError> {
        self.render_context(&ChangeLogContext::from_change_set(changes))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
