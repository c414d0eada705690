//! # teamsync-renderer
//!
//! Tera-based rendering of the change-log document from a [`ChangeSet`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use teamsync_core::ChangeSet;
//! use teamsync_renderer::Renderer;
//!
//! fn render(changes: &ChangeSet) {
//!     if let Ok(renderer) = Renderer::new() {
//!         if let Ok(xml) = renderer.render_change_set(changes) {
//!             println!("{} bytes", xml.len());
//!         }
//!     }
//! }
//! ```
//!
//! [`ChangeSet`]: teamsync_core::ChangeSet

pub mod context;
pub mod engine;
pub mod error;

pub use context::ChangeLogContext;
pub use engine::{strip_invalid_xml_chars, xml_escape, Renderer, CHANGELOG_TEMPLATE};
pub use error::RenderError;
