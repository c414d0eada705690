//! Checkout configuration.
//!
//! # Storage layout
//!
//! ```text
//! ~/.teamsync/
//!   runs/
//!     <build>/
//!       filepoints.json
//!       changelog.xml
//! ```
//!
//! The configuration itself is a YAML file passed explicitly; `state_dir`
//! defaults to `~/.teamsync`.
//!
//! # API pattern
//!
//! Functions that need the home directory have two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{io_err, ConfigError};

/// Environment variable consulted when the config carries no password.
pub const PASSWORD_ENV: &str = "TEAMSYNC_PASSWORD";

/// Placeholder replaced by the build number in label names.
pub const BUILD_PLACEHOLDER: &str = "{build}";

// ---------------------------------------------------------------------------
// Connection parameters
// ---------------------------------------------------------------------------

/// Retry settings for connection establishment only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_ms: 500,
        }
    }
}

/// Everything needed to open a repository session. Plain data, safe to ship
/// to another host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_port: Option<u16>,
    pub user: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_scheme")]
    pub scheme: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_scheme() -> String {
    "http".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl ConnectionParams {
    /// `scheme://host:port`
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }

    /// Base URL of the content agent, when both agent host and port are set.
    pub fn agent_url(&self) -> Option<String> {
        match (&self.agent_host, self.agent_port) {
            (Some(host), Some(port)) if !host.trim().is_empty() && port != 0 => {
                Some(format!("{}://{}:{}", self.scheme, host.trim(), port))
            }
            _ => None,
        }
    }

    /// Configured password, or the `TEAMSYNC_PASSWORD` environment variable.
    pub fn resolved_password(&self) -> String {
        self.password
            .clone()
            .or_else(|| std::env::var(PASSWORD_ENV).ok())
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// View selection
// ---------------------------------------------------------------------------

/// Which point in the view's history to check out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViewSelector {
    /// Tip of the view.
    #[default]
    Current,
    /// A view label; `{build}` in the name is replaced by the build number.
    Label { name: String },
    /// The label currently attached to a promotion state.
    PromotionState { name: String },
    /// The view as it was at a point in time.
    AsOf { time: DateTime<Utc> },
}

impl ViewSelector {
    /// Substitute the build number into label names.
    pub fn resolve(&self, build: i64) -> ViewSelector {
        match self {
            ViewSelector::Label { name } => ViewSelector::Label {
                name: name.replace(BUILD_PLACEHOLDER, &build.to_string()),
            },
            other => other.clone(),
        }
    }

    /// Compact form used as the `select` query parameter.
    pub fn query_value(&self) -> String {
        match self {
            ViewSelector::Current => "current".to_string(),
            ViewSelector::Label { name } => format!("label:{name}"),
            ViewSelector::PromotionState { name } => format!("promotion:{name}"),
            ViewSelector::AsOf { time } => format!("asof:{}", time.to_rfc3339()),
        }
    }
}

/// Project / view / folder selection on the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub project: String,
    pub view: String,
    #[serde(default)]
    pub folder: String,
    #[serde(default)]
    pub selector: ViewSelector,
}

/// What to do when there is no previous FilePoint collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BaselinePolicy {
    /// Skip change computation; the change log is the empty document.
    #[default]
    SkipWhenAbsent,
    /// Treat every remote file as an addition.
    FullCheckout,
}

// ---------------------------------------------------------------------------
// CheckoutConfig
// ---------------------------------------------------------------------------

/// Root of the YAML checkout configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutConfig {
    pub server: ConnectionParams,
    pub project: String,
    pub view: String,
    #[serde(default)]
    pub folder: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subfolder: Option<String>,
    #[serde(default)]
    pub cleanup: bool,
    #[serde(default)]
    pub view_selector: ViewSelector,
    #[serde(default)]
    pub baseline: BaselinePolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,
    /// Directory holding a `changelog.xml.tera` that replaces the built-in one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changelog_templates: Option<PathBuf>,
}

impl CheckoutConfig {
    pub fn selection(&self) -> Selection {
        Selection {
            project: self.project.clone(),
            view: self.view.clone(),
            folder: self.folder.clone(),
            selector: self.view_selector.clone(),
        }
    }

    /// Configured state directory, or `<home>/.teamsync`.
    pub fn state_dir_at(&self, home: &Path) -> PathBuf {
        self.state_dir
            .clone()
            .unwrap_or_else(|| default_state_dir_at(home))
    }

    /// `state_dir_at` convenience wrapper.
    pub fn state_dir(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.state_dir_at(&home()?))
    }

    /// Subfolder with surrounding whitespace removed; `None` when blank.
    pub fn trimmed_subfolder(&self) -> Option<String> {
        self.subfolder
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.server.host.trim().is_empty() {
            return Err(ConfigError::Invalid("server.host must not be empty".into()));
        }
        if self.server.port == 0 {
            return Err(ConfigError::Invalid("server.port must not be 0".into()));
        }
        if self.project.trim().is_empty() {
            return Err(ConfigError::Invalid("project must not be empty".into()));
        }
        if self.view.trim().is_empty() {
            return Err(ConfigError::Invalid("view must not be empty".into()));
        }
        if self.server.retry.attempts == 0 {
            return Err(ConfigError::Invalid(
                "server.retry.attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// `<home>/.teamsync`
pub fn default_state_dir_at(home: &Path) -> PathBuf {
    home.join(".teamsync")
}

/// Load and validate a checkout configuration.
///
/// Returns `ConfigError::NotFound` if absent,
/// `ConfigError::Parse` (with path + line context) if malformed YAML.
pub fn load_at(path: &Path) -> Result<CheckoutConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config: CheckoutConfig =
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    config.validate()?;
    Ok(config)
}

/// Atomically write a configuration as YAML.
///
/// Write flow: serialize, `<name>.tmp` sibling, `chmod 0600` (the file may
/// carry a password), `rename`.
pub fn save_at(path: &Path, config: &CheckoutConfig) -> Result<(), ConfigError> {
    let yaml = serde_yaml::to_string(config).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, yaml).map_err(|e| io_err(&tmp, e))?;
    set_file_permissions(&tmp)?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(path, e));
    }
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MINIMAL: &str = r#"
server:
  host: scm.example.com
  port: 49201
  user: builder
project: Payments
view: Mainline
"#;

    #[test]
    fn minimal_config_fills_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("checkout.yaml");
        std::fs::write(&path, MINIMAL).unwrap();

        let config = load_at(&path).expect("load");
        assert_eq!(config.server.scheme, "http");
        assert_eq!(config.server.timeout_secs, 30);
        assert_eq!(config.server.retry, RetryPolicy::default());
        assert_eq!(config.view_selector, ViewSelector::Current);
        assert_eq!(config.baseline, BaselinePolicy::SkipWhenAbsent);
        assert!(!config.cleanup);
        assert_eq!(config.folder, "");
    }

    #[test]
    fn missing_file_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let err = load_at(&tmp.path().join("nope.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[test]
    fn zero_port_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("checkout.yaml");
        std::fs::write(&path, MINIMAL.replace("49201", "0")).unwrap();
        let err = load_at(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn label_selector_substitutes_build_number() {
        let selector = ViewSelector::Label {
            name: "nightly-{build}".into(),
        };
        assert_eq!(
            selector.resolve(42),
            ViewSelector::Label {
                name: "nightly-42".into()
            }
        );
        assert_eq!(selector.resolve(7).query_value(), "label:nightly-7");
        assert_eq!(ViewSelector::Current.resolve(7), ViewSelector::Current);
    }

    #[test]
    fn agent_url_requires_host_and_port() {
        let mut params = ConnectionParams {
            host: "scm".into(),
            port: 1,
            agent_host: Some("cache".into()),
            agent_port: None,
            user: "u".into(),
            password: None,
            scheme: "http".into(),
            timeout_secs: 5,
            retry: RetryPolicy::default(),
        };
        assert!(params.agent_url().is_none());
        params.agent_port = Some(8080);
        assert_eq!(params.agent_url().as_deref(), Some("http://cache:8080"));
        assert_eq!(params.base_url(), "http://scm:1");
    }

    #[test]
    fn state_dir_defaults_under_home() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("checkout.yaml");
        std::fs::write(&path, MINIMAL).unwrap();
        let config = load_at(&path).unwrap();
        assert_eq!(config.state_dir_at(tmp.path()), tmp.path().join(".teamsync"));
    }

    #[test]
    fn blank_subfolder_is_none() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("checkout.yaml");
        std::fs::write(&path, format!("{MINIMAL}subfolder: \"  \"\n")).unwrap();
        let config = load_at(&path).unwrap();
        assert!(config.trimmed_subfolder().is_none());
    }
}
