//! HTTP connector for a repository server.
//!
//! Endpoints, relative to `scheme://host:port`:
//!
//! ```text
//! GET /api/session                                              auth check
//! GET /api/projects/{project}/views/{view}/tree?folder=&select=  JSON RemoteNode
//! GET /api/projects/{project}/views/{view}/files/{path}?folder=&select=  raw bytes
//! ```
//!
//! File content comes from the agent host when one is configured. 404 and
//! 410 on a file fetch are file-level failures; anything else is a
//! connection failure.

use std::io::Read;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine};
use url::Url;

use teamsync_core::{ConnectionParams, RemoteNode, Selection};

use crate::session::{Connector, Session, SessionError};

/// Opens sessions against a live server.
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpConnector;

impl HttpConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for HttpConnector {
    fn connect(
        &self,
        params: &ConnectionParams,
        selection: &Selection,
    ) -> Result<Box<dyn Session>, SessionError> {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(params.timeout_secs.max(1)))
            .build();
        let auth = basic_auth(&params.user, &params.resolved_password());
        let base = parse_base(&params.base_url())?;
        let content_base = match params.agent_url() {
            Some(agent_url) => parse_base(&agent_url)?,
            None => base.clone(),
        };

        let url = endpoint(&base, &["api", "session"])?;
        match agent.get(url.as_str()).set("Authorization", &auth).call() {
            Ok(_) => {}
            Err(ureq::Error::Status(code @ (401 | 403), _)) => {
                return Err(SessionError::Connection(format!(
                    "authentication rejected for user {} (HTTP {code})",
                    params.user
                )))
            }
            Err(err) => return Err(connection_error(&url, err)),
        }

        Ok(Box::new(HttpSession {
            agent,
            auth,
            base,
            content_base,
            selection: selection.clone(),
        }))
    }
}

struct HttpSession {
    agent: ureq::Agent,
    auth: String,
    base: Url,
    content_base: Url,
    selection: Selection,
}

impl HttpSession {
    fn view_url(&self, base: &Url, tail: &[&str]) -> Result<Url, SessionError> {
        let mut segments = vec![
            "api",
            "projects",
            self.selection.project.as_str(),
            "views",
            self.selection.view.as_str(),
        ];
        segments.extend_from_slice(tail);
        let mut url = endpoint(base, &segments)?;
        url.query_pairs_mut()
            .append_pair("folder", &self.selection.folder)
            .append_pair("select", &self.selection.selector.query_value());
        Ok(url)
    }

    fn get(&self, url: &Url) -> Result<ureq::Response, ureq::Error> {
        self.agent
            .get(url.as_str())
            .set("Authorization", &self.auth)
            .call()
    }
}

impl Session for HttpSession {
    fn tree(&mut self) -> Result<RemoteNode, SessionError> {
        let url = self.view_url(&self.base, &["tree"])?;
        let response = self.get(&url).map_err(|err| connection_error(&url, err))?;
        response
            .into_json::<RemoteNode>()
            .map_err(|err| SessionError::Connection(format!("malformed tree from {url}: {err}")))
    }

    fn fetch(&mut self, path: &str) -> Result<Vec<u8>, SessionError> {
        let mut tail = vec!["files"];
        tail.extend(path.split('/').filter(|s| !s.is_empty()));
        let url = self.view_url(&self.content_base, &tail)?;

        let response = match self.get(&url) {
            Ok(response) => response,
            Err(ureq::Error::Status(code @ (404 | 410), _)) => {
                return Err(SessionError::File {
                    path: path.to_string(),
                    reason: format!("HTTP {code}"),
                })
            }
            Err(err) => return Err(connection_error(&url, err)),
        };

        let mut bytes = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut bytes)
            .map_err(|err| SessionError::Connection(format!("reading {url}: {err}")))?;
        Ok(bytes)
    }

    fn close(&mut self) {
        // ureq keeps no server-side session; dropping the agent releases the pool.
        tracing::debug!("closing session to {}", self.base);
    }
}

fn basic_auth(user: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{user}:{password}")))
}

fn parse_base(raw: &str) -> Result<Url, SessionError> {
    Url::parse(raw).map_err(|err| SessionError::Connection(format!("invalid server url {raw}: {err}")))
}

fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, SessionError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| SessionError::Connection(format!("{base} cannot be a base url")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn connection_error(url: &Url, err: ureq::Error) -> SessionError {
    match err {
        ureq::Error::Status(code, _) => {
            SessionError::Connection(format!("{url} answered HTTP {code}"))
        }
        ureq::Error::Transport(transport) => {
            SessionError::Connection(format!("{url}: {transport}"))
        }
    }
}
