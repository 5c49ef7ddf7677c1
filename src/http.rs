//! Blocking HTTP access used by both pipeline stages.
//!
//! The stages only see the [`HttpClient`] trait, so tests can script responses
//! without a network. [`UreqClient`] is the production implementation.

use crate::config::AppConfig;
use std::time::Duration;
use thiserror::Error;

/// User agent sent with every request.
pub const USER_AGENT: &str = concat!("PhoneLookupTool/", env!("CARGO_PKG_VERSION"));

/// Failure of a single GET request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HttpError {
    /// The per-request timeout elapsed.
    #[error("request timed out")]
    Timeout,

    /// The server answered with a non-success status code.
    #[error("HTTP status {0}")]
    Status(u16),

    /// Connection, TLS, DNS or body read failure.
    #[error("transport error: {0}")]
    Transport(String),
}

impl HttpError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, HttpError::Timeout)
    }
}

impl From<ureq::Error> for HttpError {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::Timeout(_) => HttpError::Timeout,
            ureq::Error::StatusCode(code) => HttpError::Status(code),
            ureq::Error::Io(e) if e.kind() == std::io::ErrorKind::TimedOut => HttpError::Timeout,
            other => HttpError::Transport(other.to_string()),
        }
    }
}

/// Minimal GET-only client. Success means a 2xx status; the body is returned
/// fully read.
pub trait HttpClient {
    fn get(
        &self,
        url: &str,
        query: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<Vec<u8>, HttpError>;
}

/// Opens the HTTP session a single stage run uses. The session, and any
/// connection pool behind it, is dropped when that run ends.
pub trait Connector {
    fn connect(&self) -> Box<dyn HttpClient + '_>;
}

/// Opens a fresh [`UreqClient`] per stage run.
pub struct UreqConnector {
    pub timeout: Duration,
    /// Keep one connection pool for the whole run
    pub reuse_connections: bool,
}

impl UreqConnector {
    /// Connection reuse follows `enable_cache`.
    pub fn new(config: &AppConfig) -> Self {
        Self {
            timeout: config.request_timeout(),
            reuse_connections: config.enable_cache,
        }
    }
}

impl Connector for UreqConnector {
    fn connect(&self) -> Box<dyn HttpClient + '_> {
        Box::new(UreqClient::new(self.timeout, self.reuse_connections))
    }
}

/// `ureq`-backed client with a global per-request timeout.
///
/// With `reuse_connections` the same agent (and its connection pool) serves
/// every request; otherwise each request gets a fresh agent.
pub struct UreqClient {
    timeout: Duration,
    shared: Option<ureq::Agent>,
}

impl UreqClient {
    pub fn new(timeout: Duration, reuse_connections: bool) -> Self {
        let shared = reuse_connections.then(|| build_agent(timeout));
        Self { timeout, shared }
    }
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}

impl HttpClient for UreqClient {
    fn get(
        &self,
        url: &str,
        query: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> Result<Vec<u8>, HttpError> {
        let fresh;
        let agent = match &self.shared {
            Some(agent) => agent,
            None => {
                fresh = build_agent(self.timeout);
                &fresh
            }
        };

        let mut request = agent.get(url).header("User-Agent", USER_AGENT);
        for (key, value) in query {
            request = request.query(*key, *value);
        }
        for (key, value) in headers {
            request = request.header(*key, *value);
        }

        let body = request.call()?.body_mut().read_to_vec()?;
        Ok(body)
    }
}
