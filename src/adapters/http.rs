//! Low-level JSON request helper shared by the marketplace and completion
//! clients.
//!
//! Every request carries its own timeout. The body is read as text and
//! parsed as JSON (an empty body is `{}`); any non-2xx status becomes
//! [`RemoteError::Status`] with a truncated copy of the body.

use std::path::PathBuf;
use std::time::Duration;

use reqwest::Method;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Response bodies are cut to this many characters in error messages
const ERROR_BODY_LIMIT: usize = 500;

/// Errors from remote HTTP services
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("{service} request to {url} timed out after {}ms", timeout.as_millis())]
    Timeout {
        service: &'static str,
        url: String,
        timeout: Duration,
    },

    #[error("{service} request to {url} failed: {source}")]
    Transport {
        service: &'static str,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{service} request failed ({status}): {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("{service} returned invalid JSON: {source}")]
    InvalidJson {
        service: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{service}: {message}")]
    Protocol {
        service: &'static str,
        message: String,
    },
}

/// JSON client for one remote service, with optional bearer auth
#[derive(Debug, Clone)]
pub struct JsonClient {
    service: &'static str,
    bearer: Option<String>,
    client: reqwest::Client,
}

impl JsonClient {
    pub fn new(service: &'static str, bearer: Option<String>) -> Self {
        Self {
            service,
            bearer,
            client: reqwest::Client::new(),
        }
    }

    pub fn service(&self) -> &'static str {
        self.service
    }

    pub fn has_credential(&self) -> bool {
        self.bearer.as_deref().is_some_and(|k| !k.is_empty())
    }

    /// Send a request and parse the JSON response
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        timeout: Duration,
    ) -> Result<Value, RemoteError> {
        debug!(service = self.service, %method, url, "Sending request");

        let mut builder = self
            .client
            .request(method, url)
            .header("Accept", "application/json")
            .timeout(timeout);

        if let Some(key) = self.bearer.as_deref().filter(|k| !k.is_empty()) {
            builder = builder.bearer_auth(key);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| self.transport_error(url, timeout, e))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| self.transport_error(url, timeout, e))?;

        if !status.is_success() {
            return Err(RemoteError::Status {
                service: self.service,
                status: status.as_u16(),
                body: truncate_chars(&text, ERROR_BODY_LIMIT),
            });
        }

        parse_body(&text).map_err(|source| RemoteError::InvalidJson {
            service: self.service,
            source,
        })
    }

    /// Build a protocol error tagged with this service
    pub fn protocol_error(&self, message: impl Into<String>) -> RemoteError {
        RemoteError::Protocol {
            service: self.service,
            message: message.into(),
        }
    }

    fn transport_error(&self, url: &str, timeout: Duration, source: reqwest::Error) -> RemoteError {
        if source.is_timeout() {
            RemoteError::Timeout {
                service: self.service,
                url: url.to_string(),
                timeout,
            }
        } else {
            RemoteError::Transport {
                service: self.service,
                url: url.to_string(),
                source,
            }
        }
    }
}

/// Parse a response body; whitespace-only bodies are an empty object
pub fn parse_body(text: &str) -> serde_json::Result<Value> {
    if text.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(text)
}

/// Keep at most `limit` characters
pub fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
