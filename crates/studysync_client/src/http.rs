//! HTTP transport.
//!
//! The HTTP stack is abstracted behind [`HttpClient`] so the retry and
//! classification logic in [`crate::ApiClient`] can be exercised without a
//! network. [`ReqwestClient`] is the production implementation.

use crate::error::{ClientError, ClientResult};
use reqwest::header::RETRY_AFTER;
use std::time::Duration;

/// A single GET request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// Absolute URL without query string.
    pub url: String,
    /// Query parameters.
    pub query: Vec<(String, String)>,
    /// Bearer credential.
    pub bearer: String,
    /// Request timeout.
    pub timeout: Duration,
}

/// The parts of an HTTP response the client needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Parsed `Retry-After` header (seconds form only).
    pub retry_after: Option<Duration>,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response with a body and no headers.
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            retry_after: None,
            body: body.into(),
        }
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP client abstraction.
///
/// Implementations only report failures that happened before a response
/// was received, as [`ClientError::Transport`]. Any HTTP status, including
/// errors, is returned as an [`HttpResponse`].
pub trait HttpClient: Send + Sync {
    /// Sends a GET request.
    fn get(&self, request: &HttpRequest) -> ClientResult<HttpResponse>;
}

/// Blocking `reqwest` implementation of [`HttpClient`].
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    inner: reqwest::blocking::Client,
}

impl ReqwestClient {
    /// Builds a client with the crate user agent.
    pub fn new() -> ClientResult<Self> {
        let inner = reqwest::blocking::Client::builder()
            .user_agent(concat!("studysync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ClientError::InvalidConfig(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { inner })
    }
}

impl HttpClient for ReqwestClient {
    fn get(&self, request: &HttpRequest) -> ClientResult<HttpResponse> {
        let response = self
            .inner
            .get(&request.url)
            .query(&request.query)
            .bearer_auth(&request.bearer)
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(request.timeout)
            .send()
            .map_err(classify_reqwest_error)?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);

        // A body cut off by the timeout is as transient as a failed connect.
        let body = response.bytes().map_err(classify_reqwest_error)?.to_vec();

        Ok(HttpResponse {
            status,
            retry_after,
            body,
        })
    }
}

fn classify_reqwest_error(err: reqwest::Error) -> ClientError {
    if err.is_timeout() {
        ClientError::timeout(err.to_string())
    } else if err.is_builder() {
        ClientError::InvalidConfig(err.to_string())
    } else {
        ClientError::transport(err.to_string())
    }
}
