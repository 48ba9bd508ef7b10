//! Error types for the remote client.

use std::time::Duration;
use studysync_protocol::WireError;
use thiserror::Error;

/// Result type for remote client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Classified failures of a remote request.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The credential was rejected (401/403).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The study or endpoint does not exist (404).
    #[error("not found: {0}")]
    NotFound(String),

    /// The server asked us to slow down (429).
    #[error("rate limited by remote service")]
    RateLimited {
        /// Delay requested through `Retry-After`, if any.
        retry_after: Option<Duration>,
    },

    /// The request never produced an HTTP response.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the request hit its timeout.
        timed_out: bool,
    },

    /// The server failed to handle the request (5xx).
    #[error("server error ({status}): {message}")]
    ServerError {
        /// HTTP status code.
        status: u16,
        /// Response body excerpt.
        message: String,
    },

    /// The server rejected the request with another 4xx status.
    #[error("request rejected ({status}): {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body excerpt.
        message: String,
    },

    /// The response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] WireError),

    /// The client configuration is unusable.
    #[error("invalid client configuration: {0}")]
    InvalidConfig(String),
}

impl ClientError {
    /// Creates a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            timed_out: false,
        }
    }

    /// Creates a transport error for a timed out request.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            timed_out: true,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Transport { .. }
                | ClientError::ServerError { .. }
                | ClientError::RateLimited { .. }
        )
    }

    /// Returns true for credential failures.
    pub fn is_auth(&self) -> bool {
        matches!(self, ClientError::Unauthorized(_))
    }
}
