//! Error types for wire decoding.

use thiserror::Error;

/// Result type for wire decoding.
pub type WireResult<T> = Result<T, WireError>;

/// Errors raised while decoding remote payloads.
#[derive(Debug, Error)]
pub enum WireError {
    /// The body is not valid JSON.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The payload is JSON but does not have the expected structure.
    #[error("invalid structure: {0}")]
    InvalidStructure(String),

    /// An event carries a timestamp that cannot be parsed.
    #[error("event {id:?} has unparsable timestamp {value:?}")]
    InvalidTimestamp {
        /// Id of the offending event (may be empty).
        id: String,
        /// Raw timestamp text.
        value: String,
    },
}

impl WireError {
    /// Creates an invalid structure error.
    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self::InvalidStructure(message.into())
    }
}
