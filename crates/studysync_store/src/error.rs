//! Error types for the local store.

use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the local store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A sidecar or event record could not be (de)serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A CSV event file could not be read or written.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// The SQLite backend failed.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Persisted data is unreadable.
    #[error("store corrupted: {0}")]
    Corrupted(String),

    /// Another handle holds the study lock.
    #[error("study '{0}' is locked by another operation")]
    StudyLocked(String),

    /// The study name cannot be used as a directory name.
    #[error("invalid study name: {0:?}")]
    InvalidStudyName(String),

    /// The directory exists but holds no studysync data.
    #[error("'{0}' does not look like a studysync study")]
    NotAStudy(String),

    /// A configuration value could not be parsed.
    #[error("invalid store configuration: {0}")]
    InvalidConfig(String),
}

impl StoreError {
    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted(message.into())
    }
}
