//! Error types for the sync engine.

use studysync_client::ClientError;
use studysync_store::StoreError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can end a sync run.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Missing or invalid configuration or credential.
    #[error("configuration error: {0}")]
    Config(String),

    /// The network kept failing after the retry budget was spent.
    #[error("network error: {0}")]
    TransientNetwork(String),

    /// The remote rejected the credential.
    #[error("authentication failed: {0}")]
    RemoteAuth(String),

    /// The study does not exist remotely.
    #[error("not found on remote: {0}")]
    RemoteNotFound(String),

    /// The remote answered with something we cannot use.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Local disk failure.
    #[error("storage error: {0}")]
    StorageIo(#[source] StoreError),

    /// Another sync or delete holds the study.
    #[error("a sync is already running for study '{0}'")]
    ConcurrentSync(String),

    /// The caller cancelled the run.
    #[error("sync cancelled")]
    Cancelled,
}

impl SyncError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            SyncError::Config(_) => 2,
            SyncError::RemoteAuth(_) => 3,
            SyncError::RemoteNotFound(_) => 4,
            SyncError::TransientNetwork(_) => 5,
            SyncError::Protocol(_) => 6,
            SyncError::StorageIo(_) => 7,
            SyncError::ConcurrentSync(_) => 8,
            SyncError::Cancelled => 130,
        }
    }

    /// Returns true if running the sync again later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SyncError::TransientNetwork(_) | SyncError::ConcurrentSync(_) | SyncError::Cancelled
        )
    }
}

impl From<ClientError> for SyncError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Unauthorized(message) => SyncError::RemoteAuth(message),
            ClientError::NotFound(what) => SyncError::RemoteNotFound(what),
            ClientError::InvalidConfig(message) => SyncError::Config(message),
            err @ (ClientError::Rejected { .. } | ClientError::Decode(_)) => {
                SyncError::Protocol(err.to_string())
            }
            err @ (ClientError::RateLimited { .. }
            | ClientError::Transport { .. }
            | ClientError::ServerError { .. }) => SyncError::TransientNetwork(err.to_string()),
        }
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::StudyLocked(study) => SyncError::ConcurrentSync(study),
            StoreError::InvalidStudyName(name) => {
                SyncError::Config(format!("invalid study name: {name:?}"))
            }
            StoreError::InvalidConfig(message) => SyncError::Config(message),
            err => SyncError::StorageIo(err),
        }
    }
}
