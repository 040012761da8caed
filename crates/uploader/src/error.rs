//! Upload error types.

/// Errors surfaced to callers of the uploader.
///
/// Per-attempt transfer failures never appear here: the scheduler absorbs
/// them and reports only the session outcome.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session already registered: {0}")]
    DuplicateSession(String),

    #[error("configuration fault: {0}")]
    ConfigurationFault(String),

    #[error("transfer error: {0}")]
    Transfer(#[from] chunkdrop_transfer::TransferError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("metadata store error: {0}")]
    Store(String),

    #[error("session task failed: {0}")]
    Task(String),
}
