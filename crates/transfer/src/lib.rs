//! Chunked transfer primitives: splitting a source into chunks, pooling
//! upload endpoints, and running one chunk upload against one endpoint.

mod chunked;
mod pool;
mod progress;
mod types;
mod unit;
mod validation;
mod webhook;

use std::time::Duration;

pub use chunked::{ChunkReader, checksum_bytes, split};
pub use pool::EndpointPool;
pub use progress::{
    ByteProgress, DEFAULT_PROGRESS_INTERVAL, ProgressCallback, ProgressReporter, ProgressThrottle,
    ThroughputStats,
};
pub use types::{Chunk, ChunkSpan, UploadSource};
pub use unit::{AttemptReport, ChunkSink, SinkFuture, attempt};
pub use validation::{validate_endpoint, validate_endpoints};
pub use webhook::WebhookSink;

/// Default chunk size: 9 MiB.
///
/// Kept below the 10 MiB attachment limit that webhook endpoints apply
/// to unauthenticated uploads.
pub const DEFAULT_CHUNK_SIZE: usize = 9 * 1024 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("input is empty")]
    EmptyInput,

    #[error("no endpoints available")]
    NoEndpoints,

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("endpoint not checked out of the pool: {0}")]
    UnknownEndpoint(String),

    #[error("failed to build request: {0}")]
    Request(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("endpoint rejected upload with status {status}: {body}")]
    EndpointRejected { status: u16, body: String },

    #[error("malformed endpoint response: {0}")]
    ResponseParse(String),

    #[error("transfer aborted")]
    Aborted,

    #[error("transfer timed out after {0:?}")]
    TimedOut(Duration),
}

impl TransferError {
    /// Returns `true` for failures scoped to a single attempt, which the
    /// scheduler absorbs through its retry policy.
    pub fn is_attempt_error(&self) -> bool {
        matches!(
            self,
            Self::Network(_)
                | Self::EndpointRejected { .. }
                | Self::ResponseParse(_)
                | Self::Aborted
                | Self::TimedOut(_)
        )
    }

    /// Short stable label for structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::EmptyInput => "empty_input",
            Self::NoEndpoints => "no_endpoints",
            Self::InvalidEndpoint(_) => "invalid_endpoint",
            Self::UnknownEndpoint(_) => "unknown_endpoint",
            Self::Request(_) => "request",
            Self::Network(_) => "network",
            Self::EndpointRejected { .. } => "endpoint_rejected",
            Self::ResponseParse(_) => "response_parse",
            Self::Aborted => "aborted",
            Self::TimedOut(_) => "timed_out",
        }
    }
}
