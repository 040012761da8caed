//! Request and outcome types for upload sessions.

use chunkdrop_protocol::{Endpoint, FileRecord, UploadStatus};
use chunkdrop_transfer::UploadSource;

/// Everything needed to start one upload session.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// Session id; generated when `None`.
    pub id: Option<String>,
    pub file_name: String,
    pub content_type: String,
    pub source: UploadSource,
    pub endpoints: Vec<Endpoint>,
    /// Opaque caller metadata carried into the file record.
    pub metadata: serde_json::Value,
}

impl UploadRequest {
    pub fn new(file_name: impl Into<String>, source: UploadSource, endpoints: Vec<Endpoint>) -> Self {
        Self {
            id: None,
            file_name: file_name.into(),
            content_type: "application/octet-stream".into(),
            source,
            endpoints,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Terminal result of a session.
#[derive(Debug, Clone)]
pub enum UploadOutcome {
    /// Every chunk holds a descriptor.
    Completed {
        record: FileRecord,
        /// Set when the metadata store rejected the record.
        store_error: Option<String>,
    },
    /// At least one chunk exhausted its retries, or the session hit an
    /// infrastructure error.
    Failed {
        failed_chunks: Vec<usize>,
        error: Option<String>,
    },
    Cancelled,
}

impl UploadOutcome {
    pub fn status(&self) -> UploadStatus {
        match self {
            Self::Completed { .. } => UploadStatus::Completed,
            Self::Failed { .. } => UploadStatus::Failed,
            Self::Cancelled => UploadStatus::Cancelled,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    /// The file record of a completed session.
    pub fn record(&self) -> Option<&FileRecord> {
        match self {
            Self::Completed { record, .. } => Some(record),
            _ => None,
        }
    }
}
