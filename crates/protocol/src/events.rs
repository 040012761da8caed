//! Events emitted by an upload session, one per transition.

use serde::{Deserialize, Serialize};

use crate::types::AttachmentDescriptor;

/// Upload lifecycle event.
///
/// Serialized as `{"type": "started", "sessionId": ..., ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum UploadEvent {
    Started {
        session_id: String,
        total_chunks: usize,
        file_name: String,
        file_size: u64,
    },
    /// Emitted after every chunk completion.
    Progress {
        session_id: String,
        percent: u8,
        completed_chunks: usize,
        total_chunks: usize,
        throughput_bytes_per_sec: f64,
        /// `None` until at least one chunk has a recorded timing.
        eta_seconds: Option<f64>,
        current_chunk_index: usize,
    },
    /// Throttled byte-level progress of one in-flight chunk.
    ChunkProgress {
        session_id: String,
        chunk_index: usize,
        bytes_sent: u64,
        total_bytes: u64,
        bytes_per_sec: f64,
    },
    Completed {
        session_id: String,
        duration_ms: u64,
        ordered_attachments: Vec<AttachmentDescriptor>,
    },
    Failed {
        session_id: String,
        permanently_failed_chunk_indices: Vec<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Cancelled {
        session_id: String,
    },
}

impl UploadEvent {
    /// Returns the session the event belongs to.
    pub fn session_id(&self) -> &str {
        match self {
            Self::Started { session_id, .. }
            | Self::Progress { session_id, .. }
            | Self::ChunkProgress { session_id, .. }
            | Self::Completed { session_id, .. }
            | Self::Failed { session_id, .. }
            | Self::Cancelled { session_id } => session_id,
        }
    }

    /// Returns `true` for `completed`, `failed` and `cancelled`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Failed { .. } | Self::Cancelled { .. }
        )
    }
}
