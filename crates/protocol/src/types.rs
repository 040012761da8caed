use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One upload sink in the endpoint pool.
///
/// The URL is a credential (webhook URLs embed their token), so it is
/// never logged; use `id` in log fields instead.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: String,
    pub url: String,
}

impl Endpoint {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
        }
    }
}

/// Remote metadata for one successfully uploaded chunk.
///
/// Field names follow the attachment objects returned by the remote, so
/// the struct deserializes straight out of a webhook response. `index`
/// is stamped by the transfer unit, not by the remote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentDescriptor {
    #[serde(default)]
    pub index: usize,
    pub id: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub proxy_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub filename: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waveform: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ephemeral: bool,
}

/// Lifecycle state of an upload session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "in_progress")]
    InProgress,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "cancelled")]
    Cancelled,
}

impl UploadStatus {
    /// Terminal states are absorbing.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Point-in-time view of a session, published by its coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadProgress {
    pub upload_id: String,
    pub status: UploadStatus,
    pub file_name: String,
    pub file_size: u64,
    pub total_chunks: usize,
    pub completed_chunks: usize,
    /// Bytes of completed chunks plus bytes reported by in-flight units.
    pub transferred_bytes: u64,
    pub percent: u8,
    pub throughput_bytes_per_sec: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_chunks: Vec<usize>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl UploadProgress {
    /// Returns a pending snapshot for a freshly registered session.
    pub fn pending(upload_id: &str, file_name: &str, file_size: u64, total_chunks: usize) -> Self {
        Self {
            upload_id: upload_id.to_string(),
            status: UploadStatus::Pending,
            file_name: file_name.to_string(),
            file_size,
            total_chunks,
            completed_chunks: 0,
            transferred_bytes: 0,
            percent: 0,
            throughput_bytes_per_sec: 0.0,
            eta_seconds: None,
            failed_chunks: Vec::new(),
            error: String::new(),
        }
    }
}

/// A chunk entry in the final file record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredChunk {
    pub index: usize,
    /// SHA-256 hex digest of the chunk bytes as sent.
    pub checksum: String,
    pub attachment: AttachmentDescriptor,
}

/// The reassembly record handed to the metadata store after completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: String,
    pub file_name: String,
    pub file_size: u64,
    pub content_type: String,
    pub uploaded_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub total_chunks: usize,
    /// Ordered by chunk index.
    pub chunks: Vec<StoredChunk>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
}
