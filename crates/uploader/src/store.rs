//! Persistence hand-off for completed uploads.
//!
//! The uploader performs no durable writes of its own; once a session
//! completes, its [`FileRecord`] is passed to a [`MetadataStore`].

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use chunkdrop_protocol::FileRecord;
use reqwest::Url;
use serde::Serialize;
use tracing::debug;

use crate::error::UploadError;

/// Future returned by [`MetadataStore::store`].
pub type StoreFuture<'a> = Pin<Box<dyn Future<Output = Result<(), UploadError>> + Send + 'a>>;

/// Receives the reassembly record of every completed session.
pub trait MetadataStore: Send + Sync {
    fn store<'a>(&'a self, record: &'a FileRecord) -> StoreFuture<'a>;
}

// ---------------------------------------------------------------------------
// HttpMetadataStore
// ---------------------------------------------------------------------------

/// Body of `POST {api_url}/files/store`.
#[derive(Debug, Serialize)]
struct StoreFileRequest<'a> {
    name: &'a str,
    size: u64,
    #[serde(rename = "type")]
    content_type: &'a str,
    total_chunks: usize,
    chunks: Vec<StoreChunk<'a>>,
}

#[derive(Debug, Serialize)]
struct StoreChunk<'a> {
    chunk_number: usize,
    url: &'a str,
    url_expiry: Option<i64>,
}

/// Posts completed records to a file metadata API.
#[derive(Debug, Clone)]
pub struct HttpMetadataStore {
    http: reqwest::Client,
    api_url: String,
}

impl HttpMetadataStore {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    pub fn with_client(http: reqwest::Client, api_url: impl Into<String>) -> Self {
        Self {
            http,
            api_url: api_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn post_record(&self, record: &FileRecord) -> Result<(), UploadError> {
        let body = StoreFileRequest {
            name: &record.file_name,
            size: record.file_size,
            content_type: &record.content_type,
            total_chunks: record.total_chunks,
            chunks: record
                .chunks
                .iter()
                .map(|c| StoreChunk {
                    chunk_number: c.index,
                    url: &c.attachment.url,
                    url_expiry: url_expiry_ms(&c.attachment.url),
                })
                .collect(),
        };

        let url = format!("{}/files/store", self.api_url);
        debug!(upload_id = %record.id, chunks = record.total_chunks, "storing file metadata");

        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| UploadError::Store(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(UploadError::Store(format!("HTTP {}: {text}", status.as_u16())));
        }
        Ok(())
    }
}

impl MetadataStore for HttpMetadataStore {
    fn store<'a>(&'a self, record: &'a FileRecord) -> StoreFuture<'a> {
        Box::pin(self.post_record(record))
    }
}

/// Expiry of a signed attachment URL in Unix milliseconds.
///
/// Signed CDN URLs carry the expiry as a hex Unix timestamp in the `ex`
/// query parameter.
pub fn url_expiry_ms(url: &str) -> Option<i64> {
    let url = Url::parse(url).ok()?;
    let (_, ex) = url.query_pairs().find(|(k, _)| k == "ex")?;
    let secs = i64::from_str_radix(&ex, 16).ok()?;
    secs.checked_mul(1000)
}

// ---------------------------------------------------------------------------
// JsonFileStore
// ---------------------------------------------------------------------------

/// Writes each record as pretty-printed JSON to a fixed path.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn write_record(&self, record: &FileRecord) -> Result<(), UploadError> {
        let json = serde_json::to_string_pretty(record)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, json).await?;
        debug!(upload_id = %record.id, path = %self.path.display(), "file record written");
        Ok(())
    }
}

impl MetadataStore for JsonFileStore {
    fn store<'a>(&'a self, record: &'a FileRecord) -> StoreFuture<'a> {
        Box::pin(self.write_record(record))
    }
}
