use std::path::PathBuf;

use bytes::Bytes;

use crate::TransferError;
use crate::chunked::ChunkReader;

/// A half-open byte range `[start, end)` of the source, identified by its
/// 0-based position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    pub index: usize,
    pub start: u64,
    pub end: u64,
}

impl ChunkSpan {
    /// Length of the span in bytes.
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// A chunk with its bytes loaded, ready to be sent.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub index: usize,
    /// Byte offset within the source.
    pub offset: u64,
    /// Raw chunk data.
    pub data: Bytes,
    /// SHA-256 hex checksum of `data`.
    pub checksum: String,
}

impl Chunk {
    /// Size of this chunk in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Where the bytes of an upload come from.
///
/// File sources are read lazily, one span at a time, so memory stays
/// bounded by the number of in-flight chunks.
#[derive(Debug, Clone)]
pub enum UploadSource {
    Bytes(Bytes),
    File(PathBuf),
}

impl UploadSource {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self::Bytes(data.into())
    }

    /// Total size of the source in bytes.
    pub async fn len(&self) -> Result<u64, TransferError> {
        match self {
            Self::Bytes(data) => Ok(data.len() as u64),
            Self::File(path) => Ok(tokio::fs::metadata(path).await?.len()),
        }
    }

    /// Loads the bytes of `span` and checksums them off the async runtime.
    pub async fn load(&self, span: ChunkSpan) -> Result<Chunk, TransferError> {
        let source = self.clone();
        tokio::task::spawn_blocking(move || match source {
            UploadSource::Bytes(data) => {
                let (start, end) = (span.start as usize, span.end as usize);
                if end > data.len() {
                    return Err(TransferError::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        format!("span {}..{} exceeds source of {} bytes", start, end, data.len()),
                    )));
                }
                let slice = data.slice(start..end);
                Ok(Chunk {
                    index: span.index,
                    offset: span.start,
                    checksum: crate::checksum_bytes(&slice),
                    data: slice,
                })
            }
            UploadSource::File(path) => ChunkReader::open(&path)?.read_span(span),
        })
        .await
        .map_err(|e| TransferError::Io(std::io::Error::other(format!("task join error: {e}"))))?
    }
}
