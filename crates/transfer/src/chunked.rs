use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use bytes::Bytes;
use sha2::{Digest, Sha256};

use crate::TransferError;
use crate::types::{Chunk, ChunkSpan};

// ---------------------------------------------------------------------------
// Checksum helpers
// ---------------------------------------------------------------------------

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

// ---------------------------------------------------------------------------
// Chunker
// ---------------------------------------------------------------------------

/// Splits `size` bytes into `ceil(size / chunk_size)` contiguous spans.
///
/// Spans tile `[0, size)` exactly; only the last one may be short.
/// If `chunk_size` is 0, [`DEFAULT_CHUNK_SIZE`](crate::DEFAULT_CHUNK_SIZE) is used.
pub fn split(size: u64, chunk_size: usize) -> Result<Vec<ChunkSpan>, TransferError> {
    if size == 0 {
        return Err(TransferError::EmptyInput);
    }
    let chunk_size = if chunk_size == 0 {
        crate::DEFAULT_CHUNK_SIZE as u64
    } else {
        chunk_size as u64
    };

    let count = size.div_ceil(chunk_size);
    let spans = (0..count)
        .map(|i| {
            let start = i * chunk_size;
            ChunkSpan {
                index: i as usize,
                start,
                end: (start + chunk_size).min(size),
            }
        })
        .collect();
    Ok(spans)
}

// ---------------------------------------------------------------------------
// ChunkReader
// ---------------------------------------------------------------------------

/// Reads chunk spans out of a file at exact offsets.
pub struct ChunkReader {
    file: std::fs::File,
}

impl ChunkReader {
    /// Opens `path` for span reads.
    pub fn open(path: &Path) -> Result<Self, TransferError> {
        let file = std::fs::File::open(path)?;
        Ok(Self { file })
    }

    /// Reads exactly the bytes of `span` and checksums them.
    ///
    /// Fails with `UnexpectedEof` if the file shrank below the span end.
    pub fn read_span(&mut self, span: ChunkSpan) -> Result<Chunk, TransferError> {
        self.file.seek(SeekFrom::Start(span.start))?;
        let mut buf = vec![0u8; span.len() as usize];
        self.file.read_exact(&mut buf)?;

        let checksum = checksum_bytes(&buf);
        Ok(Chunk {
            index: span.index,
            offset: span.start,
            data: Bytes::from(buf),
            checksum,
        })
    }
}
