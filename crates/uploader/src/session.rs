//! Per-session state. Owned and mutated only by the session coordinator.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::time::Instant;

use chunkdrop_protocol::{
    AttachmentDescriptor, Endpoint, FileRecord, StoredChunk, UploadProgress, UploadStatus,
};
use chunkdrop_transfer::{AttemptReport, ChunkSpan, EndpointPool, ThroughputStats, TransferError};

/// A chunk handed to a transfer unit together with its endpoint.
#[derive(Debug, Clone)]
pub(crate) struct Assignment {
    pub span: ChunkSpan,
    pub endpoint: Endpoint,
    /// 1-based attempt number for this chunk.
    pub attempt: u32,
}

/// What happened to a chunk after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailureDisposition {
    /// Requeued at the tail of the pending queue.
    Requeued { retries: u32 },
    /// Out of retries; recorded as permanently failed.
    Exhausted,
}

#[derive(Debug)]
struct ChunkState {
    span: ChunkSpan,
    attempts: u32,
    retries: u32,
    uploaded: Option<Uploaded>,
}

#[derive(Debug)]
struct Uploaded {
    descriptor: AttachmentDescriptor,
    checksum: String,
}

#[derive(Debug)]
pub(crate) struct UploadSession {
    id: String,
    file_name: String,
    content_type: String,
    file_size: u64,
    /// Nominal chunk size, used for the remaining-time estimate.
    chunk_size: u64,
    status: UploadStatus,
    started: Instant,
    chunks: Vec<ChunkState>,
    pending: VecDeque<usize>,
    pool: EndpointPool,
    /// chunk index -> endpoint id, for every active unit.
    active: HashMap<usize, String>,
    in_flight_bytes: HashMap<usize, u64>,
    completed: usize,
    completed_bytes: u64,
    failed: BTreeSet<usize>,
    stats: ThroughputStats,
    error: Option<String>,
}

impl UploadSession {
    pub fn new(
        id: String,
        file_name: String,
        content_type: String,
        file_size: u64,
        chunk_size: usize,
        spans: Vec<ChunkSpan>,
        endpoints: Vec<Endpoint>,
    ) -> Result<Self, TransferError> {
        let pool = EndpointPool::new(endpoints)?;
        let pending = (0..spans.len()).collect();
        let chunks = spans
            .into_iter()
            .map(|span| ChunkState {
                span,
                attempts: 0,
                retries: 0,
                uploaded: None,
            })
            .collect();

        Ok(Self {
            id,
            file_name,
            content_type,
            file_size,
            chunk_size: chunk_size as u64,
            status: UploadStatus::Pending,
            started: Instant::now(),
            chunks,
            pending,
            pool,
            active: HashMap::new(),
            in_flight_bytes: HashMap::new(),
            completed: 0,
            completed_bytes: 0,
            failed: BTreeSet::new(),
            stats: ThroughputStats::new(),
            error: None,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn total_chunks(&self) -> usize {
        self.chunks.len()
    }

    pub fn completed_chunks(&self) -> usize {
        self.completed
    }

    pub fn status(&self) -> UploadStatus {
        self.status
    }

    pub fn begin(&mut self) {
        self.status = UploadStatus::InProgress;
        self.started = Instant::now();
    }

    pub fn finish(&mut self, status: UploadStatus) {
        self.status = status;
        self.in_flight_bytes.clear();
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    #[cfg(test)]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn free_endpoints(&self) -> usize {
        self.pool.available()
    }

    /// Pairs the next pending chunk with the next free endpoint.
    pub fn admit(&mut self) -> Option<Assignment> {
        if self.pending.is_empty() || self.pool.available() == 0 {
            return None;
        }
        let index = self.pending.pop_front()?;
        let Some(endpoint) = self.pool.dequeue() else {
            self.pending.push_front(index);
            return None;
        };

        let chunk = &mut self.chunks[index];
        chunk.attempts += 1;
        self.active.insert(index, endpoint.id.clone());
        Some(Assignment {
            span: chunk.span,
            endpoint,
            attempt: chunk.attempts,
        })
    }

    /// Ends the unit for `index` and returns its endpoint to the pool tail.
    pub fn release(&mut self, index: usize, endpoint: Endpoint) -> Result<(), TransferError> {
        self.active.remove(&index);
        self.in_flight_bytes.remove(&index);
        self.pool.enqueue(endpoint)
    }

    pub fn record_success(&mut self, index: usize, report: AttemptReport) {
        let chunk = &mut self.chunks[index];
        if chunk.uploaded.is_some() {
            return;
        }
        self.stats.record(index, report.bytes, report.elapsed);
        self.completed += 1;
        self.completed_bytes += report.bytes;
        chunk.uploaded = Some(Uploaded {
            descriptor: report.descriptor,
            checksum: report.checksum,
        });
    }

    /// Applies the retry policy to a failed attempt of chunk `index`.
    pub fn record_failure(&mut self, index: usize, max_retries: u32) -> FailureDisposition {
        let chunk = &mut self.chunks[index];
        if chunk.retries < max_retries {
            chunk.retries += 1;
            self.pending.push_back(index);
            FailureDisposition::Requeued {
                retries: chunk.retries,
            }
        } else {
            self.failed.insert(index);
            FailureDisposition::Exhausted
        }
    }

    pub fn record_chunk_progress(&mut self, index: usize, bytes_sent: u64) {
        if self.active.contains_key(&index) {
            self.in_flight_bytes.insert(index, bytes_sent);
        }
    }

    /// Marks the session as hit by an infrastructure error. The first
    /// error wins.
    pub fn fault(&mut self, message: impl Into<String>) {
        if self.error.is_none() {
            self.error = Some(message.into());
        }
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn failed_chunks(&self) -> Vec<usize> {
        self.failed.iter().copied().collect()
    }

    /// Indices that neither uploaded nor exhausted their retries.
    pub fn unfinished_chunks(&self) -> Vec<usize> {
        self.chunks
            .iter()
            .enumerate()
            .filter(|(i, c)| c.uploaded.is_none() && !self.failed.contains(i))
            .map(|(i, _)| i)
            .collect()
    }

    pub fn all_uploaded(&self) -> bool {
        self.completed == self.chunks.len()
    }

    #[cfg(test)]
    pub fn attempts(&self, index: usize) -> u32 {
        self.chunks[index].attempts
    }

    #[cfg(test)]
    pub fn endpoints_in_flight(&self) -> usize {
        self.pool.in_flight()
    }

    pub fn percent(&self) -> u8 {
        if self.chunks.is_empty() {
            return 0;
        }
        (self.completed * 100 / self.chunks.len()) as u8
    }

    pub fn throughput(&self) -> f64 {
        self.stats.bytes_per_second()
    }

    /// Remaining chunks at nominal size over the average rate; `None`
    /// until a chunk has a recorded timing.
    pub fn eta_seconds(&self) -> Option<f64> {
        if self.stats.samples() == 0 {
            return None;
        }
        let remaining = (self.chunks.len() - self.completed) as u64 * self.chunk_size;
        self.stats.eta(remaining).map(|d| d.as_secs_f64())
    }

    pub fn transferred_bytes(&self) -> u64 {
        self.completed_bytes + self.in_flight_bytes.values().sum::<u64>()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn snapshot(&self) -> UploadProgress {
        UploadProgress {
            status: self.status,
            completed_chunks: self.completed,
            transferred_bytes: self.transferred_bytes(),
            percent: self.percent(),
            throughput_bytes_per_sec: self.throughput(),
            eta_seconds: self.eta_seconds(),
            failed_chunks: self.failed_chunks(),
            error: self.error.clone().unwrap_or_default(),
            ..UploadProgress::pending(&self.id, &self.file_name, self.file_size, self.chunks.len())
        }
    }

    /// Descriptors sorted by chunk index. Only meaningful once every
    /// chunk has uploaded.
    pub fn ordered_attachments(&self) -> Vec<AttachmentDescriptor> {
        self.chunks
            .iter()
            .filter_map(|c| c.uploaded.as_ref().map(|u| u.descriptor.clone()))
            .collect()
    }

    pub fn file_record(&self, metadata: serde_json::Value) -> FileRecord {
        let chunks = self
            .chunks
            .iter()
            .enumerate()
            .filter_map(|(index, c)| {
                c.uploaded.as_ref().map(|u| StoredChunk {
                    index,
                    checksum: u.checksum.clone(),
                    attachment: u.descriptor.clone(),
                })
            })
            .collect();

        FileRecord {
            id: self.id.clone(),
            file_name: self.file_name.clone(),
            file_size: self.file_size,
            content_type: self.content_type.clone(),
            uploaded_at: chrono::Utc::now(),
            duration_ms: self.elapsed_ms(),
            total_chunks: self.chunks.len(),
            chunks,
            metadata,
        }
    }
}
