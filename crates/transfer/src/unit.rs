//! The transfer unit: one chunk, one endpoint, one attempt.
//!
//! `ChunkSink` is the seam to the remote side. [`WebhookSink`](crate::WebhookSink)
//! is the HTTP implementation; tests plug in scripted sinks.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chunkdrop_protocol::{AttachmentDescriptor, Endpoint};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::TransferError;
use crate::progress::ProgressReporter;
use crate::types::{Chunk, ChunkSpan, UploadSource};

/// Future returned by [`ChunkSink::send_chunk`].
pub type SinkFuture<'a> =
    Pin<Box<dyn Future<Output = Result<AttachmentDescriptor, TransferError>> + Send + 'a>>;

/// Abstract upload sink.
///
/// Implementations send the chunk bytes to `endpoint`, call
/// `progress.report` as bytes go out, and return the remote descriptor.
/// Dropping the returned future must abort the network operation.
pub trait ChunkSink: Send + Sync {
    fn send_chunk<'a>(
        &'a self,
        endpoint: &'a Endpoint,
        chunk: &'a Chunk,
        progress: Arc<ProgressReporter>,
    ) -> SinkFuture<'a>;
}

/// Outcome of a successful attempt.
#[derive(Debug, Clone)]
pub struct AttemptReport {
    /// Descriptor stamped with the chunk index.
    pub descriptor: AttachmentDescriptor,
    pub checksum: String,
    pub bytes: u64,
    /// Time spent sending, excluding the local read.
    pub elapsed: Duration,
}

/// Uploads the chunk at `span` to `endpoint`.
///
/// Returns `Aborted` as soon as `cancel` fires, even if the remote side
/// completes concurrently, and `TimedOut` if `timeout` elapses first.
/// Local read failures surface as `Io`.
pub async fn attempt(
    sink: &dyn ChunkSink,
    source: &UploadSource,
    span: ChunkSpan,
    endpoint: &Endpoint,
    cancel: &CancellationToken,
    timeout: Option<Duration>,
    progress: Arc<ProgressReporter>,
) -> Result<AttemptReport, TransferError> {
    if cancel.is_cancelled() {
        return Err(TransferError::Aborted);
    }

    let chunk = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(TransferError::Aborted),
        loaded = source.load(span) => loaded?,
    };

    trace!(chunk = chunk.index, endpoint = %endpoint.id, bytes = chunk.len(), "sending chunk");
    let started = Instant::now();
    let send = {
        let chunk = &chunk;
        async move {
            match timeout {
                Some(limit) => tokio::time::timeout(limit, sink.send_chunk(endpoint, chunk, progress))
                    .await
                    .unwrap_or(Err(TransferError::TimedOut(limit))),
                None => sink.send_chunk(endpoint, chunk, progress).await,
            }
        }
    };

    let mut descriptor = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(TransferError::Aborted),
        sent = send => sent?,
    };
    let elapsed = started.elapsed();

    descriptor.index = chunk.index;
    Ok(AttemptReport {
        descriptor,
        checksum: chunk.checksum,
        bytes: chunk.data.len() as u64,
        elapsed,
    })
}
