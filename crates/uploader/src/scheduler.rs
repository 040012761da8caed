//! The session coordinator.
//!
//! One coordinator task per session owns the [`UploadSession`]: the chunk
//! queue, the endpoint pool and every counter. Transfer units run as
//! separate tasks and report back only through their completion value and
//! the byte-progress channel.

use std::sync::Arc;

use chunkdrop_protocol::{Endpoint, UploadEvent, UploadProgress};
use chunkdrop_transfer::{
    AttemptReport, ByteProgress, ChunkSink, ProgressReporter, TransferError, UploadSource, attempt,
};
use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use futures_util::stream::FuturesUnordered;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::SchedulerConfig;
use crate::error::UploadError;
use crate::session::{Assignment, FailureDisposition, UploadSession};
use crate::types::UploadOutcome;

/// A finished transfer unit, tagged with the work it was given.
struct UnitDone {
    index: usize,
    endpoint: Endpoint,
    attempt: u32,
    result: Result<Result<AttemptReport, TransferError>, JoinError>,
}

type Units = FuturesUnordered<BoxFuture<'static, UnitDone>>;

pub(crate) struct Scheduler {
    session: UploadSession,
    source: UploadSource,
    sink: Arc<dyn ChunkSink>,
    config: SchedulerConfig,
    /// Session-scoped token, triggered by external cancellation.
    cancel: CancellationToken,
    /// Handed to transfer units; also triggered on session faults.
    units_cancel: CancellationToken,
    events: Option<mpsc::Sender<UploadEvent>>,
    snapshots: watch::Sender<UploadProgress>,
    metadata: serde_json::Value,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session: UploadSession,
        source: UploadSource,
        sink: Arc<dyn ChunkSink>,
        config: SchedulerConfig,
        cancel: CancellationToken,
        events: Option<mpsc::Sender<UploadEvent>>,
        snapshots: watch::Sender<UploadProgress>,
        metadata: serde_json::Value,
    ) -> Self {
        let units_cancel = cancel.child_token();
        Self {
            session,
            source,
            sink,
            config,
            cancel,
            units_cancel,
            events,
            snapshots,
            metadata,
        }
    }

    /// Drives the session to a terminal state.
    pub async fn run(mut self) -> UploadOutcome {
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<ByteProgress>();
        let mut units = Units::new();
        let mut starved_waits = 0u32;
        let mut cancel_seen = false;
        let cancel = self.cancel.clone();

        self.session.begin();
        self.publish();
        info!(
            upload_id = %self.session.id(),
            file = %self.session.file_name(),
            size = self.session.file_size(),
            chunks = self.session.total_chunks(),
            "upload started"
        );
        self.emit(UploadEvent::Started {
            session_id: self.session.id().to_string(),
            total_chunks: self.session.total_chunks(),
            file_name: self.session.file_name().to_string(),
            file_size: self.session.file_size(),
        })
        .await;

        loop {
            if !self.stopping() {
                self.admit(&mut units, &progress_tx);
            }

            if units.is_empty() {
                if self.stopping() || !self.session.has_pending() {
                    break;
                }

                // Chunks remain, nothing is in flight, and no endpoint is free.
                starved_waits += 1;
                if starved_waits > self.config.max_starved_waits {
                    error!(
                        upload_id = %self.session.id(),
                        waits = starved_waits - 1,
                        "no endpoint available and no transfer active"
                    );
                    self.session.fault(
                        UploadError::ConfigurationFault(format!(
                            "no endpoint became available after {} waits",
                            starved_waits - 1
                        ))
                        .to_string(),
                    );
                    break;
                }
                warn!(
                    upload_id = %self.session.id(),
                    free = self.session.free_endpoints(),
                    "chunks pending but no endpoint free; backing off"
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(self.config.starved_backoff()) => {}
                }
                continue;
            }
            starved_waits = 0;

            tokio::select! {
                biased;
                _ = cancel.cancelled(), if !cancel_seen => {
                    cancel_seen = true;
                    info!(
                        upload_id = %self.session.id(),
                        active = units.len(),
                        "cancelling; draining active transfers"
                    );
                }
                Some(done) = units.next() => self.on_unit_done(done).await,
                Some(p) = progress_rx.recv() => self.on_chunk_progress(p),
            }
        }

        self.finish().await
    }

    fn stopping(&self) -> bool {
        self.cancel.is_cancelled() || self.session.error().is_some()
    }

    /// Launches units while a slot, a pending chunk and a free endpoint exist.
    fn admit(&mut self, units: &mut Units, progress_tx: &mpsc::UnboundedSender<ByteProgress>) {
        while units.len() < self.config.max_concurrency {
            let Some(assignment) = self.session.admit() else {
                break;
            };
            self.launch(units, assignment, progress_tx);
        }
    }

    fn launch(
        &self,
        units: &mut Units,
        assignment: Assignment,
        progress_tx: &mpsc::UnboundedSender<ByteProgress>,
    ) {
        let Assignment {
            span,
            endpoint,
            attempt: attempt_no,
        } = assignment;
        debug!(
            upload_id = %self.session.id(),
            chunk = span.index,
            endpoint = %endpoint.id,
            attempt = attempt_no,
            "chunk admitted"
        );

        let tx = progress_tx.clone();
        let reporter = Arc::new(ProgressReporter::new(
            span.index,
            span.len(),
            self.config.progress_interval(),
            Box::new(move |p| {
                let _ = tx.send(p);
            }),
        ));
        let sink = Arc::clone(&self.sink);
        let source = self.source.clone();
        let cancel = self.units_cancel.clone();
        let timeout = self.config.attempt_timeout();
        let target = endpoint.clone();

        let handle = tokio::spawn(async move {
            attempt(
                sink.as_ref(),
                &source,
                span,
                &target,
                &cancel,
                timeout,
                reporter,
            )
            .await
        });

        let index = span.index;
        units.push(Box::pin(async move {
            UnitDone {
                index,
                endpoint,
                attempt: attempt_no,
                result: handle.await,
            }
        }));
    }

    async fn on_unit_done(&mut self, done: UnitDone) {
        let UnitDone {
            index,
            endpoint,
            attempt,
            result,
        } = done;
        let endpoint_id = endpoint.id.clone();

        if let Err(e) = self.session.release(index, endpoint) {
            error!(upload_id = %self.session.id(), endpoint = %endpoint_id, error = %e, "endpoint pool rejected returned endpoint");
            self.session.fault(e.to_string());
            self.units_cancel.cancel();
        }

        match result {
            Ok(Ok(report)) => {
                debug!(
                    upload_id = %self.session.id(),
                    chunk = index,
                    endpoint = %endpoint_id,
                    attempt,
                    bytes = report.bytes,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "chunk uploaded"
                );
                self.session.record_success(index, report);
                self.publish();
                self.emit_progress(index).await;
            }
            Ok(Err(TransferError::Aborted)) => {
                debug!(upload_id = %self.session.id(), chunk = index, endpoint = %endpoint_id, "chunk attempt aborted");
                self.publish();
            }
            Ok(Err(e)) if e.is_attempt_error() => {
                self.on_attempt_failed(index, &endpoint_id, attempt, &e.to_string());
            }
            Ok(Err(e)) => {
                error!(
                    upload_id = %self.session.id(),
                    chunk = index,
                    endpoint = %endpoint_id,
                    kind = e.kind(),
                    error = %e,
                    "non-retryable chunk error; stopping session"
                );
                self.session.fault(format!("chunk {index}: {e}"));
                self.units_cancel.cancel();
                self.publish();
            }
            Err(e) => {
                self.on_attempt_failed(
                    index,
                    &endpoint_id,
                    attempt,
                    &format!("transfer unit failed: {e}"),
                );
            }
        }
    }

    fn on_attempt_failed(&mut self, index: usize, endpoint_id: &str, attempt: u32, error: &str) {
        match self.session.record_failure(index, self.config.max_retries) {
            FailureDisposition::Requeued { retries } => warn!(
                upload_id = %self.session.id(),
                chunk = index,
                endpoint = %endpoint_id,
                attempt,
                retries,
                error,
                "chunk attempt failed; requeued"
            ),
            FailureDisposition::Exhausted => warn!(
                upload_id = %self.session.id(),
                chunk = index,
                endpoint = %endpoint_id,
                attempt,
                error,
                "chunk permanently failed"
            ),
        }
        self.publish();
    }

    fn on_chunk_progress(&mut self, p: ByteProgress) {
        self.session.record_chunk_progress(p.chunk_index, p.bytes_sent);
        self.publish();
        self.try_emit(UploadEvent::ChunkProgress {
            session_id: self.session.id().to_string(),
            chunk_index: p.chunk_index,
            bytes_sent: p.bytes_sent,
            total_bytes: p.total_bytes,
            bytes_per_sec: p.bytes_per_second(),
        });
    }

    async fn emit_progress(&self, current_chunk_index: usize) {
        self.emit(UploadEvent::Progress {
            session_id: self.session.id().to_string(),
            percent: self.session.percent(),
            completed_chunks: self.session.completed_chunks(),
            total_chunks: self.session.total_chunks(),
            throughput_bytes_per_sec: self.session.throughput(),
            eta_seconds: self.session.eta_seconds(),
            current_chunk_index,
        })
        .await;
    }

    /// Decides the terminal state, publishes it and emits the final event.
    async fn finish(mut self) -> UploadOutcome {
        let session_id = self.session.id().to_string();
        let failed_chunks = self.session.failed_chunks();

        let (outcome, event) = if self.cancel.is_cancelled() {
            info!(upload_id = %session_id, completed = self.session.completed_chunks(), "upload cancelled");
            (
                UploadOutcome::Cancelled,
                UploadEvent::Cancelled {
                    session_id: session_id.clone(),
                },
            )
        } else if let Some(err) = self.session.error().map(str::to_string) {
            info!(upload_id = %session_id, error = %err, "upload failed");
            (
                UploadOutcome::Failed {
                    failed_chunks: failed_chunks.clone(),
                    error: Some(err.clone()),
                },
                UploadEvent::Failed {
                    session_id: session_id.clone(),
                    permanently_failed_chunk_indices: failed_chunks,
                    error: Some(err),
                },
            )
        } else if !failed_chunks.is_empty() {
            info!(upload_id = %session_id, failed = ?failed_chunks, "upload failed");
            (
                UploadOutcome::Failed {
                    failed_chunks: failed_chunks.clone(),
                    error: None,
                },
                UploadEvent::Failed {
                    session_id: session_id.clone(),
                    permanently_failed_chunk_indices: failed_chunks,
                    error: None,
                },
            )
        } else if self.session.all_uploaded() {
            let record = self.session.file_record(std::mem::take(&mut self.metadata));
            info!(
                upload_id = %session_id,
                chunks = record.total_chunks,
                duration_ms = record.duration_ms,
                "upload completed"
            );
            let event = UploadEvent::Completed {
                session_id: session_id.clone(),
                duration_ms: record.duration_ms,
                ordered_attachments: self.session.ordered_attachments(),
            };
            (
                UploadOutcome::Completed {
                    record,
                    store_error: None,
                },
                event,
            )
        } else {
            let unfinished = self.session.unfinished_chunks();
            error!(upload_id = %session_id, unfinished = ?unfinished, "session stopped with unfinished chunks");
            let err = UploadError::ConfigurationFault(
                "session stopped with unfinished chunks".into(),
            )
            .to_string();
            self.session.fault(err.clone());
            (
                UploadOutcome::Failed {
                    failed_chunks: unfinished.clone(),
                    error: Some(err.clone()),
                },
                UploadEvent::Failed {
                    session_id: session_id.clone(),
                    permanently_failed_chunk_indices: unfinished,
                    error: Some(err),
                },
            )
        };

        self.session.finish(outcome.status());
        self.publish();
        self.emit(event).await;
        outcome
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.session.snapshot());
    }

    /// Delivers a lifecycle or per-chunk progress event, waiting for
    /// channel capacity.
    async fn emit(&self, event: UploadEvent) {
        if let Some(tx) = &self.events {
            if tx.send(event).await.is_err() {
                trace!("event receiver dropped");
            }
        }
    }

    /// Delivers a byte-progress event if the channel has room.
    fn try_emit(&self, event: UploadEvent) {
        let Some(tx) = &self.events else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => trace!("event channel full; chunk progress dropped"),
            Err(TrySendError::Closed(_)) => {}
        }
    }
}
