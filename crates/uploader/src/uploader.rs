//! Upload front-end: validates requests, registers sessions and spawns
//! their coordinators.

use std::sync::Arc;

use chunkdrop_protocol::{UploadEvent, UploadProgress};
use chunkdrop_transfer::{ChunkSink, TransferError, split, validate_endpoints};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::SchedulerConfig;
use crate::error::UploadError;
use crate::registry::{Registration, SessionRegistry};
use crate::scheduler::Scheduler;
use crate::session::UploadSession;
use crate::store::MetadataStore;
use crate::types::{UploadOutcome, UploadRequest};

/// Runs upload sessions against a shared sink.
pub struct Uploader {
    sink: Arc<dyn ChunkSink>,
    store: Option<Arc<dyn MetadataStore>>,
    config: SchedulerConfig,
    registry: SessionRegistry,
    events_tx: mpsc::Sender<UploadEvent>,
    events_rx: Option<mpsc::Receiver<UploadEvent>>,
}

impl Uploader {
    pub fn new(sink: Arc<dyn ChunkSink>, config: SchedulerConfig) -> Self {
        let (events_tx, events_rx) = mpsc::channel(256);
        Self {
            sink,
            store: None,
            config,
            registry: SessionRegistry::new(),
            events_tx,
            events_rx: Some(events_rx),
        }
    }

    /// Hands completed records to `store`.
    pub fn with_store(mut self, store: Arc<dyn MetadataStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Takes the event receiver. Can only be called once.
    ///
    /// Sessions started before the receiver is taken emit no events.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<UploadEvent>> {
        self.events_rx.take()
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Requests graceful cancellation of a session.
    pub fn cancel(&self, id: &str) -> bool {
        self.registry.cancel(id)
    }

    /// Validates `request`, registers the session and starts its coordinator.
    pub async fn start(&self, request: UploadRequest) -> Result<UploadHandle, UploadError> {
        self.config.validate()?;
        let UploadRequest {
            id,
            file_name,
            content_type,
            source,
            endpoints,
            metadata,
        } = request;

        validate_endpoints(&endpoints).map_err(|e| UploadError::InvalidInput(e.to_string()))?;
        let size = source.len().await?;
        let spans = split(size, self.config.chunk_size).map_err(|e| match e {
            TransferError::EmptyInput => UploadError::InvalidInput("file is empty".into()),
            other => UploadError::Transfer(other),
        })?;

        let id = match id {
            Some(id) if id.trim().is_empty() => {
                return Err(UploadError::InvalidInput("empty session id".into()));
            }
            Some(id) => id,
            None => uuid::Uuid::new_v4().simple().to_string(),
        };

        let session = UploadSession::new(
            id.clone(),
            file_name,
            content_type,
            size,
            self.config.chunk_size,
            spans,
            endpoints,
        )
        .map_err(|e| UploadError::InvalidInput(e.to_string()))?;

        let cancel = CancellationToken::new();
        let (snapshots_tx, snapshots_rx) = watch::channel(session.snapshot());
        self.registry.register(&id, cancel.clone(), snapshots_rx.clone())?;
        let registration = Registration::new(self.registry.clone(), id.clone());

        let events = self.events_rx.is_none().then(|| self.events_tx.clone());
        let scheduler = Scheduler::new(
            session,
            source,
            Arc::clone(&self.sink),
            self.config.clone(),
            cancel.clone(),
            events,
            snapshots_tx,
            metadata,
        );
        let store = self.store.clone();

        let task = tokio::spawn(async move {
            let outcome = scheduler.run().await;
            drop(registration);
            hand_off(outcome, store.as_deref()).await
        });

        Ok(UploadHandle {
            id,
            cancel,
            progress: snapshots_rx,
            task,
        })
    }

    /// Runs a session to completion.
    pub async fn upload(&self, request: UploadRequest) -> Result<UploadOutcome, UploadError> {
        self.start(request).await?.wait().await
    }
}

/// Passes a completed record to the store. Store errors are reported in
/// the outcome and never change its status.
async fn hand_off(outcome: UploadOutcome, store: Option<&dyn MetadataStore>) -> UploadOutcome {
    let (record, store) = match (outcome, store) {
        (UploadOutcome::Completed { record, .. }, Some(store)) => (record, store),
        (outcome, _) => return outcome,
    };

    let store_error = match store.store(&record).await {
        Ok(()) => {
            info!(upload_id = %record.id, "file record stored");
            None
        }
        Err(e) => {
            warn!(upload_id = %record.id, error = %e, "failed to store file record");
            Some(e.to_string())
        }
    };
    UploadOutcome::Completed {
        record,
        store_error,
    }
}

/// Handle to a running session.
#[derive(Debug)]
pub struct UploadHandle {
    id: String,
    cancel: CancellationToken,
    progress: watch::Receiver<UploadProgress>,
    task: JoinHandle<UploadOutcome>,
}

impl UploadHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Latest snapshot published by the coordinator.
    pub fn progress(&self) -> UploadProgress {
        self.progress.borrow().clone()
    }

    /// Requests graceful cancellation. No-op once the session is terminal.
    pub fn cancel(&self) {
        if !self.progress.borrow().status.is_terminal() {
            self.cancel.cancel();
        }
    }

    /// Waits for the terminal outcome.
    pub async fn wait(self) -> Result<UploadOutcome, UploadError> {
        self.task.await.map_err(|e| UploadError::Task(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{JsonFileStore, StoreFuture};
    use chunkdrop_protocol::{AttachmentDescriptor, Endpoint, FileRecord, UploadStatus};
    use chunkdrop_transfer::{Chunk, ProgressReporter, SinkFuture, UploadSource};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Succeeds for every chunk after an optional delay.
    struct OkSink {
        delay: Duration,
    }

    impl ChunkSink for OkSink {
        fn send_chunk<'a>(
            &'a self,
            _endpoint: &'a Endpoint,
            chunk: &'a Chunk,
            progress: Arc<ProgressReporter>,
        ) -> SinkFuture<'a> {
            Box::pin(async move {
                tokio::time::sleep(self.delay).await;
                progress.report(chunk.len() as u64);
                Ok(AttachmentDescriptor {
                    index: 0,
                    id: format!("a{}", chunk.index),
                    url: format!("https://cdn.example.com/a{}?ex=66000000", chunk.index),
                    proxy_url: String::new(),
                    filename: String::new(),
                    size: chunk.len() as u64,
                    content_type: None,
                    width: None,
                    height: None,
                    duration_secs: None,
                    waveform: None,
                    ephemeral: false,
                })
            })
        }
    }

    struct FailingStore;

    impl MetadataStore for FailingStore {
        fn store<'a>(&'a self, _record: &'a FileRecord) -> StoreFuture<'a> {
            Box::pin(async { Err(UploadError::Store("HTTP 503: unavailable".into())) })
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        records: Mutex<Vec<FileRecord>>,
    }

    impl MetadataStore for MemoryStore {
        fn store<'a>(&'a self, record: &'a FileRecord) -> StoreFuture<'a> {
            Box::pin(async move {
                self.records.lock().unwrap().push(record.clone());
                Ok(())
            })
        }
    }

    fn uploader(delay_ms: u64, config: SchedulerConfig) -> Uploader {
        Uploader::new(
            Arc::new(OkSink {
                delay: Duration::from_millis(delay_ms),
            }),
            config,
        )
    }

    fn endpoints(n: usize) -> Vec<Endpoint> {
        (0..n)
            .map(|i| Endpoint::new(format!("e{i}"), format!("https://hooks.example.com/{i}/tok")))
            .collect()
    }

    fn request(size: usize, endpoint_count: usize) -> UploadRequest {
        UploadRequest::new(
            "data.bin",
            UploadSource::from_bytes(vec![1u8; size]),
            endpoints(endpoint_count),
        )
    }

    fn small_chunks() -> SchedulerConfig {
        SchedulerConfig {
            chunk_size: 4,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn upload_completes_and_stores_record() {
        let store = Arc::new(MemoryStore::default());
        let up = uploader(0, small_chunks()).with_store(store.clone());

        let outcome = up
            .upload(request(10, 2).with_metadata(serde_json::json!({"k": "v"})))
            .await
            .unwrap();

        let UploadOutcome::Completed { record, store_error } = outcome else {
            panic!("expected completion");
        };
        assert!(store_error.is_none());
        assert_eq!(record.id.len(), 32);
        assert_eq!(record.total_chunks, 3);
        assert_eq!(record.file_size, 10);
        assert_eq!(record.metadata["k"], "v");

        let stored = store.records.lock().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0], record);
        assert!(up.registry().is_empty());
    }

    #[tokio::test]
    async fn store_failure_keeps_completed_status() {
        let up = uploader(0, small_chunks()).with_store(Arc::new(FailingStore));

        let outcome = up.upload(request(10, 1)).await.unwrap();

        assert_eq!(outcome.status(), UploadStatus::Completed);
        let UploadOutcome::Completed { store_error, .. } = outcome else {
            unreachable!();
        };
        assert!(store_error.unwrap().contains("503"));
    }

    #[tokio::test]
    async fn json_store_receives_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        let up = uploader(0, small_chunks()).with_store(Arc::new(JsonFileStore::new(&path)));

        let outcome = up.upload(request(9, 3).with_id("fixed-id")).await.unwrap();
        assert!(outcome.is_completed());

        let back: FileRecord =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back.id, "fixed-id");
        assert_eq!(back.chunks.len(), 3);
    }

    #[tokio::test]
    async fn rejects_empty_input() {
        let up = uploader(0, SchedulerConfig::default());
        let err = up.start(request(0, 1)).await.unwrap_err();
        assert!(matches!(err, UploadError::InvalidInput(msg) if msg == "file is empty"));
        assert!(up.registry().is_empty());
    }

    #[tokio::test]
    async fn rejects_missing_or_bad_endpoints() {
        let up = uploader(0, SchedulerConfig::default());

        let err = up.start(request(10, 0)).await.unwrap_err();
        assert!(matches!(err, UploadError::InvalidInput(_)));

        let bad = UploadRequest::new(
            "x",
            UploadSource::from_bytes(vec![1u8; 10]),
            vec![Endpoint::new("e0", "ftp://hooks.example.com/0")],
        );
        assert!(matches!(
            up.start(bad).await,
            Err(UploadError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn rejects_invalid_config() {
        let up = uploader(
            0,
            SchedulerConfig {
                max_concurrency: 0,
                ..Default::default()
            },
        );
        assert!(matches!(
            up.start(request(10, 1)).await,
            Err(UploadError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let up = uploader(0, SchedulerConfig::default());
        let req = UploadRequest::new(
            "gone.bin",
            UploadSource::from_path(dir.path().join("gone.bin")),
            endpoints(1),
        );
        assert!(matches!(
            up.start(req).await,
            Err(UploadError::Transfer(TransferError::Io(_)))
        ));
    }

    #[tokio::test]
    async fn duplicate_session_id_rejected_while_running() {
        let up = uploader(200, small_chunks());
        let first = up.start(request(10, 1).with_id("dup")).await.unwrap();

        let err = up.start(request(10, 1).with_id("dup")).await.unwrap_err();
        assert!(matches!(err, UploadError::DuplicateSession(id) if id == "dup"));

        assert!(up.cancel("dup"));
        assert!(matches!(first.wait().await.unwrap(), UploadOutcome::Cancelled));
        assert!(!up.registry().contains("dup"));
    }

    #[tokio::test]
    async fn registry_tracks_running_session() {
        let up = uploader(100, small_chunks());
        let handle = up.start(request(10, 1)).await.unwrap();
        let id = handle.id().to_string();
        assert!(format!("{handle:?}").contains(&id));

        assert!(up.registry().contains(&id));
        assert_eq!(up.registry().list(), vec![id.clone()]);
        let snap = up.registry().snapshot(&id).unwrap();
        assert_eq!(snap.total_chunks, 3);
        assert!(!snap.status.is_terminal());

        let outcome = handle.wait().await.unwrap();
        assert!(outcome.is_completed());
        assert!(!up.registry().contains(&id));
        assert!(!up.cancel(&id));
    }

    #[tokio::test]
    async fn handle_cancel_is_graceful() {
        let mut up = uploader(50, small_chunks());
        let mut events = up.take_events().unwrap();
        let handle = up.start(request(40, 1)).await.unwrap();

        handle.cancel();
        let outcome = handle.wait().await.unwrap();
        assert!(matches!(outcome, UploadOutcome::Cancelled));

        let mut terminal = Vec::new();
        while let Ok(ev) = events.try_recv() {
            if ev.is_terminal() {
                terminal.push(ev);
            }
        }
        assert_eq!(terminal.len(), 1);
        assert!(matches!(terminal[0], UploadEvent::Cancelled { .. }));
    }

    #[tokio::test]
    async fn events_flow_once_taken() {
        let mut up = uploader(0, small_chunks());
        let mut events = up.take_events().unwrap();
        assert!(up.take_events().is_none());

        let handle = up.start(request(8, 2)).await.unwrap();
        let id = handle.id().to_string();
        handle.wait().await.unwrap();

        let mut seen = Vec::new();
        while let Ok(ev) = events.try_recv() {
            assert_eq!(ev.session_id(), id);
            seen.push(ev);
        }
        assert!(matches!(seen.first(), Some(UploadEvent::Started { .. })));
        assert!(matches!(seen.last(), Some(UploadEvent::Completed { .. })));
    }

    #[tokio::test]
    async fn sessions_are_independent() {
        let up = uploader(10, small_chunks());
        let a = up.start(request(12, 1)).await.unwrap();
        let b = up.start(request(12, 1)).await.unwrap();
        assert_ne!(a.id(), b.id());

        assert!(up.cancel(a.id()));
        assert!(matches!(a.wait().await.unwrap(), UploadOutcome::Cancelled));
        assert!(b.wait().await.unwrap().is_completed());
    }
}
