//! Process-wide table of in-flight upload sessions.
//!
//! Entries are created when a session starts and removed when it reaches
//! a terminal state. The coordinator is the only writer of a session's
//! state; the registry only reads its published snapshot and triggers its
//! cancellation token.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chunkdrop_protocol::UploadProgress;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::UploadError;

struct SessionEntry {
    cancel: CancellationToken,
    progress: watch::Receiver<UploadProgress>,
}

/// Concurrency-safe id -> session handle map. Cheap to clone.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, SessionEntry>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(
        &self,
        id: &str,
        cancel: CancellationToken,
        progress: watch::Receiver<UploadProgress>,
    ) -> Result<(), UploadError> {
        let mut sessions = self.sessions.write().unwrap();
        if sessions.contains_key(id) {
            return Err(UploadError::DuplicateSession(id.to_string()));
        }
        sessions.insert(id.to_string(), SessionEntry { cancel, progress });
        Ok(())
    }

    pub(crate) fn remove(&self, id: &str) {
        self.sessions.write().unwrap().remove(id);
    }

    /// Requests graceful cancellation of session `id`.
    ///
    /// Returns `false` if the session is unknown or already terminal.
    pub fn cancel(&self, id: &str) -> bool {
        let sessions = self.sessions.read().unwrap();
        let Some(entry) = sessions.get(id) else {
            return false;
        };
        if entry.progress.borrow().status.is_terminal() {
            return false;
        }
        if !entry.cancel.is_cancelled() {
            info!(upload_id = %id, "cancellation requested");
            entry.cancel.cancel();
        }
        true
    }

    /// Latest snapshot published by the session's coordinator.
    pub fn snapshot(&self, id: &str) -> Result<UploadProgress, UploadError> {
        let sessions = self.sessions.read().unwrap();
        sessions
            .get(id)
            .map(|e| e.progress.borrow().clone())
            .ok_or_else(|| UploadError::SessionNotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.read().unwrap().contains_key(id)
    }

    /// Ids of all registered sessions, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Removes a session from the registry when dropped, so the entry goes
/// away even if the coordinator task panics.
pub(crate) struct Registration {
    registry: SessionRegistry,
    id: String,
}

impl Registration {
    pub fn new(registry: SessionRegistry, id: String) -> Self {
        Self { registry, id }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunkdrop_protocol::UploadStatus;

    fn entry(id: &str) -> (CancellationToken, watch::Sender<UploadProgress>) {
        let (tx, _rx) = watch::channel(UploadProgress::pending(id, "f.bin", 10, 1));
        (CancellationToken::new(), tx)
    }

    #[test]
    fn register_and_lookup() {
        let reg = SessionRegistry::new();
        let (cancel, tx) = entry("a");
        reg.register("a", cancel, tx.subscribe()).unwrap();

        assert!(reg.contains("a"));
        assert_eq!(reg.list(), vec!["a".to_string()]);
        assert_eq!(reg.snapshot("a").unwrap().status, UploadStatus::Pending);
        assert!(matches!(
            reg.snapshot("b"),
            Err(UploadError::SessionNotFound(id)) if id == "b"
        ));
    }

    #[test]
    fn duplicate_id_rejected() {
        let reg = SessionRegistry::new();
        let (c1, t1) = entry("a");
        let (c2, t2) = entry("a");
        reg.register("a", c1, t1.subscribe()).unwrap();
        assert!(matches!(
            reg.register("a", c2, t2.subscribe()),
            Err(UploadError::DuplicateSession(id)) if id == "a"
        ));
    }

    #[test]
    fn cancel_triggers_token() {
        let reg = SessionRegistry::new();
        let (cancel, tx) = entry("a");
        reg.register("a", cancel.clone(), tx.subscribe()).unwrap();

        assert!(reg.cancel("a"));
        assert!(cancel.is_cancelled());
        // Repeated requests are accepted while the session drains.
        assert!(reg.cancel("a"));
    }

    #[test]
    fn cancel_unknown_or_terminal_is_noop() {
        let reg = SessionRegistry::new();
        assert!(!reg.cancel("missing"));

        let (cancel, tx) = entry("a");
        reg.register("a", cancel.clone(), tx.subscribe()).unwrap();
        tx.send_modify(|p| p.status = UploadStatus::Completed);

        assert!(!reg.cancel("a"));
        assert!(!cancel.is_cancelled());
    }

    #[test]
    fn snapshot_follows_publisher() {
        let reg = SessionRegistry::new();
        let (cancel, tx) = entry("a");
        reg.register("a", cancel, tx.subscribe()).unwrap();
        tx.send_modify(|p| {
            p.completed_chunks = 1;
            p.percent = 100;
        });
        assert_eq!(reg.snapshot("a").unwrap().percent, 100);
    }

    #[test]
    fn registration_guard_removes_entry() {
        let reg = SessionRegistry::new();
        let (cancel, tx) = entry("a");
        reg.register("a", cancel, tx.subscribe()).unwrap();
        {
            let _guard = Registration::new(reg.clone(), "a".into());
            assert_eq!(reg.len(), 1);
        }
        assert!(reg.is_empty());
        assert!(!reg.contains("a"));
        assert!(reg.snapshot("a").is_err());
    }
}
