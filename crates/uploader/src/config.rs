//! Scheduler configuration.

use std::time::Duration;

use chunkdrop_transfer::{DEFAULT_CHUNK_SIZE, DEFAULT_PROGRESS_INTERVAL};
use serde::{Deserialize, Serialize};

use crate::error::UploadError;

/// Tunables for one upload session. Every field has a default, so a
/// partial `[scheduler]` table deserializes cleanly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Chunk size in bytes.
    pub chunk_size: usize,
    /// Maximum number of concurrently active transfer units.
    pub max_concurrency: usize,
    /// Retries per chunk after the first attempt.
    pub max_retries: u32,
    /// Per-attempt deadline in seconds; 0 disables the guard.
    pub attempt_timeout_secs: u64,
    /// Minimum spacing of byte-progress notifications per chunk.
    pub progress_interval_ms: u64,
    /// Wait between checks when chunks remain but no endpoint can be used.
    pub starved_backoff_ms: u64,
    /// Number of such waits before the session is failed as misconfigured.
    pub max_starved_waits: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_concurrency: 5,
            max_retries: 3,
            attempt_timeout_secs: 300,
            progress_interval_ms: DEFAULT_PROGRESS_INTERVAL.as_millis() as u64,
            starved_backoff_ms: 100,
            max_starved_waits: 50,
        }
    }
}

impl SchedulerConfig {
    /// Rejects values the scheduler cannot run with.
    pub fn validate(&self) -> Result<(), UploadError> {
        if self.chunk_size == 0 {
            return Err(UploadError::InvalidInput("chunk_size must be > 0".into()));
        }
        if self.max_concurrency == 0 {
            return Err(UploadError::InvalidInput(
                "max_concurrency must be > 0".into(),
            ));
        }
        Ok(())
    }

    pub fn attempt_timeout(&self) -> Option<Duration> {
        (self.attempt_timeout_secs > 0).then(|| Duration::from_secs(self.attempt_timeout_secs))
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn starved_backoff(&self) -> Duration {
        Duration::from_millis(self.starved_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = SchedulerConfig::default();
        assert_eq!(c.chunk_size, 9 * 1024 * 1024);
        assert_eq!(c.max_concurrency, 5);
        assert_eq!(c.max_retries, 3);
        assert_eq!(c.attempt_timeout(), Some(Duration::from_secs(300)));
        assert_eq!(c.progress_interval(), Duration::from_millis(500));
        assert!(c.validate().is_ok());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let c: SchedulerConfig = serde_json::from_str(r#"{"max_concurrency": 2}"#).unwrap();
        assert_eq!(c.max_concurrency, 2);
        assert_eq!(c.max_retries, 3);
        assert_eq!(c.chunk_size, SchedulerConfig::default().chunk_size);
    }

    #[test]
    fn zero_timeout_disables_guard() {
        let c = SchedulerConfig {
            attempt_timeout_secs: 0,
            ..Default::default()
        };
        assert!(c.attempt_timeout().is_none());
    }

    #[test]
    fn rejects_zero_values() {
        let c = SchedulerConfig {
            chunk_size: 0,
            ..Default::default()
        };
        assert!(matches!(c.validate(), Err(UploadError::InvalidInput(_))));

        let c = SchedulerConfig {
            max_concurrency: 0,
            ..Default::default()
        };
        assert!(matches!(c.validate(), Err(UploadError::InvalidInput(_))));
    }
}
