use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Default progress notification interval.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// Byte-level progress of one in-flight chunk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ByteProgress {
    pub chunk_index: usize,
    pub bytes_sent: u64,
    pub total_bytes: u64,
    pub elapsed: Duration,
}

impl ByteProgress {
    /// Average rate since the attempt started.
    pub fn bytes_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.bytes_sent as f64 / secs
    }
}

/// Callback invoked with chunk progress.
pub type ProgressCallback = Box<dyn Fn(ByteProgress) + Send + Sync>;

// ---------------------------------------------------------------------------
// ProgressThrottle
// ---------------------------------------------------------------------------

/// Lets through at most one notification per interval.
#[derive(Debug)]
pub struct ProgressThrottle {
    interval: Duration,
    last: Option<Instant>,
}

impl ProgressThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// Returns `true` (and arms the throttle) if a notification may go out at `now`.
    pub fn ready(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ProgressReporter
// ---------------------------------------------------------------------------

/// Throttled progress sink handed to a [`ChunkSink`](crate::ChunkSink).
///
/// Sinks call [`report`](Self::report) as often as they like; the callback
/// fires at most once per interval, plus once when the chunk is fully sent.
pub struct ProgressReporter {
    chunk_index: usize,
    total_bytes: u64,
    started: Instant,
    state: Mutex<ReporterState>,
    callback: Option<ProgressCallback>,
}

struct ReporterState {
    throttle: ProgressThrottle,
    finished: bool,
}

impl ProgressReporter {
    pub fn new(
        chunk_index: usize,
        total_bytes: u64,
        interval: Duration,
        callback: ProgressCallback,
    ) -> Self {
        Self {
            chunk_index,
            total_bytes,
            started: Instant::now(),
            state: Mutex::new(ReporterState {
                throttle: ProgressThrottle::new(interval),
                finished: false,
            }),
            callback: Some(callback),
        }
    }

    /// A reporter that drops every notification.
    #[cfg(test)]
    pub(crate) fn disabled(chunk_index: usize, total_bytes: u64) -> Self {
        Self {
            chunk_index,
            total_bytes,
            started: Instant::now(),
            state: Mutex::new(ReporterState {
                throttle: ProgressThrottle::new(DEFAULT_PROGRESS_INTERVAL),
                finished: false,
            }),
            callback: None,
        }
    }

    /// Records that `bytes_sent` bytes of the chunk have been handed to the network.
    pub fn report(&self, bytes_sent: u64) {
        let Some(callback) = &self.callback else {
            return;
        };

        let now = Instant::now();
        let emit = {
            let mut s = self.state.lock().unwrap();
            if s.finished {
                false
            } else if bytes_sent >= self.total_bytes {
                s.finished = true;
                true
            } else {
                s.throttle.ready(now)
            }
        };

        if emit {
            callback(ByteProgress {
                chunk_index: self.chunk_index,
                bytes_sent: bytes_sent.min(self.total_bytes),
                total_bytes: self.total_bytes,
                elapsed: now.duration_since(self.started),
            });
        }
    }
}

// ---------------------------------------------------------------------------
// ThroughputStats
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct ChunkTiming {
    bytes: u64,
    elapsed: Duration,
}

/// Aggregate throughput over completed chunks.
///
/// Speed is the mean of per-chunk rates (`bytes / attempt duration`), one
/// sample per chunk index; a later timing for the same index replaces the
/// earlier one.
#[derive(Debug, Default)]
pub struct ThroughputStats {
    timings: BTreeMap<usize, ChunkTiming>,
}

impl ThroughputStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the successful attempt of chunk `index`.
    pub fn record(&mut self, index: usize, bytes: u64, elapsed: Duration) {
        self.timings.insert(index, ChunkTiming { bytes, elapsed });
    }

    /// Number of chunks with a recorded timing.
    pub fn samples(&self) -> usize {
        self.timings.len()
    }

    /// Mean per-chunk rate in bytes/second, 0.0 without usable samples.
    pub fn bytes_per_second(&self) -> f64 {
        let rates: Vec<f64> = self
            .timings
            .values()
            .filter(|t| !t.elapsed.is_zero())
            .map(|t| t.bytes as f64 / t.elapsed.as_secs_f64())
            .collect();
        if rates.is_empty() {
            return 0.0;
        }
        rates.iter().sum::<f64>() / rates.len() as f64
    }

    /// Estimates time to transfer `remaining_bytes`.
    ///
    /// Returns `None` while the rate is unknown.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let speed = self.bytes_per_second();
        if speed <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining_bytes as f64 / speed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn collecting_reporter(
        total: u64,
        interval: Duration,
    ) -> (ProgressReporter, Arc<Mutex<Vec<ByteProgress>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let reporter = ProgressReporter::new(
            7,
            total,
            interval,
            Box::new(move |p| s.lock().unwrap().push(p)),
        );
        (reporter, seen)
    }

    #[test]
    fn throttle_limits_rate() {
        let mut t = ProgressThrottle::new(Duration::from_millis(500));
        let base = Instant::now();
        assert!(t.ready(base));
        assert!(!t.ready(base + Duration::from_millis(100)));
        assert!(!t.ready(base + Duration::from_millis(499)));
        assert!(t.ready(base + Duration::from_millis(500)));
        assert!(!t.ready(base + Duration::from_millis(900)));
        assert!(t.ready(base + Duration::from_millis(1001)));
    }

    #[test]
    fn reporter_throttles_but_always_reports_completion() {
        let (reporter, seen) = collecting_reporter(1000, Duration::from_secs(60));
        reporter.report(100);
        reporter.report(200);
        reporter.report(300);
        reporter.report(1000);
        reporter.report(1000);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].bytes_sent, 100);
        assert_eq!(seen[1].bytes_sent, 1000);
        assert_eq!(seen[1].chunk_index, 7);
        assert_eq!(seen[1].total_bytes, 1000);
    }

    #[test]
    fn reporter_clamps_overshoot() {
        let (reporter, seen) = collecting_reporter(10, Duration::from_secs(60));
        reporter.report(64);
        assert_eq!(seen.lock().unwrap()[0].bytes_sent, 10);
    }

    #[test]
    fn disabled_reporter_accepts_reports() {
        let reporter = ProgressReporter::disabled(0, 10);
        reporter.report(5);
        reporter.report(10);
        reporter.report(10);
    }

    #[test]
    fn byte_progress_rate() {
        let p = ByteProgress {
            chunk_index: 0,
            bytes_sent: 1000,
            total_bytes: 2000,
            elapsed: Duration::from_millis(500),
        };
        assert_eq!(p.bytes_per_second(), 2000.0);

        let zero = ByteProgress {
            elapsed: Duration::ZERO,
            ..p
        };
        assert_eq!(zero.bytes_per_second(), 0.0);
    }

    #[test]
    fn stats_no_samples() {
        let stats = ThroughputStats::new();
        assert_eq!(stats.bytes_per_second(), 0.0);
        assert!(stats.eta(1000).is_none());
    }

    #[test]
    fn stats_mean_of_chunk_rates() {
        let mut stats = ThroughputStats::new();
        stats.record(0, 1000, Duration::from_secs(1)); // 1000 B/s
        stats.record(1, 1000, Duration::from_secs(2)); // 500 B/s
        assert_eq!(stats.samples(), 2);
        assert_eq!(stats.bytes_per_second(), 750.0);

        let eta = stats.eta(1500).unwrap();
        assert_eq!(eta, Duration::from_secs(2));
    }

    #[test]
    fn stats_ignores_zero_duration() {
        let mut stats = ThroughputStats::new();
        stats.record(0, 1000, Duration::ZERO);
        assert_eq!(stats.bytes_per_second(), 0.0);
        stats.record(1, 100, Duration::from_millis(100));
        assert_eq!(stats.bytes_per_second(), 1000.0);
    }

    #[test]
    fn stats_replace_same_index() {
        let mut stats = ThroughputStats::new();
        stats.record(0, 1000, Duration::from_secs(10));
        stats.record(0, 1000, Duration::from_secs(1));
        assert_eq!(stats.samples(), 1);
        assert_eq!(stats.bytes_per_second(), 1000.0);
    }
}
