use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Real-time counters for a running pipeline.
///
/// The pipeline updates these while it works; callers can snapshot them at any time.
pub struct PipelineMetrics {
    started_at: Mutex<Option<Instant>>,

    events_received: AtomicU64,
    events_ignored: AtomicU64,
    documents_committed: AtomicU64,
    documents_skipped: AtomicU64,
    commit_failures: AtomicU64,
    cleanup_failures: AtomicU64,
    unexpected_failures: AtomicU64,
    lock_retries: AtomicU64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            started_at: Mutex::new(None),
            events_received: AtomicU64::new(0),
            events_ignored: AtomicU64::new(0),
            documents_committed: AtomicU64::new(0),
            documents_skipped: AtomicU64::new(0),
            commit_failures: AtomicU64::new(0),
            cleanup_failures: AtomicU64::new(0),
            unexpected_failures: AtomicU64::new(0),
            lock_retries: AtomicU64::new(0),
        }
    }

    /// Mark the start of the dispatch loop; `elapsed` in snapshots counts from here.
    pub fn begin_run(&self) {
        if let Ok(mut started) = self.started_at.lock() {
            *started = Some(Instant::now());
        }
    }

    pub fn on_event_received(&self) {
        let _ = self.events_received.fetch_add(1, Ordering::SeqCst);
    }

    pub fn on_event_ignored(&self) {
        let _ = self.events_ignored.fetch_add(1, Ordering::SeqCst);
    }

    pub fn on_committed(&self) {
        let _ = self.documents_committed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn on_skipped(&self) {
        let _ = self.documents_skipped.fetch_add(1, Ordering::SeqCst);
    }

    pub fn on_commit_failure(&self) {
        let _ = self.commit_failures.fetch_add(1, Ordering::SeqCst);
    }

    pub fn on_cleanup_failure(&self) {
        let _ = self.cleanup_failures.fetch_add(1, Ordering::SeqCst);
    }

    pub fn on_unexpected_failure(&self) {
        let _ = self.unexpected_failures.fetch_add(1, Ordering::SeqCst);
    }

    /// Record the extra attempts a retried operation needed.
    pub fn on_attempts(&self, attempts: u32) {
        let retries = u64::from(attempts.saturating_sub(1));
        if retries > 0 {
            let _ = self.lock_retries.fetch_add(retries, Ordering::SeqCst);
        }
    }

    pub fn snapshot(&self) -> PipelineMetricsSnapshot {
        let elapsed = self
            .started_at
            .lock()
            .ok()
            .and_then(|started| started.map(|s| s.elapsed()));

        PipelineMetricsSnapshot {
            elapsed,
            events_received: self.events_received.load(Ordering::SeqCst),
            events_ignored: self.events_ignored.load(Ordering::SeqCst),
            documents_committed: self.documents_committed.load(Ordering::SeqCst),
            documents_skipped: self.documents_skipped.load(Ordering::SeqCst),
            commit_failures: self.commit_failures.load(Ordering::SeqCst),
            cleanup_failures: self.cleanup_failures.load(Ordering::SeqCst),
            unexpected_failures: self.unexpected_failures.load(Ordering::SeqCst),
            lock_retries: self.lock_retries.load(Ordering::SeqCst),
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable snapshot of [`PipelineMetrics`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineMetricsSnapshot {
    pub elapsed: Option<Duration>,
    pub events_received: u64,
    pub events_ignored: u64,
    pub documents_committed: u64,
    pub documents_skipped: u64,
    pub commit_failures: u64,
    pub cleanup_failures: u64,
    pub unexpected_failures: u64,
    pub lock_retries: u64,
}

impl fmt::Display for PipelineMetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "events={} (ignored={}), committed={}, skipped={}, commit_failures={}, cleanup_failures={}, unexpected={}, lock_retries={}, elapsed={:?}",
            self.events_received,
            self.events_ignored,
            self.documents_committed,
            self.documents_skipped,
            self.commit_failures,
            self.cleanup_failures,
            self.unexpected_failures,
            self.lock_retries,
            self.elapsed
        )
    }
}
