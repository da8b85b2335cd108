use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{error, info, warn};

use crate::decode::SkipReason;
use crate::error::PipelineError;

/// Severity classification used for observer callbacks and alerting thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PipelineSeverity {
    /// Informational event.
    Info,
    /// Warning-level event (non-fatal).
    Warning,
    /// Error-level event (the document's work did not finish).
    Error,
    /// Critical error (data was not persisted).
    Critical,
}

/// The document a callback is about.
#[derive(Debug, Clone)]
pub struct DocumentContext {
    /// Source document path.
    pub path: PathBuf,
    /// Ledger the row goes to.
    pub store_path: PathBuf,
}

/// Reported when a row is durably persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitStats {
    /// 1-based data row number in the ledger.
    pub row_number: usize,
    /// Number of header columns the row was projected onto.
    pub columns: usize,
    /// Save attempts needed (1 when the ledger was not locked).
    pub save_attempts: u32,
}

/// Observer interface for pipeline outcomes.
///
/// Implementors can record metrics, logs, or trigger alerts.
pub trait PipelineObserver: Send + Sync {
    /// Called when a document's row is committed.
    fn on_committed(&self, _ctx: &DocumentContext, _stats: CommitStats) {}

    /// Called when a document decodes to nothing and is left in place.
    fn on_skipped(&self, _ctx: &DocumentContext, _reason: &SkipReason) {}

    /// Called on commit, cleanup and unexpected failures.
    fn on_failure(&self, _ctx: &DocumentContext, _severity: PipelineSeverity, _error: &PipelineError) {}

    /// Called when a failure meets the alert threshold.
    ///
    /// Default behavior forwards to [`Self::on_failure`].
    fn on_alert(&self, ctx: &DocumentContext, severity: PipelineSeverity, error: &PipelineError) {
        self.on_failure(ctx, severity, error)
    }
}

/// An observer that fans out callbacks to a list of observers.
#[derive(Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn PipelineObserver>>,
}

impl CompositeObserver {
    /// Create a new composite observer from a list of observers.
    pub fn new(observers: Vec<Arc<dyn PipelineObserver>>) -> Self {
        Self { observers }
    }
}

impl fmt::Debug for CompositeObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeObserver")
            .field("observers_len", &self.observers.len())
            .finish()
    }
}

impl PipelineObserver for CompositeObserver {
    fn on_committed(&self, ctx: &DocumentContext, stats: CommitStats) {
        for o in &self.observers {
            o.on_committed(ctx, stats);
        }
    }

    fn on_skipped(&self, ctx: &DocumentContext, reason: &SkipReason) {
        for o in &self.observers {
            o.on_skipped(ctx, reason);
        }
    }

    fn on_failure(&self, ctx: &DocumentContext, severity: PipelineSeverity, error: &PipelineError) {
        for o in &self.observers {
            o.on_failure(ctx, severity, error);
        }
    }

    fn on_alert(&self, ctx: &DocumentContext, severity: PipelineSeverity, error: &PipelineError) {
        for o in &self.observers {
            o.on_alert(ctx, severity, error);
        }
    }
}

/// Emits pipeline events as structured `tracing` records.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl PipelineObserver for TracingObserver {
    fn on_committed(&self, ctx: &DocumentContext, stats: CommitStats) {
        info!(
            path = %ctx.path.display(),
            store = %ctx.store_path.display(),
            row = stats.row_number,
            save_attempts = stats.save_attempts,
            "document committed"
        );
    }

    fn on_skipped(&self, ctx: &DocumentContext, reason: &SkipReason) {
        warn!(path = %ctx.path.display(), reason = %reason, "document skipped, source retained");
    }

    fn on_failure(&self, ctx: &DocumentContext, severity: PipelineSeverity, error: &PipelineError) {
        match severity {
            PipelineSeverity::Info => info!(path = %ctx.path.display(), error = %error, "pipeline notice"),
            PipelineSeverity::Warning => {
                warn!(path = %ctx.path.display(), error = %error, "pipeline warning")
            }
            PipelineSeverity::Error | PipelineSeverity::Critical => error!(
                path = %ctx.path.display(),
                severity = ?severity,
                error = %error,
                "pipeline failure"
            ),
        }
    }

    fn on_alert(&self, ctx: &DocumentContext, severity: PipelineSeverity, error: &PipelineError) {
        error!(
            alert = true,
            path = %ctx.path.display(),
            store = %ctx.store_path.display(),
            severity = ?severity,
            error = %error,
            "ALERT"
        );
    }
}

/// Appends pipeline events to a local log file.
#[derive(Debug)]
pub struct FileObserver {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileObserver {
    /// Create a file observer that appends events to `path`.
    ///
    /// Writes are best-effort; failures to open/write the log file are ignored.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    fn append_line(&self, line: &str) {
        let _guard = self.lock.lock().ok();
        if let Ok(mut f) = OpenOptions::new().create(true).append(true).open(&self.path) {
            let _ = writeln!(f, "{line}");
        }
    }
}

impl PipelineObserver for FileObserver {
    fn on_committed(&self, ctx: &DocumentContext, stats: CommitStats) {
        self.append_line(&format!(
            "{} committed path={} row={} attempts={}",
            unix_ts(),
            ctx.path.display(),
            stats.row_number,
            stats.save_attempts
        ));
    }

    fn on_skipped(&self, ctx: &DocumentContext, reason: &SkipReason) {
        self.append_line(&format!(
            "{} skipped path={} reason={}",
            unix_ts(),
            ctx.path.display(),
            reason
        ));
    }

    fn on_failure(&self, ctx: &DocumentContext, severity: PipelineSeverity, error: &PipelineError) {
        self.append_line(&format!(
            "{} fail severity={:?} path={} err={}",
            unix_ts(),
            severity,
            ctx.path.display(),
            error
        ));
    }

    fn on_alert(&self, ctx: &DocumentContext, severity: PipelineSeverity, error: &PipelineError) {
        self.append_line(&format!(
            "{} ALERT severity={:?} path={} err={}",
            unix_ts(),
            severity,
            ctx.path.display(),
            error
        ));
    }
}

/// Severity for a failure surfaced by the pipeline.
pub fn severity_for_error(e: &PipelineError) -> PipelineSeverity {
    match e {
        PipelineError::CommitFailed { .. } => PipelineSeverity::Critical,
        PipelineError::CleanupFailed { .. } => PipelineSeverity::Error,
        PipelineError::Decode { .. } => PipelineSeverity::Warning,
        _ => PipelineSeverity::Error,
    }
}

fn unix_ts() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
