//! The ingestion pipeline: debounce → decode → reconcile → commit → cleanup.
//!
//! One [`IngestionPipeline`] owns the ledger for the life of the process. Events are handled one
//! at a time; the next event is not looked at until [`IngestionPipeline::process`] returns.
//!
//! The source document is removed only after its row is committed. A document whose row could
//! not be persisted stays where it was dropped.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::decode::{DecodeResult, FieldDecoder, PdfFormDecoder, SkipReason};
use crate::error::{PipelineError, PipelineResult};
use crate::execution::{
    PipelineMetrics, PipelineMetricsSnapshot, RetryPolicy, Sleeper, ThreadSleeper, retry_while_locked,
};
use crate::store::{TableStore, open_store};
use crate::types::TableRow;
use crate::watch::{ChangeSource, CreationEvent, SourcePoll, is_candidate};

use super::observability::{
    CommitStats, DocumentContext, PipelineObserver, PipelineSeverity, TracingObserver, severity_for_error,
};
use super::schema::SchemaRegistry;

/// How long the dispatch loop waits for an event before re-checking the stop flag.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Removes committed source documents.
pub trait SourceRemover: Send + Sync {
    fn remove(&self, path: &Path) -> io::Result<()>;
}

/// Deletes files from the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsRemover;

impl SourceRemover for FsRemover {
    fn remove(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }
}

/// Result of persisting one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitResult {
    Committed { row_number: usize, attempts: u32 },
    /// Persistence never succeeded; the row was rolled back.
    Failed { attempts: u32 },
}

/// Result of removing a committed source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupResult {
    Removed { attempts: u32 },
    /// Someone else removed it first.
    AlreadyGone,
    /// Still locked (or otherwise undeletable); the file stays on disk.
    Retained { attempts: u32 },
}

/// What happened to one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The row was persisted as data row `row_number`.
    Committed { row_number: usize, cleanup: CleanupResult },
    /// The unchanged file was committed earlier but not removed; only removal was retried.
    AlreadyCommitted { cleanup: CleanupResult },
    /// No row; the file stays on disk.
    Skipped(SkipReason),
    /// The row could not be persisted; the file stays on disk.
    CommitFailed { attempts: u32 },
    /// Anything else went wrong; the file stays on disk.
    Failed { message: String },
}

impl ProcessOutcome {
    /// `true` when a row for this document is in the ledger.
    pub fn is_committed(&self) -> bool {
        matches!(
            self,
            ProcessOutcome::Committed { .. } | ProcessOutcome::AlreadyCommitted { .. }
        )
    }
}

/// Identity of a source file at commit time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SourceStamp {
    len: u64,
    modified: Option<SystemTime>,
}

impl SourceStamp {
    fn of(path: &Path) -> Option<Self> {
        let meta = fs::metadata(path).ok()?;
        Some(Self {
            len: meta.len(),
            modified: meta.modified().ok(),
        })
    }
}

/// Drives documents from a [`ChangeSource`] into a [`TableStore`].
pub struct IngestionPipeline {
    extension: String,
    debounce: Duration,
    retry: RetryPolicy,
    decoder: Box<dyn FieldDecoder>,
    store: Box<dyn TableStore>,
    registry: SchemaRegistry,
    sleeper: Arc<dyn Sleeper>,
    remover: Arc<dyn SourceRemover>,
    observer: Arc<dyn PipelineObserver>,
    alert_at_or_above: PipelineSeverity,
    metrics: Arc<PipelineMetrics>,
    awaiting_cleanup: HashMap<PathBuf, SourceStamp>,
    uncommitted_row: bool,
}

impl fmt::Debug for IngestionPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestionPipeline")
            .field("store", &self.store.path())
            .field("extension", &self.extension)
            .field("debounce", &self.debounce)
            .field("retry", &self.retry)
            .field("header_established", &self.registry.is_established())
            .field("alert_at_or_above", &self.alert_at_or_above)
            .finish()
    }
}

impl IngestionPipeline {
    /// Create a pipeline over an already-opened store.
    ///
    /// The header is picked up from the store's first row if it has one.
    pub fn new(config: &PipelineConfig, decoder: Box<dyn FieldDecoder>, store: Box<dyn TableStore>) -> Self {
        let registry = SchemaRegistry::initialize(store.as_ref());
        Self {
            extension: config.normalized_extension(),
            debounce: config.debounce_interval(),
            retry: config.retry_policy(),
            decoder,
            store,
            registry,
            sleeper: Arc::new(ThreadSleeper),
            remover: Arc::new(FsRemover),
            observer: Arc::new(TracingObserver),
            alert_at_or_above: PipelineSeverity::Critical,
            metrics: Arc::new(PipelineMetrics::new()),
            awaiting_cleanup: HashMap::new(),
            uncommitted_row: false,
        }
    }

    /// Validate `config`, open (or create) its ledger and decode PDFs.
    pub fn open(config: &PipelineConfig) -> PipelineResult<Self> {
        config.validate()?;
        let store = open_store(&config.store_path)?;
        Ok(Self::new(config, Box::new(PdfFormDecoder::new()), store))
    }

    /// Replace the default [`TracingObserver`].
    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Replace the real sleeper used for debounce and backoff.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_remover(mut self, remover: Arc<dyn SourceRemover>) -> Self {
        self.remover = remover;
        self
    }

    /// Severity at which `on_alert` fires (default: Critical).
    pub fn with_alert_threshold(mut self, severity: PipelineSeverity) -> Self {
        self.alert_at_or_above = severity;
        self
    }

    /// Get a handle to real-time pipeline metrics.
    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn store(&self) -> &dyn TableStore {
        self.store.as_ref()
    }

    /// Committed sources whose removal failed and that are still on disk as of the last document.
    pub fn pending_cleanups(&self) -> usize {
        self.awaiting_cleanup.len()
    }

    /// Run the dispatch loop until `running` is cleared or the source closes.
    ///
    /// A clear of `running` takes effect once the document in flight is finished.
    pub fn run(&mut self, source: &mut dyn ChangeSource, running: &AtomicBool) -> PipelineMetricsSnapshot {
        self.metrics.begin_run();
        info!(
            store = %self.store.path().display(),
            extension = %self.extension,
            header_established = self.registry.is_established(),
            "pipeline running"
        );

        while running.load(Ordering::SeqCst) {
            match source.poll_event(POLL_INTERVAL) {
                SourcePoll::Event(event) => self.dispatch(event),
                SourcePoll::Idle => {}
                SourcePoll::Closed => {
                    warn!("change source closed");
                    break;
                }
            }
        }

        let snapshot = self.metrics.snapshot();
        info!(%snapshot, "pipeline stopped");
        snapshot
    }

    fn dispatch(&mut self, event: CreationEvent) {
        self.metrics.on_event_received();
        if !is_candidate(&event.path, &self.extension) {
            self.metrics.on_event_ignored();
            debug!(path = %event.path.display(), "ignoring event");
            return;
        }
        let outcome = self.process(&event.path);
        debug!(path = %event.path.display(), outcome = ?outcome, "event handled");
    }

    /// Handle one dropped document from start to finish.
    ///
    /// Never panics and never returns an error: every failure is reported to the observer and
    /// folded into the returned [`ProcessOutcome`].
    pub fn process(&mut self, path: &Path) -> ProcessOutcome {
        let ctx = DocumentContext {
            path: path.to_path_buf(),
            store_path: self.store.path().to_path_buf(),
        };

        let result = panic::catch_unwind(AssertUnwindSafe(|| self.process_document(path, &ctx)));
        let error = match result {
            Ok(Ok(outcome)) => return outcome,
            Ok(Err(err)) => err,
            Err(payload) => PipelineError::Unexpected {
                message: panic_message(payload.as_ref()),
            },
        };

        if self.uncommitted_row {
            self.store.discard_last_row();
            self.uncommitted_row = false;
        }
        self.metrics.on_unexpected_failure();
        self.report_failure(&ctx, &error);
        ProcessOutcome::Failed {
            message: error.to_string(),
        }
    }

    fn process_document(&mut self, path: &Path, ctx: &DocumentContext) -> PipelineResult<ProcessOutcome> {
        // Give the producer time to finish writing and release the file.
        self.sleeper.sleep(self.debounce);

        self.prune_pending_cleanups();
        if let Some(outcome) = self.retry_pending_cleanup(path, ctx) {
            return Ok(outcome);
        }

        let stamp = SourceStamp::of(path);
        let fields = match self.decoder.decode(path) {
            DecodeResult::Fields(fields) => fields,
            DecodeResult::NoFields => return Ok(self.skip(ctx, SkipReason::NoFields)),
            DecodeResult::Unreadable(err) => {
                return Ok(self.skip(
                    ctx,
                    SkipReason::Unreadable {
                        message: err.to_string(),
                    },
                ));
            }
        };

        let row = self
            .registry
            .reconcile(&fields, self.store.as_mut())?
            .project(&fields);
        let columns = row.len();

        let (row_number, save_attempts) = match self.commit(row, ctx)? {
            CommitResult::Committed {
                row_number,
                attempts,
            } => (row_number, attempts),
            CommitResult::Failed { attempts } => return Ok(ProcessOutcome::CommitFailed { attempts }),
        };
        self.metrics.on_committed();
        self.observer.on_committed(
            ctx,
            CommitStats {
                row_number,
                columns,
                save_attempts,
            },
        );

        let cleanup = self.cleanup(path, ctx);
        if let (CleanupResult::Retained { .. }, Some(stamp)) = (cleanup, stamp) {
            self.awaiting_cleanup.insert(path.to_path_buf(), stamp);
        }
        Ok(ProcessOutcome::Committed { row_number, cleanup })
    }

    /// Forget retained sources that have disappeared since their commit.
    fn prune_pending_cleanups(&mut self) {
        self.awaiting_cleanup.retain(|pending, _| {
            let present = SourceStamp::of(pending).is_some();
            if !present {
                debug!(path = %pending.display(), "retained source is gone");
            }
            present
        });
    }

    fn retry_pending_cleanup(&mut self, path: &Path, ctx: &DocumentContext) -> Option<ProcessOutcome> {
        let stamp = self.awaiting_cleanup.get(path).copied()?;
        if SourceStamp::of(path) != Some(stamp) {
            // Replaced by a new document under the same name.
            self.awaiting_cleanup.remove(path);
            return None;
        }

        info!(path = %path.display(), "already committed, retrying removal only");
        let cleanup = self.cleanup(path, ctx);
        if !matches!(cleanup, CleanupResult::Retained { .. }) {
            self.awaiting_cleanup.remove(path);
        }
        Some(ProcessOutcome::AlreadyCommitted { cleanup })
    }

    fn skip(&self, ctx: &DocumentContext, reason: SkipReason) -> ProcessOutcome {
        self.metrics.on_skipped();
        self.observer.on_skipped(ctx, &reason);
        ProcessOutcome::Skipped(reason)
    }

    /// Append `row` and persist the ledger, rolling the row back if persistence never succeeds.
    fn commit(&mut self, row: TableRow, ctx: &DocumentContext) -> PipelineResult<CommitResult> {
        let row_number = self.store.append_row(row)?;
        self.uncommitted_row = true;

        let store = self.store.as_mut();
        let outcome = retry_while_locked(&self.retry, self.sleeper.as_ref(), "save ledger", || store.save());
        self.metrics.on_attempts(outcome.attempts());

        match outcome.into_result() {
            Ok(((), attempts)) => {
                self.uncommitted_row = false;
                Ok(CommitResult::Committed {
                    row_number,
                    attempts,
                })
            }
            Err((source, attempts)) => {
                self.store.discard_last_row();
                self.uncommitted_row = false;
                self.metrics.on_commit_failure();
                let error = PipelineError::CommitFailed {
                    path: ctx.path.clone(),
                    attempts,
                    source: Box::new(source),
                };
                self.report_failure(ctx, &error);
                Ok(CommitResult::Failed { attempts })
            }
        }
    }

    fn cleanup(&self, path: &Path, ctx: &DocumentContext) -> CleanupResult {
        let remover = self.remover.as_ref();
        let outcome = retry_while_locked(&self.retry, self.sleeper.as_ref(), "remove source", || {
            match remover.remove(path) {
                Ok(()) => Ok(true),
                Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
                Err(err) => Err(err.into()),
            }
        });
        self.metrics.on_attempts(outcome.attempts());

        match outcome.into_result() {
            Ok((true, attempts)) => CleanupResult::Removed { attempts },
            Ok((false, _)) => CleanupResult::AlreadyGone,
            Err((source, attempts)) => {
                self.metrics.on_cleanup_failure();
                let error = PipelineError::CleanupFailed {
                    path: ctx.path.clone(),
                    attempts,
                    source: Box::new(source),
                };
                self.report_failure(ctx, &error);
                CleanupResult::Retained { attempts }
            }
        }
    }

    fn report_failure(&self, ctx: &DocumentContext, error: &PipelineError) {
        let severity = severity_for_error(error);
        self.observer.on_failure(ctx, severity, error);
        if severity >= self.alert_at_or_above {
            self.observer.on_alert(ctx, severity, error);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic with a non-string payload".to_string()
    }
}
