//! The ingestion pipeline and its collaborators.
//!
//! Most callers build an [`IngestionPipeline`] (from [`pipeline`]) with
//! [`IngestionPipeline::open`] and hand it a [`crate::watch::ChangeSource`]. The pipeline:
//!
//! - waits out the debounce interval, then decodes the dropped document
//! - establishes or reuses the ledger header via [`SchemaRegistry`]
//! - appends one row, persists it, then removes the source
//! - reports outcomes and failures to a [`PipelineObserver`]

pub mod observability;
pub mod pipeline;
pub mod schema;

pub use observability::{
    CommitStats, CompositeObserver, DocumentContext, FileObserver, PipelineObserver, PipelineSeverity,
    TracingObserver, severity_for_error,
};
pub use pipeline::{CleanupResult, CommitResult, FsRemover, IngestionPipeline, ProcessOutcome, SourceRemover};
pub use schema::SchemaRegistry;
