//! Blocking execution helpers for the single-threaded pipeline.
//!
//! This module sits underneath [`crate::ingestion`] and provides:
//!
//! - Bounded retry-with-backoff for resource-locked failures ([`retry_while_locked`])
//! - An injectable wait abstraction ([`Sleeper`]) so debounce and backoff never sleep in tests
//! - Real-time counters for monitoring ([`PipelineMetrics`])

mod metrics;
mod retry;

pub use metrics::{PipelineMetrics, PipelineMetricsSnapshot};
pub use retry::{
    BackoffStrategy, NoopSleeper, RecordingSleeper, RetryOutcome, RetryPolicy, Sleeper, ThreadSleeper,
    retry_while_locked,
};
