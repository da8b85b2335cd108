//! Pipeline configuration.
//!
//! Every key is optional; missing keys take the defaults of [`PipelineConfig::default`]. Files use
//! camelCase JSON keys:
//!
//! ```json
//! {
//!   "storePath": "Formulardaten.xlsx",
//!   "watchDir": "inbox",
//!   "extension": "pdf",
//!   "debounceIntervalMs": 500,
//!   "retryMaxAttempts": 5,
//!   "retryDelayMs": 1000,
//!   "retryBackoff": "exponential"
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};
use crate::execution::{BackoffStrategy, RetryPolicy};
use crate::store::StoreFormat;

/// Default ledger file name, created in the working directory.
pub const DEFAULT_STORE_FILE: &str = "Formulardaten.xlsx";

/// Options controlling the ingestion pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PipelineConfig {
    /// Tabular file rows are appended to.
    pub store_path: PathBuf,
    /// Flat directory watched for new documents.
    pub watch_dir: PathBuf,
    /// Recognized document suffix, matched case-insensitively. A leading dot is optional.
    pub extension: String,
    /// Wait between event arrival and first touching the file.
    pub debounce_interval_ms: u64,
    pub retry_max_attempts: u32,
    pub retry_delay_ms: u64,
    pub retry_backoff: BackoffStrategy,
    /// Cap for a single exponential backoff wait.
    pub retry_max_delay_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from(DEFAULT_STORE_FILE),
            watch_dir: PathBuf::from("."),
            extension: "pdf".to_string(),
            debounce_interval_ms: 500,
            retry_max_attempts: 5,
            retry_delay_ms: 1_000,
            retry_backoff: BackoffStrategy::Fixed,
            retry_max_delay_ms: 30_000,
        }
    }
}

impl PipelineConfig {
    /// Load a config file. Keys the file omits keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> PipelineResult<()> {
        if self.retry_max_attempts == 0 {
            return Err(PipelineError::Config {
                message: "retryMaxAttempts must be at least 1".to_string(),
            });
        }
        if self.normalized_extension().is_empty() {
            return Err(PipelineError::Config {
                message: "extension must not be empty".to_string(),
            });
        }
        StoreFormat::from_path(&self.store_path)?;
        Ok(())
    }

    /// Extension without a leading dot, lowercased.
    pub fn normalized_extension(&self) -> String {
        self.extension.trim().trim_start_matches('.').to_ascii_lowercase()
    }

    pub fn debounce_interval(&self) -> Duration {
        Duration::from_millis(self.debounce_interval_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            delay: Duration::from_millis(self.retry_delay_ms),
            strategy: self.retry_backoff,
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use super::PipelineConfig;
    use crate::execution::BackoffStrategy;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: PipelineConfig =
            serde_json::from_str(r#"{"watchDir":"inbox","retryBackoff":"exponential"}"#).unwrap();

        assert_eq!(cfg.watch_dir, PathBuf::from("inbox"));
        assert_eq!(cfg.retry_backoff, BackoffStrategy::Exponential);
        assert_eq!(cfg.store_path, PathBuf::from("Formulardaten.xlsx"));
        assert_eq!(cfg.debounce_interval(), Duration::from_millis(500));
        assert_eq!(cfg.retry_policy().max_attempts, 5);
    }

    #[test]
    fn extension_is_normalized() {
        let cfg = PipelineConfig {
            extension: " .PDF".to_string(),
            ..Default::default()
        };
        assert_eq!(cfg.normalized_extension(), "pdf");
    }

    #[test]
    fn validate_rejects_zero_attempts_and_unknown_store() {
        let zero = PipelineConfig {
            retry_max_attempts: 0,
            ..Default::default()
        };
        assert!(zero.validate().unwrap_err().to_string().contains("retryMaxAttempts"));

        let unknown = PipelineConfig {
            store_path: PathBuf::from("ledger.parquet"),
            ..Default::default()
        };
        assert!(unknown.validate().is_err());

        let csv = PipelineConfig {
            store_path: PathBuf::from("ledger.csv"),
            ..Default::default()
        };
        assert!(csv.validate().is_ok());
    }
}
