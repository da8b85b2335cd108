//! Watch an inbox directory and append every dropped PDF form to the ledger.
//!
//! Usage:
//!   form-ledger --watch-dir ./inbox --store Formulardaten.xlsx
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::Parser;
use form_ledger::config::PipelineConfig;
use form_ledger::execution::BackoffStrategy;
use form_ledger::ingestion::{
    CompositeObserver, FileObserver, IngestionPipeline, PipelineObserver, TracingObserver,
};
use form_ledger::watch::NotifySource;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "form-ledger")]
#[command(about = "Append PDF form fields from an inbox directory to a spreadsheet ledger")]
#[command(version)]
struct Args {
    /// JSON config file; flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Ledger file (.xlsx, .xlsm or .csv)
    #[arg(long)]
    store: Option<PathBuf>,

    /// Directory watched for new documents
    #[arg(long)]
    watch_dir: Option<PathBuf>,

    /// Document extension to pick up
    #[arg(long)]
    extension: Option<String>,

    /// Wait before touching a newly created file
    #[arg(long)]
    debounce_ms: Option<u64>,

    /// Attempts for a save or removal that hits a locked file
    #[arg(long)]
    retry_attempts: Option<u32>,

    /// Wait between locked-file attempts
    #[arg(long)]
    retry_delay_ms: Option<u64>,

    /// Double the wait after each locked attempt
    #[arg(long)]
    exponential_backoff: bool,

    /// Also append pipeline events to this file
    #[arg(long)]
    event_log: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> Result<(PipelineConfig, Option<PathBuf>)> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_json_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => PipelineConfig::default(),
        };

        if let Some(store) = self.store {
            config.store_path = store;
        }
        if let Some(dir) = self.watch_dir {
            config.watch_dir = dir;
        }
        if let Some(ext) = self.extension {
            config.extension = ext;
        }
        if let Some(ms) = self.debounce_ms {
            config.debounce_interval_ms = ms;
        }
        if let Some(n) = self.retry_attempts {
            config.retry_max_attempts = n;
        }
        if let Some(ms) = self.retry_delay_ms {
            config.retry_delay_ms = ms;
        }
        if self.exponential_backoff {
            config.retry_backoff = BackoffStrategy::Exponential;
        }

        config.validate().context("Invalid configuration")?;
        Ok((config, self.event_log))
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let (config, event_log) = Args::parse().into_config()?;

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    ctrlc::set_handler(move || {
        tracing::info!("Shutdown signal received, finishing current document...");
        running_clone.store(false, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    let observer: Arc<dyn PipelineObserver> = match event_log {
        Some(path) => Arc::new(CompositeObserver::new(vec![
            Arc::new(TracingObserver),
            Arc::new(FileObserver::new(path)),
        ])),
        None => Arc::new(TracingObserver),
    };

    let mut pipeline = IngestionPipeline::open(&config)
        .with_context(|| format!("Failed to open ledger {}", config.store_path.display()))?
        .with_observer(observer);
    if pipeline.store().was_created() {
        tracing::info!(store = %config.store_path.display(), "created empty ledger");
    }

    let mut source = NotifySource::watch(&config.watch_dir)
        .with_context(|| format!("Failed to watch {}", config.watch_dir.display()))?;

    let snapshot = pipeline.run(&mut source, &running);
    tracing::info!(
        committed = snapshot.documents_committed,
        skipped = snapshot.documents_skipped,
        commit_failures = snapshot.commit_failures,
        cleanup_failures = snapshot.cleanup_failures,
        "form-ledger stopped"
    );
    Ok(())
}
