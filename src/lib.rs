//! `form-ledger` watches an inbox directory for fillable PDF forms and appends each form's field
//! values as one row of a spreadsheet ledger.
//!
//! The first form with fields fixes the ledger's column order (its header row). Every later form
//! is projected onto that header: unknown fields are dropped, missing ones become empty cells.
//! A source document is deleted only after its row has been written to disk.
//!
//! ## Ledger formats (chosen by the store path's extension)
//!
//! - **Excel workbook** (requires the Cargo feature `excel`, on by default): `.xlsx`, `.xlsm`
//! - **CSV**: `.csv`
//!
//! A missing ledger is created empty. In a workbook the first worksheet is the ledger; any other
//! worksheets are carried through saves unchanged.
//!
//! ## Quick example: process one document
//!
//! ```no_run
//! use form_ledger::config::PipelineConfig;
//! use form_ledger::ingestion::IngestionPipeline;
//!
//! # fn main() -> Result<(), form_ledger::PipelineError> {
//! let config = PipelineConfig {
//!     store_path: "Formulardaten.xlsx".into(),
//!     ..PipelineConfig::default()
//! };
//! let mut pipeline = IngestionPipeline::open(&config)?;
//! let outcome = pipeline.process("inbox/order123.pdf".as_ref());
//! println!("{outcome:?}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Watching a directory
//!
//! ```no_run
//! use std::sync::atomic::AtomicBool;
//!
//! use form_ledger::config::PipelineConfig;
//! use form_ledger::ingestion::IngestionPipeline;
//! use form_ledger::watch::NotifySource;
//!
//! # fn main() -> Result<(), form_ledger::PipelineError> {
//! let config = PipelineConfig::default();
//! let mut pipeline = IngestionPipeline::open(&config)?;
//! let mut source = NotifySource::watch(&config.watch_dir)?;
//! let running = AtomicBool::new(true);
//! let snapshot = pipeline.run(&mut source, &running);
//! println!("{snapshot}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`ingestion`]: the pipeline, header registry and observers
//! - [`decode`]: form-field extraction from PDF documents
//! - [`store`]: xlsx/csv ledgers behind the [`store::TableStore`] trait
//! - [`watch`]: directory change sources
//! - [`execution`]: lock-aware retry and run metrics
//! - [`config`]: JSON configuration
//! - [`types`]: field maps, header schema and rows
//! - [`error`]: the crate error type

pub mod config;
pub mod decode;
pub mod error;
pub mod execution;
pub mod ingestion;
pub mod store;
pub mod types;
pub mod watch;

pub use error::{PipelineError, PipelineResult};
