use std::error::Error as StdError;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Convenience result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Error type returned across the ingestion pipeline.
///
/// This is a single error enum shared by the decoder, the table stores, the change source and the
/// pipeline itself.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Underlying I/O error (e.g. file not found, permission denied, sharing violation).
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[cfg(feature = "excel")]
    /// Reading an existing workbook failed (feature-gated behind `excel`).
    #[error("excel read error: {0}")]
    Excel(#[from] calamine::Error),

    #[cfg(feature = "excel")]
    /// Writing a workbook failed (feature-gated behind `excel`).
    #[error("excel write error: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),

    /// CSV store error.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// The PDF could not be parsed.
    #[error("pdf error: {0}")]
    Pdf(#[from] lopdf::Error),

    /// The filesystem notification backend failed.
    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),

    /// A configuration file could not be parsed.
    #[error("config parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),

    /// Configuration values are out of range or inconsistent.
    #[error("invalid configuration: {message}")]
    Config { message: String },

    /// The store path does not map to a supported table format.
    #[error("unsupported table store: {message}")]
    UnsupportedStore { message: String },

    /// A row or header does not fit the table's established header.
    #[error("schema mismatch: {message}")]
    SchemaMismatch { message: String },

    /// Form fields could not be decoded from a document.
    #[error("decode error: {message}")]
    Decode { message: String },

    /// The row was appended in memory but never persisted.
    #[error("commit failed for '{}' after {attempts} attempt(s): {source}", path.display())]
    CommitFailed {
        path: PathBuf,
        attempts: u32,
        #[source]
        source: Box<PipelineError>,
    },

    /// The row was committed but the source document could not be removed.
    #[error("cleanup failed for '{}' after {attempts} attempt(s): {source}", path.display())]
    CleanupFailed {
        path: PathBuf,
        attempts: u32,
        #[source]
        source: Box<PipelineError>,
    },

    /// Anything else that went wrong while processing a single document.
    #[error("unexpected failure: {message}")]
    Unexpected { message: String },
}

impl PipelineError {
    /// Returns `true` when the failure means another process currently holds the target file.
    ///
    /// This is the only condition the retry helpers treat as transient.
    pub fn is_resource_locked(&self) -> bool {
        match self {
            PipelineError::Csv(err) => match err.kind() {
                csv::ErrorKind::Io(io_err) => io_error_is_locked(io_err),
                _ => false,
            },
            #[cfg(feature = "excel")]
            PipelineError::Excel(calamine::Error::Io(io_err)) => io_error_is_locked(io_err),
            other => error_chain_is_locked(other),
        }
    }
}

fn error_chain_is_locked(e: &(dyn StdError + 'static)) -> bool {
    let mut cur: Option<&(dyn StdError + 'static)> = Some(e);
    while let Some(err) = cur {
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            return io_error_is_locked(io_err);
        }
        cur = err.source();
    }
    false
}

/// Classify an I/O error as a resource-locked condition.
pub fn io_error_is_locked(err: &io::Error) -> bool {
    if matches!(
        err.kind(),
        io::ErrorKind::PermissionDenied | io::ErrorKind::WouldBlock | io::ErrorKind::ResourceBusy
    ) {
        return true;
    }
    // ERROR_SHARING_VIOLATION / ERROR_LOCK_VIOLATION: the file is open in another program.
    cfg!(windows) && matches!(err.raw_os_error(), Some(32) | Some(33))
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::path::PathBuf;

    use super::{PipelineError, io_error_is_locked};

    #[test]
    fn permission_denied_counts_as_locked() {
        let err = io::Error::from(io::ErrorKind::PermissionDenied);
        assert!(io_error_is_locked(&err));
        assert!(PipelineError::Io(err).is_resource_locked());
    }

    #[test]
    fn not_found_is_not_locked() {
        let err = PipelineError::Io(io::Error::from(io::ErrorKind::NotFound));
        assert!(!err.is_resource_locked());
    }

    #[test]
    fn domain_errors_are_not_locked() {
        let err = PipelineError::SchemaMismatch {
            message: "row width".to_string(),
        };
        assert!(!err.is_resource_locked());
    }

    #[test]
    fn lock_is_found_through_wrapping_errors() {
        let inner = PipelineError::Io(io::Error::from(io::ErrorKind::WouldBlock));
        let wrapped = PipelineError::CommitFailed {
            path: PathBuf::from("ledger.xlsx"),
            attempts: 5,
            source: Box::new(inner),
        };
        assert!(wrapped.is_resource_locked());
        assert!(wrapped.to_string().contains("after 5 attempt(s)"));
    }
}
