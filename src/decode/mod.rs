//! Form-field extraction.
//!
//! A [`FieldDecoder`] turns a document into a [`FieldMap`]. It never fails past its boundary:
//! every problem becomes a [`DecodeResult`] the pipeline matches on.

pub mod pdf;

use std::fmt;
use std::path::Path;

use crate::error::PipelineError;
use crate::types::{FieldMap, FormDocument};

pub use pdf::PdfFormDecoder;

/// What a decoder made of one document.
#[derive(Debug)]
pub enum DecodeResult {
    /// At least one field was found.
    Fields(FieldMap),
    /// The document has no interactive fields.
    NoFields,
    /// The document could not be read or parsed.
    Unreadable(PipelineError),
}

impl DecodeResult {
    /// `Fields` for a non-empty map, `NoFields` otherwise.
    pub fn from_fields(fields: FieldMap) -> Self {
        if fields.is_empty() {
            DecodeResult::NoFields
        } else {
            DecodeResult::Fields(fields)
        }
    }
}

/// Why a document produced no row. Both cases leave the source file in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    NoFields,
    Unreadable { message: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoFields => f.write_str("document has no form fields"),
            SkipReason::Unreadable { message } => write!(f, "document unreadable: {message}"),
        }
    }
}

/// Extracts named field values from a document.
pub trait FieldDecoder: Send {
    /// Decode an in-memory document.
    fn decode_document(&self, document: &FormDocument) -> DecodeResult;

    /// Read `path` and decode it. A read failure is reported as [`DecodeResult::Unreadable`].
    fn decode(&self, path: &Path) -> DecodeResult {
        match FormDocument::read(path) {
            Ok(document) => self.decode_document(&document),
            Err(err) => DecodeResult::Unreadable(err.into()),
        }
    }
}
