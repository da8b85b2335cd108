//! Header establishment for the ledger.

use tracing::info;

use crate::error::{PipelineError, PipelineResult};
use crate::store::TableStore;
use crate::types::{FieldMap, HeaderSchema};

/// Tracks whether the ledger's column order is fixed yet.
///
/// The header comes either from an existing non-empty first row (restart) or from the field
/// order of the first document that decodes with fields. Once established it never changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaRegistry {
    established: bool,
    columns: HeaderSchema,
}

impl SchemaRegistry {
    /// Inspect the store's first row.
    pub fn initialize(store: &dyn TableStore) -> Self {
        match store.header() {
            Some(columns) => {
                info!(
                    store = %store.path().display(),
                    columns = ?columns.columns(),
                    "using existing header"
                );
                Self {
                    established: true,
                    columns,
                }
            }
            None => Self::default(),
        }
    }

    pub fn is_established(&self) -> bool {
        self.established
    }

    /// The established header (empty until established).
    pub fn columns(&self) -> &HeaderSchema {
        &self.columns
    }

    /// Return the header, establishing it from `fields` on first use.
    ///
    /// The first call writes the header row into `store`; persisting it is left to the next save.
    /// The returned columns are always the ones the store reports as its header.
    pub fn reconcile(
        &mut self,
        fields: &FieldMap,
        store: &mut dyn TableStore,
    ) -> PipelineResult<&HeaderSchema> {
        if !self.established {
            if fields.names().all(str::is_empty) {
                return Err(PipelineError::SchemaMismatch {
                    message: "cannot establish a header from a document without named fields".to_string(),
                });
            }
            store.write_header(&HeaderSchema::new(fields.names()))?;
            // The store decides what counts as a column; trailing unnamed fields do not.
            let columns = store.header().ok_or_else(|| PipelineError::SchemaMismatch {
                message: "header row was not recorded by the store".to_string(),
            })?;
            info!(
                store = %store.path().display(),
                columns = ?columns.columns(),
                "header established"
            );
            self.columns = columns;
            self.established = true;
        }
        Ok(&self.columns)
    }
}
