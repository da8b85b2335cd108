//! Core data model types for the ingestion pipeline.
//!
//! A [`FormDocument`] is decoded into a [`FieldMap`]; the ledger's [`HeaderSchema`] projects that map
//! into a [`TableRow`] with one value per column.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// One data row, one string per header column.
pub type TableRow = Vec<String>;

/// A dropped document as seen by the pipeline during a single pass.
///
/// Never persisted; dropped once the pass ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormDocument {
    /// Where the document was found.
    pub path: PathBuf,
    /// Raw bytes read at processing time.
    pub bytes: Vec<u8>,
}

impl FormDocument {
    /// Read the document at `path` into memory.
    pub fn read(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        Ok(Self {
            path: path.to_path_buf(),
            bytes: fs::read(path)?,
        })
    }
}

/// Field name → value mapping, kept in the order the decoder reported the fields.
///
/// Inserting a name that is already present replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMap {
    entries: Vec<(String, String)>,
}

impl FieldMap {
    /// Create an empty field map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a field value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Value for `name`, if the document had that field.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Iterate field names in decoder order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    /// Iterate `(name, value)` pairs in decoder order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for FieldMap
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = FieldMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

/// Ordered column names of the ledger (row 0 of the table store).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSchema {
    columns: Vec<String>,
}

impl HeaderSchema {
    /// Create a header from column names.
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    /// Column names in ledger order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Returns the index of a column by name, if present.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Build the row for `fields` in header order.
    ///
    /// Columns the document lacks become empty strings; fields the header lacks are dropped.
    pub fn project(&self, fields: &FieldMap) -> TableRow {
        self.columns
            .iter()
            .map(|column| fields.get(column).unwrap_or_default().to_string())
            .collect()
    }
}
