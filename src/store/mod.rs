//! Tabular ledger persistence.
//!
//! A ledger is an ordered grid of string cells: row 0 is the header, rows 1..N are data rows that
//! are only ever appended. Backends keep the whole grid in memory ([`TableData`]) and persist by
//! rewriting the file:
//!
//! - [`xlsx::XlsxStore`] for `.xlsx` / `.xlsm` (requires the Cargo feature `excel`)
//! - [`csv::CsvStore`] for `.csv`
//!
//! Use [`open_store`] to pick the backend from the file extension.

pub mod csv;
#[cfg(feature = "excel")]
pub mod xlsx;

use std::fs::{self, File};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, PipelineResult};
use crate::types::{HeaderSchema, TableRow};

/// Supported ledger file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreFormat {
    /// Office Open XML workbook (feature-gated behind `excel`).
    Xlsx,
    /// Comma-separated values.
    Csv,
}

impl StoreFormat {
    /// Parse a store format from a file extension (case-insensitive).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "xlsx" | "xlsm" => Some(Self::Xlsx),
            "csv" => Some(Self::Csv),
            _ => None,
        }
    }

    /// Infer the store format from a path's extension.
    pub fn from_path(path: &Path) -> PipelineResult<Self> {
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .ok_or_else(|| PipelineError::UnsupportedStore {
                message: format!("store path has no extension ({})", path.display()),
            })?;

        Self::from_extension(ext).ok_or_else(|| PipelineError::UnsupportedStore {
            message: format!(
                "no table store for extension '{ext}' ({})",
                path.display()
            ),
        })
    }
}

/// In-memory grid shared by every backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableData {
    rows: Vec<Vec<String>>,
}

impl TableData {
    pub fn new(rows: Vec<Vec<String>>) -> Self {
        Self { rows }
    }

    /// All rows, header first.
    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// Number of data rows (excluding the header row).
    pub fn data_row_count(&self) -> usize {
        self.rows.len().saturating_sub(1)
    }

    /// The header, when row 0 exists and has at least one non-empty cell.
    ///
    /// Trailing empty cells are not columns.
    pub fn header(&self) -> Option<HeaderSchema> {
        let first = self.rows.first()?;
        let width = first.iter().rposition(|c| !c.is_empty())? + 1;
        Some(HeaderSchema::new(first[..width].iter().cloned()))
    }

    /// Write `header` as row 0.
    ///
    /// Fails when row 0 already holds a header; an empty row 0 is replaced.
    pub fn write_header(&mut self, header: &HeaderSchema) -> PipelineResult<()> {
        if header.is_empty() {
            return Err(PipelineError::SchemaMismatch {
                message: "header must have at least one column".to_string(),
            });
        }
        if let Some(existing) = self.header() {
            return Err(PipelineError::SchemaMismatch {
                message: format!(
                    "header already established: {:?}",
                    existing.columns()
                ),
            });
        }
        let row = header.columns().to_vec();
        match self.rows.first_mut() {
            Some(first) => *first = row,
            None => self.rows.push(row),
        }
        Ok(())
    }

    /// Append a data row and return its 1-based data row number.
    pub fn append_row(&mut self, row: TableRow) -> PipelineResult<usize> {
        let header = self.header().ok_or_else(|| PipelineError::SchemaMismatch {
            message: "cannot append a data row before the header is established".to_string(),
        })?;
        if row.len() != header.len() {
            return Err(PipelineError::SchemaMismatch {
                message: format!(
                    "row has {} values but the header has {} columns",
                    row.len(),
                    header.len()
                ),
            });
        }
        self.rows.push(row);
        Ok(self.data_row_count())
    }

    /// Remove the most recent data row (never the header).
    pub fn discard_last_row(&mut self) -> Option<TableRow> {
        if self.rows.len() > 1 { self.rows.pop() } else { None }
    }
}

/// Open/append/save contract for a ledger file.
///
/// Implementors only supply storage; the header and row rules live in [`TableData`].
pub trait TableStore: Send {
    /// Location of the ledger file.
    fn path(&self) -> &Path;

    /// `true` when the file did not exist and was created by this process.
    fn was_created(&self) -> bool;

    fn table(&self) -> &TableData;

    fn table_mut(&mut self) -> &mut TableData;

    /// Persist the in-memory grid.
    fn save(&mut self) -> PipelineResult<()>;

    fn header(&self) -> Option<HeaderSchema> {
        self.table().header()
    }

    fn write_header(&mut self, header: &HeaderSchema) -> PipelineResult<()> {
        self.table_mut().write_header(header)
    }

    fn append_row(&mut self, row: TableRow) -> PipelineResult<usize> {
        self.table_mut().append_row(row)
    }

    fn discard_last_row(&mut self) -> Option<TableRow> {
        self.table_mut().discard_last_row()
    }
}

/// Open the ledger at `path`, creating an empty one when it does not exist yet.
///
/// The backend is chosen by [`StoreFormat::from_path`].
pub fn open_store(path: impl AsRef<Path>) -> PipelineResult<Box<dyn TableStore>> {
    let path = path.as_ref();
    match StoreFormat::from_path(path)? {
        StoreFormat::Csv => Ok(Box::new(csv::CsvStore::open_or_create(path)?)),
        StoreFormat::Xlsx => open_xlsx(path),
    }
}

fn open_xlsx(path: &Path) -> PipelineResult<Box<dyn TableStore>> {
    // Avoid unused warnings when the feature is off.
    let _ = path;

    #[cfg(feature = "excel")]
    {
        Ok(Box::new(xlsx::XlsxStore::open_or_create(path)?))
    }

    #[cfg(not(feature = "excel"))]
    {
        Err(PipelineError::UnsupportedStore {
            message: "xlsx store not enabled (enable cargo feature 'excel')".to_string(),
        })
    }
}

/// Replace the file at `path` with `bytes` and flush it to disk.
///
/// The bytes go to a sibling `.tmp` file that is synced and then renamed over `path`, so a failed
/// write never leaves a truncated ledger behind. A ledger held open by another program fails the
/// rename with a resource-locked error.
pub(crate) fn write_durably(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let temp_path = PathBuf::from(format!("{}.tmp", path.display()));
    let written = write_and_sync(&temp_path, bytes).and_then(|()| replace_file(&temp_path, path));
    if written.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    written?;
    sync_parent_dir(path);
    Ok(())
}

fn write_and_sync(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

fn replace_file(temp_path: &Path, target_path: &Path) -> io::Result<()> {
    match fs::rename(temp_path, target_path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == ErrorKind::AlreadyExists => {
            let backup_path = PathBuf::from(format!("{}.bak", target_path.display()));
            let _ = fs::remove_file(&backup_path);
            fs::rename(target_path, &backup_path)?;

            match fs::rename(temp_path, target_path) {
                Ok(()) => {
                    let _ = fs::remove_file(&backup_path);
                    Ok(())
                }
                Err(rename_error) => {
                    let _ = fs::rename(&backup_path, target_path);
                    Err(rename_error)
                }
            }
        }
        Err(error) => Err(error),
    }
}

/// Best effort: make the rename itself durable.
fn sync_parent_dir(path: &Path) {
    #[cfg(unix)]
    {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        if let Ok(dir) = File::open(dir) {
            let _ = dir.sync_all();
        }
    }
    #[cfg(not(unix))]
    let _ = path;
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::{StoreFormat, TableData, write_durably};
    use crate::types::HeaderSchema;

    fn strings(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn format_is_inferred_case_insensitively() {
        assert_eq!(StoreFormat::from_path(Path::new("Ledger.XLSX")).unwrap(), StoreFormat::Xlsx);
        assert_eq!(StoreFormat::from_path(Path::new("ledger.csv")).unwrap(), StoreFormat::Csv);
        assert!(StoreFormat::from_path(Path::new("ledger")).is_err());
        assert!(StoreFormat::from_path(Path::new("ledger.ods")).is_err());
    }

    #[test]
    fn empty_first_row_is_not_a_header() {
        let table = TableData::new(vec![strings(&["", ""]), strings(&["x"])]);
        assert_eq!(table.header(), None);
    }

    #[test]
    fn header_ignores_trailing_empty_cells() {
        let table = TableData::new(vec![strings(&["Name", "Amount", "", ""])]);
        assert_eq!(table.header(), Some(HeaderSchema::new(["Name", "Amount"])));
    }

    #[test]
    fn header_is_written_once() {
        let mut table = TableData::default();
        table.write_header(&HeaderSchema::new(["Name"])).unwrap();
        let err = table.write_header(&HeaderSchema::new(["Other"])).unwrap_err();
        assert!(err.to_string().contains("header already established"));
        assert_eq!(table.rows(), &[strings(&["Name"])]);
    }

    #[test]
    fn append_requires_header_and_matching_width() {
        let mut table = TableData::default();
        assert!(table.append_row(strings(&["x"])).is_err());

        table.write_header(&HeaderSchema::new(["Name", "Amount"])).unwrap();
        assert!(table.append_row(strings(&["Alice"])).is_err());
        assert_eq!(table.append_row(strings(&["Alice", "42"])).unwrap(), 1);
        assert_eq!(table.append_row(strings(&["Bob", ""])).unwrap(), 2);
    }

    #[test]
    fn discard_never_removes_the_header() {
        let mut table = TableData::default();
        table.write_header(&HeaderSchema::new(["Name"])).unwrap();
        table.append_row(strings(&["Alice"])).unwrap();

        assert_eq!(table.discard_last_row(), Some(strings(&["Alice"])));
        assert_eq!(table.discard_last_row(), None);
        assert_eq!(table.data_row_count(), 0);
        assert!(table.header().is_some());
    }

    fn temp_file(label: &str) -> PathBuf {
        let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
        std::env::temp_dir().join(format!("form_ledger_{label}_{}_{nanos}.csv", std::process::id()))
    }

    #[test]
    fn durable_write_replaces_contents_and_leaves_no_temp_file() {
        let path = temp_file("durable_replace");
        fs::write(&path, "old ledger contents that are longer").unwrap();

        write_durably(&path, b"new").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"new");
        assert!(!PathBuf::from(format!("{}.tmp", path.display())).exists());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn failed_durable_write_keeps_previous_contents() {
        let path = temp_file("durable_failure");
        fs::write(&path, "Name\nAlice\n").unwrap();
        // A directory where the temp file should go makes the write fail before the rename.
        let temp_path = PathBuf::from(format!("{}.tmp", path.display()));
        fs::create_dir(&temp_path).unwrap();

        assert!(write_durably(&path, b"Name\nAlice\nBob\n").is_err());

        assert_eq!(fs::read_to_string(&path).unwrap(), "Name\nAlice\n");
        let _ = fs::remove_dir(&temp_path);
        let _ = fs::remove_file(&path);
    }
}
