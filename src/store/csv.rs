//! CSV ledger backend.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::PipelineResult;

use super::{TableData, TableStore, write_durably};

/// A ledger kept in a `.csv` file.
///
/// Rows may have different widths on disk; the reader is flexible and the header decides the
/// width of every appended row.
#[derive(Debug)]
pub struct CsvStore {
    path: PathBuf,
    table: TableData,
    created: bool,
}

impl CsvStore {
    /// Load `path`, or create an empty file there when it does not exist.
    pub fn open_or_create(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            let table = read_csv_table(&path)?;
            info!(
                path = %path.display(),
                data_rows = table.data_row_count(),
                "opened csv ledger"
            );
            return Ok(Self {
                path,
                table,
                created: false,
            });
        }

        let mut store = Self {
            path,
            table: TableData::default(),
            created: true,
        };
        store.save()?;
        info!(path = %store.path.display(), "created empty csv ledger");
        Ok(store)
    }
}

impl TableStore for CsvStore {
    fn path(&self) -> &Path {
        &self.path
    }

    fn was_created(&self) -> bool {
        self.created
    }

    fn table(&self) -> &TableData {
        &self.table
    }

    fn table_mut(&mut self) -> &mut TableData {
        &mut self.table
    }

    fn save(&mut self) -> PipelineResult<()> {
        let bytes = encode_csv_table(&self.table)?;
        write_durably(&self.path, &bytes)?;
        Ok(())
    }
}

fn read_csv_table(path: &Path) -> PipelineResult<TableData> {
    let bytes = fs::read(path)?;
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes.as_slice());

    let mut rows = Vec::new();
    for result in rdr.records() {
        let record = result?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(TableData::new(rows))
}

fn encode_csv_table(table: &TableData) -> PipelineResult<Vec<u8>> {
    let mut wtr = csv::WriterBuilder::new()
        .flexible(true)
        .from_writer(Vec::new());
    for row in table.rows() {
        wtr.write_record(row)?;
    }
    let bytes = wtr.into_inner().map_err(|e| e.into_error())?;
    Ok(bytes)
}
