#![cfg(feature = "excel")]

use std::collections::HashMap;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use calamine::{Data, Range, Reader, Xlsx, open_workbook_from_rs};
use rust_xlsxwriter::{Format, Workbook, Worksheet};
use tracing::{info, warn};

use crate::error::{PipelineError, PipelineResult};

use super::{TableData, TableStore, write_durably};

const DEFAULT_SHEET_NAME: &str = "Sheet1";

/// Cells as read from disk, anchored at A1.
///
/// Written back with their original types so a rewrite does not turn numbers, dates or formulas
/// into text.
#[derive(Debug, Clone, Default)]
struct SheetCells {
    values: Vec<Vec<Data>>,
    formulas: HashMap<(usize, usize), String>,
}

impl SheetCells {
    fn value(&self, row: usize, col: usize) -> Option<&Data> {
        self.values.get(row)?.get(col)
    }

    fn width(&self, row: usize) -> usize {
        self.values.get(row).map_or(0, Vec::len)
    }

    /// Text view of the cells, trailing empty cells dropped.
    fn to_rows(&self) -> Vec<Vec<String>> {
        self.values
            .iter()
            .map(|row| {
                let mut cells: Vec<String> = row.iter().map(cell_to_string).collect();
                while cells.last().is_some_and(|c| c.is_empty()) {
                    cells.pop();
                }
                cells
            })
            .collect()
    }
}

/// A worksheet that is carried through rewrites untouched.
#[derive(Debug, Clone)]
struct RetainedSheet {
    name: String,
    cells: SheetCells,
    rows: Vec<Vec<String>>,
}

/// A ledger kept in the first worksheet of an `.xlsx` workbook.
///
/// Behavior:
/// - Reads the whole workbook with `calamine` on open
/// - Rewrites the whole workbook with `rust_xlsxwriter` on every save
/// - Cells that were on disk keep their type (number, bool, date, formula); appended rows are text
/// - Worksheets after the first one are written back unchanged
#[derive(Debug)]
pub struct XlsxStore {
    path: PathBuf,
    sheet_name: String,
    table: TableData,
    loaded: SheetCells,
    retained: Vec<RetainedSheet>,
    created: bool,
}

impl XlsxStore {
    /// Load `path`, or create an empty workbook there when it does not exist.
    pub fn open_or_create(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            let store = Self::load(path)?;
            info!(
                path = %store.path.display(),
                sheet = %store.sheet_name,
                data_rows = store.table.data_row_count(),
                "opened xlsx ledger"
            );
            return Ok(store);
        }

        let mut store = Self {
            path,
            sheet_name: DEFAULT_SHEET_NAME.to_string(),
            table: TableData::default(),
            loaded: SheetCells::default(),
            retained: Vec::new(),
            created: true,
        };
        store.save()?;
        info!(path = %store.path.display(), "created empty xlsx ledger");
        Ok(store)
    }

    /// Name of the worksheet holding the ledger.
    pub fn sheet_name(&self) -> &str {
        &self.sheet_name
    }

    fn load(path: PathBuf) -> PipelineResult<Self> {
        // Read the bytes first so a locked file surfaces as a plain I/O error.
        let bytes = fs::read(&path)?;
        let mut workbook: Xlsx<_> =
            open_workbook_from_rs(Cursor::new(bytes)).map_err(calamine::Error::Xlsx)?;

        let names = workbook.sheet_names().to_vec();
        let mut sheets = Vec::with_capacity(names.len());
        for name in names {
            let range = workbook
                .worksheet_range(&name)
                .map_err(calamine::Error::Xlsx)?;
            let mut cells = SheetCells {
                values: range_to_cells(&range),
                formulas: HashMap::new(),
            };
            match workbook.worksheet_formula(&name) {
                Ok(formulas) => cells.formulas = formula_cells(&formulas),
                Err(error) => warn!(sheet = %name, error = %error, "formulas unreadable, keeping values"),
            }
            sheets.push(RetainedSheet {
                rows: cells.to_rows(),
                cells,
                name,
            });
        }

        let mut sheets = sheets.into_iter();
        let first = sheets.next().ok_or_else(|| PipelineError::SchemaMismatch {
            message: format!("workbook has no sheets ({})", path.display()),
        })?;

        Ok(Self {
            path,
            sheet_name: first.name,
            table: TableData::new(first.rows),
            loaded: first.cells,
            retained: sheets.collect(),
            created: false,
        })
    }
}

impl TableStore for XlsxStore {
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
        let formats = CellFormats::new();
        let mut workbook = Workbook::new();
        write_sheet(&mut workbook, &self.sheet_name, self.table.rows(), &self.loaded, &formats)?;
        for sheet in &self.retained {
            write_sheet(&mut workbook, &sheet.name, &sheet.rows, &sheet.cells, &formats)?;
        }
        let bytes = workbook.save_to_buffer()?;
        write_durably(&self.path, &bytes)?;
        Ok(())
    }
}

struct CellFormats {
    datetime: Format,
    duration: Format,
}

impl CellFormats {
    fn new() -> Self {
        Self {
            datetime: Format::new().set_num_format("yyyy-mm-dd hh:mm:ss"),
            duration: Format::new().set_num_format("[h]:mm:ss"),
        }
    }
}

/// Write `rows`; a cell whose text still matches what was loaded is written from `loaded`.
fn write_sheet(
    workbook: &mut Workbook,
    name: &str,
    rows: &[Vec<String>],
    loaded: &SheetCells,
    formats: &CellFormats,
) -> PipelineResult<()> {
    let ws = workbook.add_worksheet();
    ws.set_name(name)?;
    for (r, row) in rows.iter().enumerate() {
        let xr = u32::try_from(r).map_err(|_| PipelineError::SchemaMismatch {
            message: format!("sheet '{name}' exceeds the worksheet row limit"),
        })?;
        for c in 0..row.len().max(loaded.width(r)) {
            let value = row.get(c).map_or("", String::as_str);
            let original = loaded.value(r, c);
            let unchanged = original.map_or(value.is_empty(), |o| cell_to_string(o) == value);
            let formula = loaded.formulas.get(&(r, c));
            if unchanged && original.is_none() && formula.is_none() {
                continue;
            }
            let xc = u16::try_from(c).map_err(|_| PipelineError::SchemaMismatch {
                message: format!("sheet '{name}' exceeds the worksheet column limit"),
            })?;

            match (unchanged, formula, original) {
                (true, Some(formula), _) => {
                    ws.write_formula(xr, xc, formula.as_str())?;
                }
                (true, None, Some(cell)) => write_cell(ws, xr, xc, cell, formats)?,
                // Empty cells stay blank so they read back as empty strings.
                _ if value.is_empty() => {}
                _ => {
                    ws.write_string(xr, xc, value)?;
                }
            }
        }
    }
    Ok(())
}

fn write_cell(ws: &mut Worksheet, row: u32, col: u16, cell: &Data, formats: &CellFormats) -> PipelineResult<()> {
    match cell {
        Data::Empty => {}
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => {
            ws.write_string(row, col, s.as_str())?;
        }
        Data::Int(i) => {
            ws.write_number(row, col, *i as f64)?;
        }
        Data::Float(f) => {
            ws.write_number(row, col, *f)?;
        }
        Data::Bool(b) => {
            ws.write_boolean(row, col, *b)?;
        }
        Data::DateTime(dt) => {
            let format = if dt.is_duration() {
                &formats.duration
            } else {
                &formats.datetime
            };
            ws.write_number_with_format(row, col, dt.as_f64(), format)?;
        }
        Data::Error(e) => {
            ws.write_string(row, col, format!("{e:?}"))?;
        }
    }
    Ok(())
}

/// Expand a used range into a grid anchored at A1.
///
/// `calamine` ranges start at the first used cell, so leading empty rows and columns are padded
/// back in.
fn range_to_cells(range: &Range<Data>) -> Vec<Vec<Data>> {
    let Some((row0, col0)) = range.start() else {
        return Vec::new();
    };

    let mut rows: Vec<Vec<Data>> = vec![Vec::new(); row0 as usize];
    for row in range.rows() {
        let mut cells: Vec<Data> = vec![Data::Empty; col0 as usize];
        cells.extend(row.iter().cloned());
        rows.push(cells);
    }
    rows
}

fn formula_cells(range: &Range<String>) -> HashMap<(usize, usize), String> {
    let Some((row0, col0)) = range.start() else {
        return HashMap::new();
    };
    range
        .used_cells()
        .filter(|(_, _, formula)| !formula.is_empty())
        .map(|(r, c, formula)| ((row0 as usize + r, col0 as usize + c), formula.clone()))
        .collect()
}

fn cell_to_string(c: &Data) -> String {
    match c {
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => {
            if f.fract() == 0.0 && f.abs() < 1e15 {
                (*f as i64).to_string()
            } else {
                f.to_string()
            }
        }
        Data::Bool(b) => b.to_string(),
        Data::DateTime(d) => d.to_string(),
        Data::DateTimeIso(s) => s.clone(),
        Data::DurationIso(s) => s.clone(),
        Data::Error(e) => format!("{e:?}"),
        Data::Empty => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use calamine::Data;

    use super::{SheetCells, cell_to_string};

    #[test]
    fn whole_floats_render_without_fraction() {
        assert_eq!(cell_to_string(&Data::Float(42.0)), "42");
        assert_eq!(cell_to_string(&Data::Float(42.5)), "42.5");
        assert_eq!(cell_to_string(&Data::String("Alice".to_string())), "Alice");
        assert_eq!(cell_to_string(&Data::Empty), "");
    }

    #[test]
    fn text_view_trims_trailing_blanks_only() {
        let cells = SheetCells {
            values: vec![vec![
                Data::Empty,
                Data::String("Name".to_string()),
                Data::Int(7),
                Data::Empty,
            ]],
            formulas: HashMap::new(),
        };
        assert_eq!(cells.to_rows(), vec![vec!["".to_string(), "Name".to_string(), "7".to_string()]]);
        assert_eq!(cells.width(0), 4);
        assert_eq!(cells.width(1), 0);
    }
}
