//! Spreadsheet I/O shared by both pipeline stages.
//!
//! Workbooks are read with `calamine` into a plain [`Table`] of the first
//! worksheet and written back with `rust_xlsxwriter`. Writing always produces a
//! fresh workbook, so callers that "update" a file rebuild it from a table.

use anyhow::{Context, Result};
use calamine::{open_workbook_auto, Data, Reader};
use rust_xlsxwriter::{Workbook, Worksheet, XlsxError};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Longest string a single worksheet cell accepts.
pub const MAX_CELL_CHARS: usize = 32_767;

/// One cell value, reduced to the types both stages care about.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Cell {
    #[default]
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
}

impl Cell {
    pub fn text(value: impl Into<String>) -> Self {
        Cell::Text(value.into())
    }

    /// True for empty cells and whitespace-only text.
    pub fn is_blank(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.trim().is_empty(),
            Cell::Number(_) | Cell::Bool(_) => false,
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Empty => Ok(()),
            Cell::Text(s) => f.write_str(s),
            // Whole floats print without a fraction so numeric phone numbers
            // read back as digit strings.
            Cell::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Cell::Number(n) => write!(f, "{}", n),
            Cell::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<&Data> for Cell {
    fn from(data: &Data) -> Self {
        match data {
            Data::Empty => Cell::Empty,
            Data::String(s) => Cell::Text(s.clone()),
            Data::Int(i) => Cell::Number(*i as f64),
            Data::Float(f) => Cell::Number(*f),
            Data::Bool(b) => Cell::Bool(*b),
            other => Cell::Text(other.to_string()),
        }
    }
}

/// Header row plus data rows of one worksheet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    /// Index of the column whose header equals `name` exactly.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Cell at (`row`, `col`), treating short rows as padded with empties.
    pub fn cell(&self, row: usize, col: usize) -> &Cell {
        static EMPTY: Cell = Cell::Empty;
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .unwrap_or(&EMPTY)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Reads the first worksheet of `path`. The first row is the header row.
pub fn read_table(path: &Path) -> Result<Table> {
    let mut workbook = open_workbook_auto(path)
        .with_context(|| format!("Failed to open workbook: {}", path.display()))?;
    let range = workbook
        .worksheet_range_at(0)
        .with_context(|| format!("Workbook has no worksheets: {}", path.display()))?
        .with_context(|| format!("Failed to read worksheet: {}", path.display()))?;

    let mut rows = range.rows();
    let headers: Vec<String> = match rows.next() {
        Some(header) => header.iter().map(|c| Cell::from(c).to_string()).collect(),
        None => return Ok(Table::default()),
    };
    let width = headers.len();

    let rows = rows
        .map(|row| {
            let mut cells: Vec<Cell> = row.iter().take(width).map(Cell::from).collect();
            cells.resize(width, Cell::Empty);
            cells
        })
        .collect();

    Ok(Table { headers, rows })
}

/// Failure to write a workbook.
#[derive(Debug, Error)]
pub enum SaveError {
    /// The target is locked, typically because it is open in a spreadsheet
    /// application.
    #[error("Permission denied: Cannot save to {0}. File may be open in Excel.")]
    PermissionDenied(PathBuf),

    #[error("Error saving workbook {path}: {source}")]
    Other {
        path: PathBuf,
        #[source]
        source: XlsxError,
    },
}

impl SaveError {
    pub fn classify(path: &Path, err: XlsxError) -> Self {
        match err {
            XlsxError::IoError(io) if io.kind() == std::io::ErrorKind::PermissionDenied => {
                SaveError::PermissionDenied(path.to_path_buf())
            }
            source => SaveError::Other {
                path: path.to_path_buf(),
                source,
            },
        }
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, SaveError::PermissionDenied(_))
    }
}

/// Row number of data row `index` (the header occupies row 0).
pub fn data_row(index: usize) -> Result<u32, XlsxError> {
    u32::try_from(index + 1).map_err(|_| XlsxError::RowColumnLimitError)
}

pub fn column(index: usize) -> Result<u16, XlsxError> {
    u16::try_from(index).map_err(|_| XlsxError::RowColumnLimitError)
}

/// Writes one cell, truncating text to the per-cell limit.
pub fn write_cell(sheet: &mut Worksheet, row: u32, col: u16, cell: &Cell) -> Result<(), XlsxError> {
    match cell {
        Cell::Empty => {}
        Cell::Text(s) if s.is_empty() => {}
        Cell::Text(s) if s.chars().count() > MAX_CELL_CHARS => {
            let truncated: String = s.chars().take(MAX_CELL_CHARS).collect();
            sheet.write_string(row, col, truncated)?;
        }
        Cell::Text(s) => {
            sheet.write_string(row, col, s)?;
        }
        Cell::Number(n) => {
            sheet.write_number(row, col, *n)?;
        }
        Cell::Bool(b) => {
            sheet.write_boolean(row, col, *b)?;
        }
    }
    Ok(())
}

/// Writes headers and rows into `sheet`.
pub fn fill_worksheet(sheet: &mut Worksheet, table: &Table) -> Result<(), XlsxError> {
    for (col, header) in table.headers.iter().enumerate() {
        sheet.write_string(0, column(col)?, header)?;
    }
    for (index, row) in table.rows.iter().enumerate() {
        let row_num = data_row(index)?;
        for (col, cell) in row.iter().enumerate() {
            write_cell(sheet, row_num, column(col)?, cell)?;
        }
    }
    Ok(())
}

/// Saves `workbook` to `path`, separating lock failures from other errors.
pub fn save_workbook(workbook: &mut Workbook, path: &Path) -> Result<(), SaveError> {
    workbook
        .save(path)
        .map_err(|e| SaveError::classify(path, e))
}

/// Writes `table` as the only worksheet of a new workbook at `path`.
pub fn write_table(path: &Path, table: &Table) -> Result<(), SaveError> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    fill_worksheet(sheet, table).map_err(|e| SaveError::classify(path, e))?;
    save_workbook(&mut workbook, path)
}
