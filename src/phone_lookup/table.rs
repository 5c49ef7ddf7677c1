//! Wide-format lookup output.
//!
//! Rows keep their own name/image/base64 lists; the `Name_N`, `Image_N` and
//! `b64_N` families are sized to the widest row when the table is
//! materialized, so earlier rows always gain the empty cells of columns added
//! after them.

use super::response::LookupResult;
use crate::sheet::{Cell, Table};
use regex::Regex;
use std::sync::OnceLock;

pub const NUMBER_COLUMN: &str = "Number";
pub const STATUS_COLUMN: &str = "Lookup_Status";
pub const FULL_NAME_COLUMN: &str = "Full_Name";
pub const TIMESTAMP_COLUMN: &str = "Lookup_Timestamp";
pub const ERROR_COLUMN: &str = "Error_Message";

const RESULT_COLUMNS: [&str; 5] = [
    STATUS_COLUMN,
    FULL_NAME_COLUMN,
    TIMESTAMP_COLUMN,
    ERROR_COLUMN,
    "Cleaned_Number",
];

fn family_column() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(Name|Image|b64)_\d+$").ok())
        .as_ref()
}

/// True for headers the lookup stage writes itself.
fn is_generated_column(header: &str) -> bool {
    if RESULT_COLUMNS.contains(&header) {
        return true;
    }
    match family_column() {
        Some(re) => re.is_match(header),
        None => ["Name_", "Image_", "b64_"]
            .iter()
            .any(|prefix| header.starts_with(prefix)),
    }
}

struct OutputRow {
    base: Vec<Cell>,
    names: Vec<String>,
    result: LookupResult,
}

/// Observed widths of the three column families.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FamilyWidths {
    pub names: usize,
    pub images: usize,
    pub base64: usize,
}

pub struct OutputTable {
    /// Input columns carried into the output, `Number` first
    base_columns: Vec<(usize, String)>,
    rows: Vec<OutputRow>,
    widths: FamilyWidths,
}

impl OutputTable {
    /// Prepares a table for rows read under `input_headers`. Input columns
    /// that the lookup itself produces are dropped.
    pub fn new(input_headers: &[String]) -> Self {
        let mut base_columns: Vec<(usize, String)> = input_headers
            .iter()
            .enumerate()
            .filter(|(_, h)| !h.is_empty() && !is_generated_column(h))
            .map(|(i, h)| (i, h.clone()))
            .collect();
        if let Some(pos) = base_columns.iter().position(|(_, h)| h == NUMBER_COLUMN) {
            let number = base_columns.remove(pos);
            base_columns.insert(0, number);
        }
        Self {
            base_columns,
            rows: Vec::new(),
            widths: FamilyWidths::default(),
        }
    }

    /// Appends the result for one input row.
    pub fn push(&mut self, input_row: &[Cell], result: LookupResult) {
        let base = self
            .base_columns
            .iter()
            .map(|(i, _)| input_row.get(*i).cloned().unwrap_or_default())
            .collect();
        let names = result.names();

        self.widths.names = self.widths.names.max(names.len());
        self.widths.images = self.widths.images.max(result.image_urls.len());
        self.widths.base64 = self.widths.base64.max(result.base64_images.len());

        self.rows.push(OutputRow {
            base,
            names,
            result,
        });
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn widths(&self) -> FamilyWidths {
        self.widths
    }

    /// Output headers: `Number`, `Lookup_Status`, the three families, the
    /// remaining input columns, then `Full_Name`, `Lookup_Timestamp` and
    /// `Error_Message`.
    pub fn headers(&self) -> Vec<String> {
        let mut headers = Vec::new();
        let (number, others) = self.split_base(&self.base_column_names());
        headers.extend(number);
        headers.push(STATUS_COLUMN.to_string());
        headers.extend((1..=self.widths.names).map(|i| format!("Name_{}", i)));
        headers.extend((1..=self.widths.images).map(|i| format!("Image_{}", i)));
        headers.extend((1..=self.widths.base64).map(|i| format!("b64_{}", i)));
        headers.extend(others);
        headers.push(FULL_NAME_COLUMN.to_string());
        headers.push(TIMESTAMP_COLUMN.to_string());
        headers.push(ERROR_COLUMN.to_string());
        headers
    }

    fn base_column_names(&self) -> Vec<String> {
        self.base_columns.iter().map(|(_, h)| h.clone()).collect()
    }

    fn has_number_column(&self) -> bool {
        self.base_columns
            .first()
            .is_some_and(|(_, h)| h == NUMBER_COLUMN)
    }

    /// Splits base values into the leading `Number` value and the rest.
    fn split_base<T: Clone>(&self, values: &[T]) -> (Vec<T>, Vec<T>) {
        let lead = usize::from(self.has_number_column()).min(values.len());
        (values[..lead].to_vec(), values[lead..].to_vec())
    }

    fn padded(values: &[String], width: usize) -> impl Iterator<Item = Cell> + '_ {
        (0..width).map(move |i| Cell::text(values.get(i).cloned().unwrap_or_default()))
    }

    /// Materializes every row at the current family widths.
    pub fn to_table(&self) -> Table {
        let mut table = Table::new(self.headers());
        for row in &self.rows {
            let (number, others) = self.split_base(&row.base);
            let mut cells = number;
            cells.push(Cell::text(row.result.status.to_string()));
            cells.extend(Self::padded(&row.names, self.widths.names));
            cells.extend(Self::padded(&row.result.image_urls, self.widths.images));
            cells.extend(Self::padded(&row.result.base64_images, self.widths.base64));
            cells.extend(others);
            cells.push(Cell::text(row.result.full_name.clone()));
            cells.push(Cell::text(row.result.timestamp.clone()));
            cells.push(Cell::text(row.result.error_message.clone()));
            table.rows.push(cells);
        }
        table
    }
}

#[cfg(test)]
#[path = "tests/table_tests.rs"]
mod tests;
