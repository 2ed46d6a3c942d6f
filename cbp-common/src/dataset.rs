//! Wide CSV dataset
//!
//! Cells are kept as their raw UTF-8 text so observed values round-trip
//! byte-for-byte through every stage. An empty cell is storage-null; all other
//! missingness (tokens, codes, negative sentinels) is interpreted by
//! [`crate::missing`].

use crate::{Error, Result};
use std::collections::HashMap;
use std::path::Path;

/// In-memory wide table with a header row
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
    index: HashMap<String, usize>,
}

impl Dataset {
    /// Build a dataset from a header and rows
    ///
    /// Every row must have exactly one cell per header column; a ragged row
    /// is a `SchemaConflict` naming its 1-based data row and both widths.
    pub fn new(header: Vec<String>, rows: Vec<Vec<String>>) -> Result<Self> {
        let mut index = HashMap::with_capacity(header.len());
        for (i, name) in header.iter().enumerate() {
            if index.insert(name.clone(), i).is_some() {
                return Err(Error::SchemaConflict(format!(
                    "duplicate column name in header: '{}'",
                    name
                )));
            }
        }
        let width = header.len();
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != width) {
            let ragged = rows.iter().filter(|r| r.len() != width).count();
            return Err(Error::SchemaConflict(format!(
                "data row {} has {} cells but the header has {} columns ({} ragged rows)",
                i + 1,
                row.len(),
                width,
                ragged
            )));
        }
        Ok(Self { header, rows, index })
    }

    /// Read a UTF-8 CSV file with a header row
    pub fn read_csv(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::InputMissing(format!("dataset {}", path.display())));
        }
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(path)?;
        let header: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            rows.push(record.iter().map(|c| c.to_string()).collect());
        }
        tracing::debug!(path = %path.display(), rows = rows.len(), cols = header.len(), "Dataset read");
        Self::new(header, rows)
    }

    /// Read only the header row of a CSV file
    pub fn read_header(path: &Path) -> Result<Vec<String>> {
        if !path.exists() {
            return Err(Error::InputMissing(format!("dataset {}", path.display())));
        }
        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_path(path)?;
        Ok(reader.headers()?.iter().map(|h| h.to_string()).collect())
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_cols(&self) -> usize {
        self.header.len()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Column index or `InputMissing` naming the column verbatim
    pub fn require_column(&self, name: &str) -> Result<usize> {
        self.column_index(name)
            .ok_or_else(|| Error::InputMissing(format!("required column '{}' not in dataset", name)))
    }

    /// Raw cell text
    pub fn cell(&self, row: usize, col: usize) -> &str {
        &self.rows[row][col]
    }

    /// Raw values of a column, in row order
    pub fn column(&self, name: &str) -> Result<Vec<&str>> {
        let col = self.require_column(name)?;
        Ok(self.rows.iter().map(|r| r[col].as_str()).collect())
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// Append a column; replaces an existing column of the same name
    pub fn set_column(&mut self, name: &str, values: Vec<String>) -> Result<()> {
        if values.len() != self.rows.len() {
            return Err(Error::InvalidInput(format!(
                "column '{}' has {} values for {} rows",
                name,
                values.len(),
                self.rows.len()
            )));
        }
        match self.column_index(name) {
            Some(col) => {
                for (row, v) in self.rows.iter_mut().zip(values) {
                    row[col] = v;
                }
            }
            None => {
                self.index.insert(name.to_string(), self.header.len());
                self.header.push(name.to_string());
                for (row, v) in self.rows.iter_mut().zip(values) {
                    row.push(v);
                }
            }
        }
        Ok(())
    }

    /// New dataset restricted to the named columns, in the given order
    pub fn select(&self, columns: &[String]) -> Result<Self> {
        let idx: Vec<usize> = columns
            .iter()
            .map(|c| self.require_column(c))
            .collect::<Result<_>>()?;
        let rows = self
            .rows
            .iter()
            .map(|r| idx.iter().map(|&i| r[i].clone()).collect())
            .collect();
        Self::new(columns.to_vec(), rows)
    }

    /// Serialize as CSV bytes (header first, `\n` line endings)
    pub fn to_csv_bytes(&self) -> Result<Vec<u8>> {
        let mut writer = csv::WriterBuilder::new()
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(Vec::new());
        writer.write_record(&self.header)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer
            .into_inner()
            .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))
    }
}

/// Parse a cell as a finite number
pub fn parse_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Deterministic numeric formatting for artifacts
///
/// Integers print without a fractional part; everything else uses Rust's
/// shortest round-trip representation.
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// Format an optional number, empty when undefined
pub fn format_optional(value: Option<f64>) -> String {
    match value {
        Some(v) if v.is_finite() => format_number(v),
        _ => String::new(),
    }
}
