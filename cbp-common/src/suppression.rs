//! Small-cell suppression at the artifact boundary
//!
//! Internal computations keep true counts. Suppression happens only when a
//! [`PublicTable`] is rendered for release:
//! - a count `n` with `0 < n < T` renders as the sentinel `"<T"`
//! - a proportion whose base count is suppressed renders empty
//! - zero and counts `>= T` render verbatim
//!
//! A caller that smuggles a small count into a count column as text or as a
//! plain number is refused with `DisclosureRisk`, naming the cell.

use crate::dataset::format_optional;
use crate::{Error, Result};

/// Threshold holder for one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Suppressor {
    threshold: u64,
}

impl Suppressor {
    pub fn new(threshold: u64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Count falls in the disclosure band `(0, T)`
    pub fn is_small(&self, n: u64) -> bool {
        n > 0 && n < self.threshold
    }

    /// Sentinel text for a suppressed count
    pub fn sentinel(&self) -> String {
        format!("<{}", self.threshold)
    }

    pub fn count(&self, n: u64) -> String {
        if self.is_small(n) {
            self.sentinel()
        } else {
            n.to_string()
        }
    }

    /// Proportion tied to a base count; empty when the base is suppressed
    pub fn proportion(&self, base: u64, value: Option<f64>) -> String {
        if self.is_small(base) {
            String::new()
        } else {
            format_proportion(value)
        }
    }
}

fn format_proportion(value: Option<f64>) -> String {
    match value {
        Some(v) if v.is_finite() => format!("{:.4}", v),
        _ => String::new(),
    }
}

/// Semantic kind of a published column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Count,
    Proportion,
    Number,
    Text,
}

/// One cell of a public table
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    /// Respondent count, suppressed at render
    Count(u64),
    /// Proportion whose disclosure follows its base count
    Share { value: Option<f64>, base: u64 },
    Number(Option<f64>),
    Text(String),
}

impl Cell {
    pub fn text(s: impl Into<String>) -> Self {
        Cell::Text(s.into())
    }
}

/// Regeneration footer carried by every public table
#[derive(Debug, Clone, PartialEq)]
pub struct Footer {
    pub command: String,
    pub seed: u64,
    pub threshold: u64,
    pub notes: Vec<String>,
}

impl Footer {
    pub fn lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("Regenerate: {}", self.command),
            format!("Seed: {}", self.seed),
            format!(
                "Counts in (0, {}) are suppressed as \"<{}\"; their proportions are withheld.",
                self.threshold, self.threshold
            ),
        ];
        lines.extend(self.notes.iter().cloned());
        lines
    }
}

/// Table destined for `tables/`
#[derive(Debug, Clone, PartialEq)]
pub struct PublicTable {
    name: String,
    columns: Vec<(String, ColumnKind)>,
    rows: Vec<Vec<Cell>>,
}

impl PublicTable {
    pub fn new(name: &str, columns: &[(&str, ColumnKind)]) -> Self {
        Self {
            name: name.to_string(),
            columns: columns.iter().map(|(c, k)| (c.to_string(), *k)).collect(),
            rows: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn push_row(&mut self, row: Vec<Cell>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(Error::InvalidInput(format!(
                "table '{}': row has {} cells for {} columns",
                self.name,
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn header(&self) -> Vec<String> {
        self.columns.iter().map(|(c, _)| c.clone()).collect()
    }

    /// Render every cell through the suppressor
    pub fn render(&self, suppressor: &Suppressor) -> Result<Vec<Vec<String>>> {
        self.rows
            .iter()
            .enumerate()
            .map(|(r, row)| {
                row.iter()
                    .zip(&self.columns)
                    .map(|(cell, (column, kind))| self.render_cell(suppressor, r, column, *kind, cell))
                    .collect()
            })
            .collect()
    }

    fn render_cell(
        &self,
        suppressor: &Suppressor,
        row: usize,
        column: &str,
        kind: ColumnKind,
        cell: &Cell,
    ) -> Result<String> {
        let rendered = match cell {
            Cell::Count(n) => return Ok(suppressor.count(*n)),
            Cell::Share { value, base } => return Ok(suppressor.proportion(*base, *value)),
            Cell::Number(v) => format_optional(*v),
            Cell::Text(t) => t.clone(),
        };
        if kind == ColumnKind::Count {
            if let Some(n) = crate::dataset::parse_number(&rendered) {
                if n > 0.0 && n < suppressor.threshold() as f64 {
                    tracing::error!(
                        table = %self.name, row, column, count = n,
                        "Refusing to release unsuppressed small cell"
                    );
                    return Err(Error::DisclosureRisk {
                        table: self.name.clone(),
                        row,
                        column: column.to_string(),
                        count: n.ceil() as u64,
                        threshold: suppressor.threshold(),
                    });
                }
            }
        }
        Ok(rendered)
    }

    /// CSV with `# `-prefixed footer lines
    pub fn to_csv(&self, suppressor: &Suppressor, footer: &Footer) -> Result<Vec<u8>> {
        let rendered = self.render(suppressor)?;
        let mut writer = csv::WriterBuilder::new()
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(Vec::new());
        writer.write_record(self.header())?;
        for row in &rendered {
            writer.write_record(row)?;
        }
        let mut bytes = writer
            .into_inner()
            .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
        for line in footer.lines() {
            bytes.extend_from_slice(format!("# {}\n", line).as_bytes());
        }
        Ok(bytes)
    }

    /// Markdown pipe table followed by a footer paragraph
    pub fn to_markdown(&self, suppressor: &Suppressor, footer: &Footer) -> Result<String> {
        let rendered = self.render(suppressor)?;
        let mut out = format!("## {}\n\n", self.name);
        out.push_str(&markdown_grid(&self.header(), &rendered));
        out.push('\n');
        out.push_str(&footer.lines().join("  \n"));
        out.push('\n');
        Ok(out)
    }
}

/// Pipe-table grid for already-rendered cells
pub fn markdown_grid(header: &[String], rows: &[Vec<String>]) -> String {
    let escape = |s: &str| s.replace('|', "\\|");
    let mut out = String::new();
    out.push_str(&format!(
        "| {} |\n",
        header.iter().map(|h| escape(h)).collect::<Vec<_>>().join(" | ")
    ));
    out.push_str(&format!("|{}|\n", vec!["---"; header.len()].join("|")));
    for row in rows {
        out.push_str(&format!(
            "| {} |\n",
            row.iter().map(|c| escape(c)).collect::<Vec<_>>().join(" | ")
        ));
    }
    out
}
