//! Imputation stack and its manifest
//!
//! The stack is long format: `imputation_id,row_index,<sanitized columns>`,
//! one block of `n` rows per completion, `imputation_id` running 1..=m. The
//! manifest (`artifacts/imputation_manifest.json`) records how to read it
//! back: the original ↔ sanitized column map, column kinds, dropped columns,
//! back-end and sub-seeds. Neither file carries timestamps.

use crate::frame::{completed_cells, Donors, Frame, VarKind};
use crate::sanitize::{sanitize_names, ColumnMapping};
use cbp_common::config::ImputationBackend;
use cbp_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const STACK_PATH: &str = "data/derived/imputation_stack.csv";
pub const MANIFEST_PATH: &str = "artifacts/imputation_manifest.json";

pub const IMPUTATION_ID: &str = "imputation_id";
pub const ROW_INDEX: &str = "row_index";

/// One imputed column of the stack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackColumn {
    pub original: String,
    pub sanitized: String,
    pub kind: VarKind,
    pub n_missing: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImputationManifest {
    pub backend: ImputationBackend,
    pub m: usize,
    pub burn_in: usize,
    pub seed: u64,
    pub sub_seeds: Vec<u64>,
    pub n_rows: usize,
    pub columns: Vec<StackColumn>,
    pub dropped_columns: Vec<String>,
    pub stack_path: String,
    pub stack_sha256: String,
    pub input_sha256: String,
}

impl ImputationManifest {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::InputMissing(format!("imputation manifest {}", path.display())));
        }
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = serde_json::to_vec_pretty(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    /// Sanitized stack column for an original variable name
    pub fn sanitized(&self, original: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|c| c.original == original)
            .map(|c| c.sanitized.as_str())
    }

    pub fn stack_file(&self, root: &Path) -> PathBuf {
        root.join(&self.stack_path)
    }
}

/// Sanitize frame columns, keeping clear of the two key columns
pub fn column_mapping(frame: &Frame) -> Vec<ColumnMapping> {
    let mut names = vec![IMPUTATION_ID.to_string(), ROW_INDEX.to_string()];
    names.extend(frame.columns.iter().map(|c| c.name.clone()));
    sanitize_names(&names).into_iter().skip(2).collect()
}

/// Serialize the stacked completions
pub fn stack_bytes(frame: &Frame, completions: &[Donors], mapping: &[ColumnMapping]) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    let mut header = vec![IMPUTATION_ID.to_string(), ROW_INDEX.to_string()];
    header.extend(mapping.iter().map(|m| m.sanitized.clone()));
    writer.write_record(&header)?;

    for (k, donors) in completions.iter().enumerate() {
        let cells: Vec<Vec<&str>> = frame
            .columns
            .iter()
            .zip(donors)
            .map(|(column, d)| completed_cells(column, d))
            .collect();
        let id = (k + 1).to_string();
        for row in 0..frame.n_rows {
            let mut record = Vec::with_capacity(header.len());
            record.push(id.clone());
            record.push(row.to_string());
            record.extend(cells.iter().map(|c| c[row].to_string()));
            writer.write_record(&record)?;
        }
    }
    writer
        .into_inner()
        .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameColumn;

    #[test]
    fn test_key_column_names_are_reserved() {
        let frame = Frame {
            n_rows: 1,
            columns: vec![FrameColumn {
                name: "Row Index".into(),
                kind: VarKind::Categorical,
                raw: vec!["a".into()],
                observed: vec![true],
                numeric: vec![None],
            }],
        };
        let mapping = column_mapping(&frame);
        assert_eq!(mapping[0].sanitized, "row_index_1");
    }

    #[test]
    fn test_stack_layout() {
        let frame = Frame {
            n_rows: 2,
            columns: vec![FrameColumn {
                name: "City name".into(),
                kind: VarKind::Categorical,
                raw: vec!["Oslo".into(), "".into()],
                observed: vec![true, false],
                numeric: vec![None, None],
            }],
        };
        let mapping = column_mapping(&frame);
        let bytes = stack_bytes(&frame, &[vec![vec![0, 0]], vec![vec![0, 0]]], &mapping).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            "imputation_id,row_index,city_name\n1,0,Oslo\n1,1,Oslo\n2,0,Oslo\n2,1,Oslo\n"
        );
    }
}
