//! Working frame for imputation
//!
//! Each column keeps its raw cells, an observed mask and, for numeric kinds,
//! the parsed values. Imputers never invent values: a completion is a choice
//! of *donor row* per missing cell, and the completed cell is the donor's raw
//! text. Observed cells are their own donors, which keeps them verbatim in
//! every completed table.

use cbp_common::codebook::{Codebook, VariableType};
use cbp_common::dataset::Dataset;
use cbp_common::missing::MissingPolicy;
use cbp_common::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Conditional-model family used for a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarKind {
    Numeric,
    Ordinal,
    Categorical,
}

impl VarKind {
    pub fn is_numeric(self) -> bool {
        matches!(self, VarKind::Numeric | VarKind::Ordinal)
    }
}

impl fmt::Display for VarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            VarKind::Numeric => "numeric",
            VarKind::Ordinal => "ordinal",
            VarKind::Categorical => "categorical",
        })
    }
}

#[derive(Debug, Clone)]
pub struct FrameColumn {
    pub name: String,
    pub kind: VarKind,
    pub raw: Vec<String>,
    pub observed: Vec<bool>,
    /// Parsed value for observed cells of numeric kinds
    pub numeric: Vec<Option<f64>>,
}

impl FrameColumn {
    pub fn observed_rows(&self) -> Vec<usize> {
        (0..self.raw.len()).filter(|&i| self.observed[i]).collect()
    }

    pub fn missing_rows(&self) -> Vec<usize> {
        (0..self.raw.len()).filter(|&i| !self.observed[i]).collect()
    }

    pub fn n_missing(&self) -> usize {
        self.observed.iter().filter(|o| !**o).count()
    }

    pub fn observed_values(&self) -> Vec<f64> {
        (0..self.raw.len())
            .filter(|&i| self.observed[i])
            .filter_map(|i| self.numeric[i])
            .collect()
    }
}

fn infer_kind(declared: Option<VariableType>, observed_numeric: bool) -> VarKind {
    match declared {
        Some(VariableType::Categorical) => VarKind::Categorical,
        _ if !observed_numeric => VarKind::Categorical,
        Some(VariableType::Numeric) => VarKind::Numeric,
        Some(VariableType::Binary | VariableType::Ordinal | VariableType::Likert) => VarKind::Ordinal,
        Some(VariableType::Unknown) | None => VarKind::Numeric,
    }
}

/// Columns selected for imputation
#[derive(Debug, Clone)]
pub struct Frame {
    pub n_rows: usize,
    pub columns: Vec<FrameColumn>,
}

impl Frame {
    /// Build the frame; absent columns are `InputMissing`
    pub fn build(
        dataset: &Dataset,
        codebook: &Codebook,
        policy: &MissingPolicy,
        names: &[String],
    ) -> Result<Self> {
        let mut columns = Vec::with_capacity(names.len());
        for name in names {
            let cells = dataset.column(name)?;
            let entry = codebook.entry(name);
            let observed: Vec<bool> = cells.iter().map(|c| !policy.is_missing(c, entry)).collect();
            let parsed: Vec<Option<f64>> = cells
                .iter()
                .zip(&observed)
                .map(|(c, &o)| if o { policy.numeric(c, entry) } else { None })
                .collect();
            let observed_numeric = parsed
                .iter()
                .zip(&observed)
                .all(|(p, &o)| !o || p.is_some());
            let kind = infer_kind(entry.map(|e| e.var_type), observed_numeric);
            columns.push(FrameColumn {
                name: name.clone(),
                kind,
                raw: cells.into_iter().map(str::to_string).collect(),
                observed,
                numeric: if kind.is_numeric() { parsed } else { vec![None; dataset.n_rows()] },
            });
        }
        Ok(Self {
            n_rows: dataset.n_rows(),
            columns,
        })
    }

    /// Remove columns without a single observed value; returns their names
    pub fn drop_unobserved(&mut self) -> Vec<String> {
        let (kept, dropped): (Vec<_>, Vec<_>) = std::mem::take(&mut self.columns)
            .into_iter()
            .partition(|c| c.observed.iter().any(|o| *o));
        self.columns = kept;
        dropped.into_iter().map(|c| c.name).collect()
    }
}

/// Donor row per cell, per column
pub type Donors = Vec<Vec<usize>>;

/// Identity donors (observed cells point at themselves)
pub fn identity_donors(frame: &Frame) -> Donors {
    frame
        .columns
        .iter()
        .map(|c| (0..c.raw.len()).collect())
        .collect()
}

/// Completed raw cells of one column
pub fn completed_cells<'a>(column: &'a FrameColumn, donors: &[usize]) -> Vec<&'a str> {
    donors.iter().map(|&d| column.raw[d].as_str()).collect()
}

/// Completed numeric values of one column (numeric kinds)
pub fn completed_values(column: &FrameColumn, donors: &[usize]) -> Vec<Option<f64>> {
    donors.iter().map(|&d| column.numeric[d]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbp_common::codebook::CodebookEntry;

    #[test]
    fn test_kinds_and_masks() {
        let mut likert = CodebookEntry::named("mood");
        likert.var_type = VariableType::Likert;
        likert.missing_codes = vec![cbp_common::codebook::CodeValue::Number(-9.0)];
        let codebook: Codebook = serde_json::from_value(serde_json::json!({
            "variables": [likert]
        }))
        .unwrap();
        let ds = Dataset::new(
            vec!["mood".into(), "city".into(), "empty".into()],
            vec![
                vec!["2".into(), "Oslo".into(), "".into()],
                vec!["-9".into(), "NA".into(), "NA".into()],
                vec!["-1".into(), "Lima".into(), "".into()],
            ],
        )
        .unwrap();
        let names = vec!["mood".to_string(), "city".to_string(), "empty".to_string()];
        let mut frame = Frame::build(&ds, &codebook, &MissingPolicy::default(), &names).unwrap();
        assert_eq!(frame.columns[0].kind, VarKind::Ordinal);
        assert_eq!(frame.columns[0].observed, vec![true, false, true]);
        assert_eq!(frame.columns[0].observed_values(), vec![2.0, -1.0]);
        assert_eq!(frame.columns[1].kind, VarKind::Categorical);
        assert_eq!(frame.drop_unobserved(), vec!["empty".to_string()]);
        assert_eq!(frame.columns.len(), 2);
    }

    #[test]
    fn test_absent_column_is_input_missing() {
        let ds = Dataset::new(vec!["a".into()], vec![vec!["1".into()]]).unwrap();
        let codebook: Codebook = serde_json::from_value(serde_json::json!({"variables": []})).unwrap();
        let err = Frame::build(&ds, &codebook, &MissingPolicy::default(), &["b".to_string()]).unwrap_err();
        assert_eq!(err.kind(), cbp_common::ErrorKind::InputMissing);
    }
}
