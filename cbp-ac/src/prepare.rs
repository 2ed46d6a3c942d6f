//! Analytic sample preparation
//!
//! Builds the numeric design for one hypothesis from a wide table: only the
//! declared outcome, predictors and controls (plus the design weight) are
//! read, and any row missing one of them is dropped listwise. Categorical
//! regressors enter as treatment dummies against their first sorted level.

use cbp_common::codebook::{Codebook, VariableType};
use cbp_common::dataset::{parse_number, Dataset};
use cbp_common::linalg::Matrix;
use cbp_common::missing::MissingPolicy;
use cbp_common::registry::HypothesisRecord;
use cbp_common::{Error, Result};
use std::collections::BTreeSet;

/// Analytic sample for one hypothesis
#[derive(Debug, Clone, PartialEq)]
pub struct Prepared {
    pub outcome: String,
    pub focal: String,
    pub y: Vec<f64>,
    /// Regressors without an intercept; column 0 is the focal predictor
    pub x: Matrix,
    pub regressors: Vec<String>,
    pub weights: Option<Vec<f64>>,
    /// Source row index of each analytic row
    pub rows: Vec<usize>,
    /// Rows in the source table
    pub n_source: usize,
}

impl Prepared {
    pub fn n(&self) -> usize {
        self.y.len()
    }

    /// Copy without the analytic rows in `omit` (a half-open range)
    pub fn without(&self, omit: std::ops::Range<usize>) -> Self {
        let keep = |i: &usize| !omit.contains(i);
        let pick_f = |v: &[f64]| -> Vec<f64> {
            v.iter().enumerate().filter(|(i, _)| keep(i)).map(|(_, x)| *x).collect()
        };
        Self {
            outcome: self.outcome.clone(),
            focal: self.focal.clone(),
            y: pick_f(&self.y),
            x: self
                .x
                .iter()
                .enumerate()
                .filter(|(i, _)| keep(i))
                .map(|(_, r)| r.clone())
                .collect(),
            regressors: self.regressors.clone(),
            weights: self.weights.as_deref().map(pick_f),
            rows: self
                .rows
                .iter()
                .enumerate()
                .filter(|(i, _)| keep(i))
                .map(|(_, r)| *r)
                .collect(),
            n_source: self.n_source,
        }
    }

    /// Replace the weights (pseudo-weight scenarios)
    pub fn with_weights(&self, weights: Vec<f64>) -> Self {
        let mut out = self.clone();
        out.weights = Some(weights);
        out
    }
}

enum Coding {
    Numeric,
    Dummies(Vec<String>),
}

fn is_categorical(codebook: &Codebook, name: &str, cells: &[&str], observed: &[bool]) -> bool {
    if codebook
        .entry(name)
        .map(|e| e.var_type == VariableType::Categorical)
        .unwrap_or(false)
    {
        return true;
    }
    cells
        .iter()
        .zip(observed)
        .any(|(c, &o)| o && parse_number(c).is_none())
}

/// Prepare the analytic sample; `NumericallyDegenerate` below `min_n`
pub fn prepare(
    dataset: &Dataset,
    codebook: &Codebook,
    policy: &MissingPolicy,
    record: &HypothesisRecord,
    weight_var: Option<&str>,
    min_n: usize,
) -> Result<Prepared> {
    let focal = record
        .predictors
        .first()
        .ok_or_else(|| Error::InvalidInput(format!("hypothesis '{}' has no predictors", record.id)))?
        .clone();
    if focal == record.outcome_var {
        return Err(Error::InvalidInput(format!(
            "hypothesis '{}': '{}' is both outcome and focal predictor",
            record.id, focal
        )));
    }
    let variables = record.variables();
    let columns: Vec<Vec<&str>> = variables
        .iter()
        .map(|v| dataset.column(v))
        .collect::<Result<_>>()?;
    let weight_cells = weight_var.map(|w| dataset.column(w)).transpose()?;

    let observed: Vec<Vec<bool>> = variables
        .iter()
        .zip(&columns)
        .map(|(v, cells)| {
            let entry = codebook.entry(v);
            cells.iter().map(|c| !policy.is_missing(c, entry)).collect()
        })
        .collect();
    let categorical: Vec<bool> = variables
        .iter()
        .enumerate()
        .map(|(k, v)| is_categorical(codebook, v, &columns[k], &observed[k]))
        .collect();
    for (k, v) in variables.iter().enumerate().take(2) {
        if categorical[k] {
            let role = if k == 0 { "outcome" } else { "focal predictor" };
            return Err(Error::InvalidInput(format!(
                "hypothesis '{}': {} '{}' is not numeric",
                record.id, role, v
            )));
        }
    }

    let rows: Vec<usize> = (0..dataset.n_rows())
        .filter(|&i| observed.iter().all(|o| o[i]))
        .filter(|&i| match &weight_cells {
            Some(w) => parse_number(w[i]).map(|v| v > 0.0).unwrap_or(false),
            None => true,
        })
        .collect();
    if rows.len() < min_n {
        return Err(Error::NumericallyDegenerate(format!(
            "analytic n {} is below the floor of {} for hypothesis '{}'",
            rows.len(),
            min_n,
            record.id
        )));
    }

    // Outcome first, then regressors in declaration order
    let codings: Vec<Coding> = (1..variables.len())
        .map(|k| {
            if categorical[k] {
                let levels: BTreeSet<String> = rows.iter().map(|&i| columns[k][i].trim().to_string()).collect();
                Coding::Dummies(levels.into_iter().skip(1).collect())
            } else {
                Coding::Numeric
            }
        })
        .collect();

    let mut regressors = Vec::new();
    for (k, coding) in codings.iter().enumerate() {
        let name = &variables[k + 1];
        match coding {
            Coding::Numeric => regressors.push(name.clone()),
            Coding::Dummies(levels) => {
                regressors.extend(levels.iter().map(|l| format!("{}[{}]", name, l)))
            }
        }
    }

    let mut y = Vec::with_capacity(rows.len());
    let mut x = Vec::with_capacity(rows.len());
    for &i in &rows {
        y.push(parse_number(columns[0][i]).unwrap_or(f64::NAN));
        let mut row = Vec::with_capacity(regressors.len());
        for (k, coding) in codings.iter().enumerate() {
            let cell = columns[k + 1][i];
            match coding {
                Coding::Numeric => row.push(parse_number(cell).unwrap_or(f64::NAN)),
                Coding::Dummies(levels) => {
                    row.extend(levels.iter().map(|l| if cell.trim() == l { 1.0 } else { 0.0 }))
                }
            }
        }
        x.push(row);
    }

    Ok(Prepared {
        outcome: record.outcome_var.clone(),
        focal,
        y,
        x,
        regressors,
        weights: weight_cells.map(|w| rows.iter().map(|&i| parse_number(w[i]).unwrap_or(0.0)).collect()),
        rows,
        n_source: dataset.n_rows(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbp_common::registry::Status;

    fn record(controls: &[&str]) -> HypothesisRecord {
        HypothesisRecord {
            id: "H1".into(),
            family: "confirmatory".into(),
            status: Status::InPap,
            targeted: true,
            outcome_var: "y".into(),
            predictors: vec!["x".into()],
            controls: controls.iter().map(|s| s.to_string()).collect(),
            model_hint: None,
            use_imputation: false,
            notes: String::new(),
            q_value: None,
        }
    }

    fn dataset() -> Dataset {
        Dataset::new(
            vec!["y".into(), "x".into(), "city".into(), "wt".into(), "unused".into()],
            vec![
                vec!["1".into(), "2".into(), "Oslo".into(), "1.5".into(), "".into()],
                vec!["".into(), "3".into(), "Lima".into(), "1".into(), "".into()],
                vec!["2".into(), "4".into(), "Lima".into(), "0".into(), "".into()],
                vec!["3".into(), "NA".into(), "Oslo".into(), "2".into(), "".into()],
                vec!["4".into(), "5".into(), "Rome".into(), "2".into(), "".into()],
            ],
        )
        .unwrap()
    }

    fn codebook() -> Codebook {
        serde_json::from_value(serde_json::json!({"variables": []})).unwrap()
    }

    #[test]
    fn test_listwise_deletion_reads_only_declared_columns() {
        let p = prepare(&dataset(), &codebook(), &MissingPolicy::default(), &record(&[]), None, 1).unwrap();
        assert_eq!(p.rows, vec![0, 2, 4]);
        assert_eq!(p.y, vec![1.0, 2.0, 4.0]);
        assert_eq!(p.regressors, vec!["x"]);
    }

    #[test]
    fn test_categorical_controls_become_dummies() {
        let p = prepare(&dataset(), &codebook(), &MissingPolicy::default(), &record(&["city"]), None, 1).unwrap();
        assert_eq!(p.regressors, vec!["x", "city[Oslo]", "city[Rome]"]);
        assert_eq!(p.x[0], vec![2.0, 1.0, 0.0]);
        assert_eq!(p.x[1], vec![4.0, 0.0, 0.0]);
    }

    #[test]
    fn test_non_positive_weights_drop_rows() {
        let p = prepare(&dataset(), &codebook(), &MissingPolicy::default(), &record(&[]), Some("wt"), 1).unwrap();
        assert_eq!(p.rows, vec![0, 4]);
        assert_eq!(p.weights, Some(vec![1.5, 2.0]));
    }

    #[test]
    fn test_floor_and_absent_columns() {
        let err = prepare(&dataset(), &codebook(), &MissingPolicy::default(), &record(&[]), None, 30).unwrap_err();
        assert!(err.is_degenerate());
        assert!(err.to_string().contains("analytic n 3"));

        let err = prepare(&dataset(), &codebook(), &MissingPolicy::default(), &record(&["age"]), None, 1).unwrap_err();
        assert_eq!(err.kind(), cbp_common::ErrorKind::InputMissing);
        assert!(err.to_string().contains("'age'"));
    }

    #[test]
    fn test_without_removes_a_block() {
        let p = prepare(&dataset(), &codebook(), &MissingPolicy::default(), &record(&[]), None, 1).unwrap();
        let q = p.without(1..2);
        assert_eq!(q.rows, vec![0, 4]);
        assert_eq!(q.y, vec![1.0, 4.0]);
    }
}
