//! Derivation routines
//!
//! Each routine is a pure function of its declared input column; missing
//! values (`None`) propagate. Derivations run in codebook declaration order,
//! so a later derivation may read an earlier derived column.

use cbp_common::codebook::{Codebook, Derivation, DerivationOp};
use cbp_common::dataset::{format_optional, Dataset};
use cbp_common::missing::MissingPolicy;
use cbp_common::{stats, Error, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Cut points used when neither the derivation nor the source entry sets any
pub const DEFAULT_THREE_BIN_CUTS: [f64; 2] = [-2.0, 0.0];

/// `1 if S > 0 else 0`
pub fn indicator(values: &[Option<f64>]) -> Vec<Option<f64>> {
    values
        .iter()
        .map(|v| v.map(|s| if s > 0.0 { 1.0 } else { 0.0 }))
        .collect()
}

/// `-S` when `flip` is set, otherwise `S`
pub fn aligned(values: &[Option<f64>], flip: bool) -> Vec<Option<f64>> {
    values
        .iter()
        .map(|v| v.map(|s| if flip { -s } else { s }))
        .collect()
}

/// Centre by mean, scale by population standard deviation
pub fn zscore(name: &str, values: &[Option<f64>]) -> Result<Vec<Option<f64>>> {
    let observed: Vec<f64> = values.iter().flatten().copied().collect();
    let (mean, sd) = match (stats::mean(&observed), stats::population_sd(&observed)) {
        (Some(m), Some(s)) => (m, s),
        _ => {
            return Err(Error::NumericallyDegenerate(format!(
                "z-score of '{}': no observed values",
                name
            )))
        }
    };
    if sd == 0.0 {
        return Err(Error::NumericallyDegenerate(format!(
            "z-score of '{}': standard deviation is zero",
            name
        )));
    }
    Ok(values.iter().map(|v| v.map(|s| (s - mean) / sd)).collect())
}

/// Collapse to {0, 1, 2}: `S <= c0 -> 0`, `S <= c1 -> 1`, otherwise 2
pub fn three_bin(values: &[Option<f64>], cuts: [f64; 2]) -> Vec<Option<f64>> {
    values
        .iter()
        .map(|v| {
            v.map(|s| {
                if s <= cuts[0] {
                    0.0
                } else if s <= cuts[1] {
                    1.0
                } else {
                    2.0
                }
            })
        })
        .collect()
}

/// Audit record for one derived column
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DerivationRecord {
    pub name: String,
    pub source: String,
    pub op: String,
    pub detail: String,
    pub n_defined: usize,
    /// Three-bin derivation fell back to [`DEFAULT_THREE_BIN_CUTS`]
    pub default_cuts: bool,
}

/// Numeric view of a column after missing-value masking
pub fn numeric_column(
    dataset: &Dataset,
    codebook: &Codebook,
    policy: &MissingPolicy,
    name: &str,
) -> Result<Vec<Option<f64>>> {
    let entry = codebook.entry(name);
    Ok(dataset
        .column(name)?
        .into_iter()
        .map(|raw| policy.numeric(raw, entry))
        .collect())
}

fn apply_one(
    dataset: &Dataset,
    codebook: &Codebook,
    policy: &MissingPolicy,
    derivation: &Derivation,
) -> Result<(Vec<Option<f64>>, String, bool)> {
    let source = numeric_column(dataset, codebook, policy, &derivation.source)?;
    let entry = codebook.entry(&derivation.source);
    Ok(match derivation.op {
        DerivationOp::Indicator => (indicator(&source), "1 if S > 0 else 0".to_string(), false),
        DerivationOp::Aligned => {
            let flip = entry.map(|e| e.flip_sign).unwrap_or(false);
            let detail = if flip { "-S (flip_sign)" } else { "S (no flip_sign)" };
            (aligned(&source, flip), detail.to_string(), false)
        }
        DerivationOp::Zscore => (
            zscore(&derivation.name, &source)?,
            "(S - mean) / population sd".to_string(),
            false,
        ),
        DerivationOp::ThreeBin => {
            let declared = derivation.cuts.or_else(|| entry.and_then(|e| e.three_bin_cuts));
            let cuts = declared.unwrap_or(DEFAULT_THREE_BIN_CUTS);
            let mut detail = format!("<= {} -> 0, <= {} -> 1, else 2", cuts[0], cuts[1]);
            if declared.is_none() {
                warn!(name = %derivation.name, ?cuts, "No three-bin cuts declared, using defaults");
                detail.push_str(" (default cuts, none declared)");
            }
            (three_bin(&source, cuts), detail, declared.is_none())
        }
    })
}

/// Apply every declared derivation, appending columns to a copy of the dataset
pub fn apply_derivations(
    dataset: &Dataset,
    codebook: &Codebook,
    policy: &MissingPolicy,
) -> Result<(Dataset, Vec<DerivationRecord>)> {
    let mut derived = dataset.clone();
    let mut records = Vec::with_capacity(codebook.derivations.len());
    for derivation in &codebook.derivations {
        if dataset.has_column(&derivation.name) {
            return Err(Error::SchemaConflict(format!(
                "derived variable '{}' collides with a dataset column",
                derivation.name
            )));
        }
        let (values, detail, default_cuts) = apply_one(&derived, codebook, policy, derivation)?;
        let n_defined = values.iter().filter(|v| v.is_some()).count();
        debug!(name = %derivation.name, source = %derivation.source, op = %derivation.op, n_defined, "Derived column");
        derived.set_column(
            &derivation.name,
            values.into_iter().map(format_optional).collect(),
        )?;
        records.push(DerivationRecord {
            name: derivation.name.clone(),
            source: derivation.source.clone(),
            op: derivation.op.to_string(),
            detail,
            n_defined,
            default_cuts,
        });
    }
    info!(derived = records.len(), "Derivations applied");
    Ok((derived, records))
}
