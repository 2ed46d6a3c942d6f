//! Imputation diagnostics and the complete-case review
//!
//! `mean_after` and `sd_after` average the within-imputation mean and sample
//! SD over the m completions. The review compares them with the complete-case
//! moments and flags a relative mean shift above [`REVIEW_FLAG_RATIO`].

use crate::frame::{completed_values, Donors, Frame};
use cbp_common::stats;
use cbp_common::suppression::{Cell, ColumnKind, PublicTable};
use cbp_common::Result;
use serde::Serialize;

/// `|delta_mean| / |mean_complete_case|` above which a column is flagged
pub const REVIEW_FLAG_RATIO: f64 = 0.15;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ColumnDiagnostics {
    pub variable: String,
    pub sanitized: String,
    pub kind: String,
    pub n_total: u64,
    pub missing_before: u64,
    pub missing_fraction: f64,
    pub mean_after: Option<f64>,
    pub sd_after: Option<f64>,
    pub notes: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReviewRow {
    pub variable: String,
    pub n_complete: u64,
    pub mean_complete_case: Option<f64>,
    pub sd_complete_case: Option<f64>,
    pub mean_imputed: Option<f64>,
    pub sd_imputed: Option<f64>,
    pub delta_mean: Option<f64>,
    pub delta_sd: Option<f64>,
    /// `None` when the complete-case mean is zero
    pub flagged: Option<bool>,
}

fn average(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    let collected: Option<Vec<f64>> = values.collect();
    collected.and_then(|v| stats::mean(&v))
}

/// Diagnostics for every kept column plus a row per dropped column
pub fn diagnostics(
    frame: &Frame,
    completions: &[Donors],
    sanitized: &[String],
    dropped: &[String],
) -> Vec<ColumnDiagnostics> {
    let n = frame.n_rows as u64;
    let mut rows: Vec<ColumnDiagnostics> = frame
        .columns
        .iter()
        .enumerate()
        .map(|(j, column)| {
            let (mean_after, sd_after) = if column.kind.is_numeric() {
                let per_draw: Vec<Vec<f64>> = completions
                    .iter()
                    .map(|d| completed_values(column, &d[j]).into_iter().flatten().collect())
                    .collect();
                (
                    average(per_draw.iter().map(|v| stats::mean(v))),
                    average(per_draw.iter().map(|v| stats::sample_sd(v))),
                )
            } else {
                (None, None)
            };
            let missing = column.n_missing() as u64;
            ColumnDiagnostics {
                variable: column.name.clone(),
                sanitized: sanitized.get(j).cloned().unwrap_or_default(),
                kind: column.kind.to_string(),
                n_total: n,
                missing_before: missing,
                missing_fraction: if n == 0 { 0.0 } else { missing as f64 / n as f64 },
                mean_after,
                sd_after,
                notes: String::new(),
            }
        })
        .collect();
    rows.extend(dropped.iter().map(|name| ColumnDiagnostics {
        variable: name.clone(),
        sanitized: String::new(),
        kind: String::new(),
        n_total: n,
        missing_before: n,
        missing_fraction: if n == 0 { 0.0 } else { 1.0 },
        mean_after: None,
        sd_after: None,
        notes: "dropped: no observed values".to_string(),
    }));
    rows
}

/// Complete-case vs imputed review for numeric columns
pub fn review(frame: &Frame, diagnostics: &[ColumnDiagnostics]) -> Vec<ReviewRow> {
    frame
        .columns
        .iter()
        .zip(diagnostics)
        .filter(|(column, _)| column.kind.is_numeric())
        .map(|(column, diag)| {
            let observed = column.observed_values();
            let mean_cc = stats::mean(&observed);
            let sd_cc = stats::sample_sd(&observed);
            let delta_mean = diag.mean_after.zip(mean_cc).map(|(a, c)| a - c);
            let delta_sd = diag.sd_after.zip(sd_cc).map(|(a, c)| a - c);
            let flagged = match (delta_mean, mean_cc) {
                (Some(d), Some(c)) if c != 0.0 => Some(d.abs() / c.abs() > REVIEW_FLAG_RATIO),
                _ => None,
            };
            ReviewRow {
                variable: column.name.clone(),
                n_complete: observed.len() as u64,
                mean_complete_case: mean_cc,
                sd_complete_case: sd_cc,
                mean_imputed: diag.mean_after,
                sd_imputed: diag.sd_after,
                delta_mean,
                delta_sd,
                flagged,
            }
        })
        .collect()
}

pub fn diagnostics_table(rows: &[ColumnDiagnostics]) -> Result<PublicTable> {
    let mut table = PublicTable::new(
        "imputation_diagnostics",
        &[
            ("variable", ColumnKind::Text),
            ("sanitized", ColumnKind::Text),
            ("kind", ColumnKind::Text),
            ("missing_before", ColumnKind::Count),
            ("missing_fraction", ColumnKind::Proportion),
            ("mean_after", ColumnKind::Number),
            ("sd_after", ColumnKind::Number),
            ("notes", ColumnKind::Text),
        ],
    );
    for r in rows {
        table.push_row(vec![
            Cell::text(&r.variable),
            Cell::text(&r.sanitized),
            Cell::text(&r.kind),
            Cell::Count(r.missing_before),
            Cell::Share {
                value: Some(r.missing_fraction),
                base: r.missing_before,
            },
            Cell::Number(r.mean_after.map(round6)),
            Cell::Number(r.sd_after.map(round6)),
            Cell::text(&r.notes),
        ])?;
    }
    Ok(table)
}

pub fn review_table(rows: &[ReviewRow]) -> Result<PublicTable> {
    let mut table = PublicTable::new(
        "imputation_review",
        &[
            ("variable", ColumnKind::Text),
            ("n_complete", ColumnKind::Count),
            ("mean_complete_case", ColumnKind::Number),
            ("sd_complete_case", ColumnKind::Number),
            ("mean_imputed", ColumnKind::Number),
            ("sd_imputed", ColumnKind::Number),
            ("delta_mean", ColumnKind::Number),
            ("delta_sd", ColumnKind::Number),
            ("flag_gt_15pct", ColumnKind::Text),
        ],
    );
    for r in rows {
        table.push_row(vec![
            Cell::text(&r.variable),
            Cell::Count(r.n_complete),
            Cell::Number(r.mean_complete_case.map(round6)),
            Cell::Number(r.sd_complete_case.map(round6)),
            Cell::Number(r.mean_imputed.map(round6)),
            Cell::Number(r.sd_imputed.map(round6)),
            Cell::Number(r.delta_mean.map(round6)),
            Cell::Number(r.delta_sd.map(round6)),
            Cell::text(match r.flagged {
                Some(true) => "Y",
                Some(false) => "N",
                None => "n/a",
            }),
        ])?;
    }
    Ok(table)
}

fn round6(v: f64) -> f64 {
    (v * 1e6).round() / 1e6
}
