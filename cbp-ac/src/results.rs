//! Result rows and their serializations
//!
//! **Files:**
//! - `analysis/results_pre_bh.csv`: every row before adjustment
//! - `analysis/results.csv`: the same rows plus `q_value`, `bh_in_scope`
//!   and `confidence_rating`
//! - `tables/results_summary.{csv,md}`: the public digest, rendered through
//!   the suppressor
//!
//! Both analysis files are deterministic: no timestamps, fixed row order
//! (registry order, then scenario order).

use cbp_common::dataset::format_optional;
use cbp_common::registry::{flag_str, Status};
use cbp_common::suppression::{Cell, ColumnKind, PublicTable};
use cbp_common::{Error, Result};
use serde::Serialize;

pub const RESULTS_PATH: &str = "analysis/results.csv";
pub const RESULTS_PRE_BH_PATH: &str = "analysis/results_pre_bh.csv";
pub const REGISTRY_OUT_PATH: &str = "analysis/hypothesis_registry.csv";

/// Baseline scenario id
pub const PRIMARY_SCENARIO: &str = "primary";

/// How much weight a row can bear
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceRating {
    /// In BH scope and `q ≤ fdr_q`
    High,
    /// `p < 0.05` without surviving adjustment
    Moderate,
    Low,
    /// No estimate
    NotAssessed,
}

impl ConfidenceRating {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfidenceRating::High => "high",
            ConfidenceRating::Moderate => "moderate",
            ConfidenceRating::Low => "low",
            ConfidenceRating::NotAssessed => "not_assessed",
        }
    }

    pub fn rate(row: &ResultRow, fdr_q: f64) -> Self {
        match (row.p_value, row.q_value) {
            (None, _) => ConfidenceRating::NotAssessed,
            (Some(_), Some(q)) if q <= fdr_q => ConfidenceRating::High,
            (Some(p), _) if p < 0.05 => ConfidenceRating::Moderate,
            _ => ConfidenceRating::Low,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    pub hypothesis_id: String,
    pub family: String,
    pub scenario_id: String,
    pub targeted: bool,
    pub status: Status,
    pub model: String,
    pub outcome: String,
    pub predictor: String,
    pub controls: Vec<String>,
    pub n_analytic: Option<usize>,
    pub m_imputations: usize,
    pub estimate: Option<f64>,
    pub se: Option<f64>,
    pub ci_low: Option<f64>,
    pub ci_high: Option<f64>,
    pub p_value: Option<f64>,
    pub effect_size_metric: String,
    pub diagnostics: String,
    pub limitations: String,
    pub notes: String,
    pub command: String,
    pub seed: u64,
    pub q_value: Option<f64>,
    pub bh_in_scope: String,
    pub confidence_rating: Option<ConfidenceRating>,
}

impl ResultRow {
    /// Row has a usable estimate
    pub fn is_estimated(&self) -> bool {
        self.estimate.is_some() && self.p_value.is_some()
    }

    pub fn is_primary(&self) -> bool {
        self.scenario_id == PRIMARY_SCENARIO
    }

    fn base_record(&self) -> Vec<String> {
        vec![
            self.hypothesis_id.clone(),
            self.family.clone(),
            self.scenario_id.clone(),
            flag_str(self.targeted).to_string(),
            self.status.as_str().to_string(),
            self.model.clone(),
            self.outcome.clone(),
            self.predictor.clone(),
            self.controls.join(";"),
            self.n_analytic.map(|n| n.to_string()).unwrap_or_default(),
            self.m_imputations.to_string(),
            format_optional(self.estimate),
            format_optional(self.se),
            format_optional(self.ci_low),
            format_optional(self.ci_high),
            format_optional(self.p_value),
            self.effect_size_metric.clone(),
            self.diagnostics.clone(),
            self.limitations.clone(),
            self.notes.clone(),
            self.command.clone(),
            self.seed.to_string(),
        ]
    }
}

const BASE_HEADER: [&str; 22] = [
    "hypothesis_id",
    "family",
    "scenario_id",
    "targeted",
    "status",
    "model",
    "outcome",
    "predictor",
    "controls",
    "n_analytic",
    "m_imputations",
    "estimate",
    "se",
    "ci_low",
    "ci_high",
    "p_value",
    "effect_size_metric",
    "diagnostics",
    "limitations",
    "notes",
    "command",
    "seed",
];

fn write_rows(rows: &[ResultRow], adjusted: bool) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    let mut header: Vec<&str> = BASE_HEADER.to_vec();
    if adjusted {
        header.extend(["q_value", "bh_in_scope", "confidence_rating"]);
    }
    writer.write_record(&header)?;
    for row in rows {
        let mut record = row.base_record();
        if adjusted {
            record.push(format_optional(row.q_value));
            record.push(row.bh_in_scope.clone());
            record.push(row.confidence_rating.map(|c| c.as_str().to_string()).unwrap_or_default());
        }
        writer.write_record(&record)?;
    }
    writer
        .into_inner()
        .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))
}

/// `analysis/results_pre_bh.csv` bytes
pub fn pre_bh_bytes(rows: &[ResultRow]) -> Result<Vec<u8>> {
    write_rows(rows, false)
}

/// `analysis/results.csv` bytes
pub fn results_bytes(rows: &[ResultRow]) -> Result<Vec<u8>> {
    write_rows(rows, true)
}

/// Public digest: one line per hypothesis and scenario
pub fn summary_table(rows: &[ResultRow]) -> Result<PublicTable> {
    let mut table = PublicTable::new(
        "results_summary",
        &[
            ("hypothesis_id", ColumnKind::Text),
            ("family", ColumnKind::Text),
            ("scenario_id", ColumnKind::Text),
            ("model", ColumnKind::Text),
            ("n_analytic", ColumnKind::Count),
            ("estimate", ColumnKind::Number),
            ("ci_low", ColumnKind::Number),
            ("ci_high", ColumnKind::Number),
            ("p_value", ColumnKind::Number),
            ("q_value", ColumnKind::Number),
            ("confidence_rating", ColumnKind::Text),
        ],
    );
    let round = |v: Option<f64>| v.map(|v| (v * 1e4).round() / 1e4);
    for row in rows {
        table.push_row(vec![
            Cell::text(&row.hypothesis_id),
            Cell::text(&row.family),
            Cell::text(&row.scenario_id),
            Cell::text(&row.model),
            match row.n_analytic {
                Some(n) => Cell::Count(n as u64),
                None => Cell::text(""),
            },
            Cell::Number(round(row.estimate)),
            Cell::Number(round(row.ci_low)),
            Cell::Number(round(row.ci_high)),
            Cell::Number(round(row.p_value)),
            Cell::Number(round(row.q_value)),
            Cell::text(row.confidence_rating.map(|c| c.as_str()).unwrap_or("")),
        ])?;
    }
    Ok(table)
}
