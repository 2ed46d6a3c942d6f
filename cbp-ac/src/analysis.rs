//! Per-hypothesis analysis
//!
//! One hypothesis yields one row per scenario. A numerically degenerate
//! hypothesis (analytic n below the floor, singular design, no convergence)
//! still yields its rows, with empty estimates and the reason in `notes`;
//! every other error propagates.

use crate::bh::NEGATIVE_CONTROL_FAMILY;
use crate::fit::{estimate, Fit};
use crate::model::ModelKind;
use crate::pooling::rubin;
use crate::prepare::{prepare, Prepared};
use crate::results::ResultRow;
use crate::sensitivity::{run_scenario, Scenario};
use cbp_common::codebook::Codebook;
use cbp_common::dataset::Dataset;
use cbp_common::design::DesignManifest;
use cbp_common::missing::MissingPolicy;
use cbp_common::registry::HypothesisRecord;
use cbp_common::stats::wald;
use cbp_common::{Error, Result, SeedService};
use tracing::{debug, info, warn};

/// Everything a hypothesis fit reads
pub struct Context<'a> {
    pub codebook: &'a Codebook,
    pub policy: &'a MissingPolicy,
    pub design: &'a DesignManifest,
    pub derived: &'a Dataset,
    /// Completed tables, present when some hypothesis delegates to them
    pub completed: Option<&'a [Dataset]>,
    pub scenarios: &'a [Scenario],
    pub seeds: &'a SeedService,
    pub min_analytic_n: usize,
    pub command: &'a str,
}

impl Context<'_> {
    fn tables(&self, record: &HypothesisRecord) -> Result<Vec<&Dataset>> {
        if !record.use_imputation {
            return Ok(vec![self.derived]);
        }
        let completed = self.completed.ok_or_else(|| {
            Error::InputMissing(format!(
                "imputation stack (hypothesis '{}' sets use_imputation = Y)",
                record.id
            ))
        })?;
        Ok(completed.iter().collect())
    }

    fn weight_var(&self) -> Option<&str> {
        if self.design.is_weighted() {
            self.design.weight_var.as_deref()
        } else {
            None
        }
    }
}

fn effect_size_metric(kind: ModelKind) -> &'static str {
    match kind {
        ModelKind::Ols => "unstandardized_coefficient",
        ModelKind::Logit => "log_odds_ratio",
        ModelKind::OrdinalLogit => "log_cumulative_odds_ratio",
    }
}

fn limitations(ctx: &Context, record: &HypothesisRecord, scenario: &Scenario, m: usize) -> String {
    let mut out = Vec::new();
    if *scenario != Scenario::Primary {
        out.push(scenario.describe());
    }
    if m > 1 {
        out.push(format!("pooled over {} imputations (Rubin)", m));
    } else {
        out.push("complete-case (listwise) analysis".to_string());
    }
    match ctx.weight_var() {
        Some(w) => out.push(format!("weighted by {} with HC1 variance", w)),
        None if ctx.design.is_weighted() => out.push("design without weights; HC1 variance".to_string()),
        None => out.push("unweighted (srs design)".to_string()),
    }
    if record.family == NEGATIVE_CONTROL_FAMILY {
        out.push("negative control; not confirmatory evidence".to_string());
    } else if !record.targeted {
        out.push("untargeted; outside BH scope".to_string());
    }
    out.join("; ")
}

fn base_row(
    ctx: &Context,
    record: &HypothesisRecord,
    kind: ModelKind,
    scenario: &Scenario,
    m: usize,
) -> ResultRow {
    ResultRow {
        hypothesis_id: record.id.clone(),
        family: record.family.clone(),
        scenario_id: scenario.id(),
        targeted: record.targeted,
        status: record.status,
        model: kind.name().to_string(),
        outcome: record.outcome_var.clone(),
        predictor: record.predictors.first().cloned().unwrap_or_default(),
        controls: record.controls.clone(),
        n_analytic: None,
        m_imputations: m,
        estimate: None,
        se: None,
        ci_low: None,
        ci_high: None,
        p_value: None,
        effect_size_metric: effect_size_metric(kind).to_string(),
        diagnostics: String::new(),
        limitations: limitations(ctx, record, scenario, m),
        notes: record.notes.clone(),
        command: ctx.command.to_string(),
        seed: ctx.seeds.seed(),
        q_value: None,
        bh_in_scope: String::new(),
        confidence_rating: None,
    }
}

fn mark_degenerate(row: &mut ResultRow, reason: &Error) {
    let note = reason.to_string();
    row.notes = if row.notes.is_empty() {
        note
    } else {
        format!("{} | {}", row.notes, note)
    };
}

fn diagnostics(kind: ModelKind, first: &Fit, pooled_estimate: f64, within: f64, between: f64, m: usize) -> String {
    let mut entries: Vec<(String, String)> = first
        .diagnostics
        .iter()
        .filter(|(k, _)| m == 1 || k == "variance")
        .filter(|(k, _)| k != "odds_ratio")
        .cloned()
        .collect();
    if kind != ModelKind::Ols {
        entries.push(("odds_ratio".into(), format!("{:.4}", pooled_estimate.exp())));
    }
    if m > 1 {
        entries.push(("within".into(), format!("{:.6}", within)));
        entries.push(("between".into(), format!("{:.6}", between)));
    }
    entries
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(";")
}

/// Fit one hypothesis under every scenario
pub fn analyze(ctx: &Context, record: &HypothesisRecord) -> Result<Vec<ResultRow>> {
    let kind = ModelKind::for_hypothesis(record, ctx.codebook)?;
    let caps = kind.capabilities(ctx.design.is_weighted(), record.use_imputation);
    let tables = ctx.tables(record)?;
    let m = tables.len();
    debug!(hypothesis = %record.id, model = %kind, m, ?caps, "Fitting hypothesis");

    let rows_for_all = |reason: &Error| -> Vec<ResultRow> {
        ctx.scenarios
            .iter()
            .map(|s| {
                let mut row = base_row(ctx, record, kind, s, m);
                mark_degenerate(&mut row, reason);
                row
            })
            .collect()
    };

    let samples: Vec<Prepared> = match tables
        .iter()
        .map(|t| {
            prepare(t, ctx.codebook, ctx.policy, record, ctx.weight_var(), ctx.min_analytic_n).map(|mut p| {
                if caps.needs_weights && p.weights.is_none() {
                    p.weights = Some(vec![1.0; p.n()]);
                }
                p
            })
        })
        .collect::<Result<Vec<_>>>()
    {
        Ok(samples) => samples,
        Err(e) if e.is_degenerate() => {
            warn!(hypothesis = %record.id, reason = %e, "Hypothesis is numerically degenerate");
            return Ok(rows_for_all(&e));
        }
        Err(e) => return Err(e),
    };
    let n_analytic = samples.iter().map(Prepared::n).min();

    let primaries: Vec<Fit> = match samples.iter().map(|s| estimate(kind, s)).collect::<Result<Vec<_>>>() {
        Ok(fits) => fits,
        Err(e) if e.is_degenerate() => {
            warn!(hypothesis = %record.id, reason = %e, "Hypothesis is numerically degenerate");
            let mut rows = rows_for_all(&e);
            for row in &mut rows {
                row.n_analytic = n_analytic;
            }
            return Ok(rows);
        }
        Err(e) => return Err(e),
    };

    let mut rows = Vec::with_capacity(ctx.scenarios.len());
    for scenario in ctx.scenarios {
        let mut row = base_row(ctx, record, kind, scenario, m);
        row.n_analytic = n_analytic;
        let per_table: Result<Vec<(f64, f64)>> = samples
            .iter()
            .zip(&primaries)
            .map(|(s, f)| run_scenario(scenario, kind, s, f, ctx.seeds))
            .collect();
        let per_table = match per_table {
            Ok(v) => v,
            Err(e) if e.is_degenerate() => {
                warn!(hypothesis = %record.id, scenario = %scenario.id(), reason = %e, "Scenario is numerically degenerate");
                mark_degenerate(&mut row, &e);
                rows.push(row);
                continue;
            }
            Err(e) => return Err(e),
        };
        let (estimates, variances): (Vec<f64>, Vec<f64>) = per_table.into_iter().unzip();
        let pooled = rubin(&estimates, &variances)?;
        let se = pooled.se();
        let (lo, hi, p) = wald(pooled.estimate, se);
        row.estimate = Some(pooled.estimate);
        row.se = Some(se);
        row.ci_low = Some(lo);
        row.ci_high = Some(hi);
        row.p_value = Some(p);
        row.diagnostics = diagnostics(kind, &primaries[0], pooled.estimate, pooled.within, pooled.between, m);
        rows.push(row);
    }
    info!(
        hypothesis = %record.id,
        model = %kind,
        scenarios = rows.len(),
        n_analytic = ?n_analytic,
        "Hypothesis fitted"
    );
    Ok(rows)
}
