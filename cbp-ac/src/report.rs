//! Markdown QC note (`qc/analysis_report.md`)

use crate::bh::{ScopeRecord, NEGATIVE_CONTROL_FAMILY};
use crate::results::ResultRow;
use crate::sensitivity::Scenario;
use cbp_common::dataset::format_optional;
use cbp_common::design::DesignManifest;
use cbp_common::logging::Warnings;
use cbp_common::suppression::{markdown_grid, Suppressor};

/// Nominal level at which a negative control is flagged
pub const NEGATIVE_CONTROL_ALPHA: f64 = 0.05;

pub struct ReportContext<'a> {
    pub command: &'a str,
    pub seed: u64,
    pub fdr_q: f64,
    pub suppressor: &'a Suppressor,
    pub design: &'a DesignManifest,
    pub scenarios: &'a [Scenario],
    pub rows: &'a [ResultRow],
    pub scopes: &'a [ScopeRecord],
    pub warnings: &'a Warnings,
}

/// Negative-control rows of the primary scenario whose p-value falls below
/// [`NEGATIVE_CONTROL_ALPHA`]
pub fn failed_negative_controls(rows: &[ResultRow]) -> Vec<&ResultRow> {
    rows.iter()
        .filter(|r| r.is_primary() && r.family == NEGATIVE_CONTROL_FAMILY)
        .filter(|r| r.p_value.map(|p| p < NEGATIVE_CONTROL_ALPHA).unwrap_or(false))
        .collect()
}

pub fn render(ctx: &ReportContext<'_>) -> String {
    let mut out = String::new();
    out.push_str("# Analysis & Multiplicity\n\n");
    out.push_str(&format!("- Command: `{}`\n", ctx.command));
    out.push_str(&format!("- Seed: {}\n", ctx.seed));
    out.push_str(&format!("- Design: {}", ctx.design.design));
    if let Some(w) = &ctx.design.weight_var {
        out.push_str(&format!(" (weight `{}`)", w));
    }
    out.push('\n');
    out.push_str(&format!("- FDR level: {}\n", ctx.fdr_q));
    let ids: Vec<String> = ctx.scenarios.iter().map(Scenario::id).collect();
    out.push_str(&format!("- Scenarios: {}\n\n", ids.join(", ")));

    out.push_str("## BH scope\n\n");
    if ctx.scopes.is_empty() {
        out.push_str("No result rows.\n\n");
    } else {
        let rows: Vec<Vec<String>> = ctx
            .scopes
            .iter()
            .map(|s| {
                vec![
                    s.family.clone(),
                    s.scenario_id.clone(),
                    s.ids.len().to_string(),
                    s.ids.join(";"),
                ]
            })
            .collect();
        out.push_str(&markdown_grid(&["family", "scenario", "m", "in_scope"].map(String::from), &rows));
        out.push('\n');
    }

    out.push_str("## Primary results\n\n");
    let primary: Vec<Vec<String>> = ctx
        .rows
        .iter()
        .filter(|r| r.is_primary())
        .map(|r| {
            vec![
                r.hypothesis_id.clone(),
                r.family.clone(),
                r.model.clone(),
                r.n_analytic.map(|n| ctx.suppressor.count(n as u64)).unwrap_or_default(),
                format_optional(r.estimate.map(round4)),
                format_optional(r.p_value.map(round4)),
                format_optional(r.q_value.map(round4)),
                if r.estimate.is_none() { r.notes.clone() } else { String::new() },
            ]
        })
        .collect();
    if primary.is_empty() {
        out.push_str("No hypotheses were fitted.\n\n");
    } else {
        out.push_str(&markdown_grid(
            &["id", "family", "model", "n", "estimate", "p", "q", "note"].map(String::from),
            &primary,
        ));
        out.push('\n');
    }

    out.push_str("## Negative controls\n\n");
    let controls: Vec<&ResultRow> = ctx
        .rows
        .iter()
        .filter(|r| r.is_primary() && r.family == NEGATIVE_CONTROL_FAMILY)
        .collect();
    if controls.is_empty() {
        out.push_str("None registered.\n\n");
    } else {
        for r in controls {
            let verdict = match r.p_value {
                Some(p) if p < NEGATIVE_CONTROL_ALPHA => "FLAG: association where none is expected",
                Some(_) => "null as expected",
                None => "not estimable",
            };
            out.push_str(&format!(
                "- `{}`: p = {} ({}); excluded from BH\n",
                r.hypothesis_id,
                format_optional(r.p_value.map(round4)),
                verdict
            ));
        }
        out.push('\n');
    }

    out.push_str("## Warnings\n\n");
    out.push_str(&ctx.warnings.to_markdown());
    out
}

fn round4(v: f64) -> f64 {
    (v * 1e4).round() / 1e4
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::tests::row;
    use cbp_common::design::SRS_NO_DESIGN_COLUMNS;

    #[test]
    fn test_negative_control_section() {
        let mut nc = row("NC1", NEGATIVE_CONTROL_FAMILY, Some(0.01));
        nc.targeted = false;
        let rows = vec![row("H1", "confirmatory", Some(0.2)), nc];
        assert_eq!(failed_negative_controls(&rows).len(), 1);

        let design = DesignManifest::srs(SRS_NO_DESIGN_COLUMNS);
        let warnings = Warnings::new();
        let text = render(&ReportContext {
            command: "cbp-ac",
            seed: 7,
            fdr_q: 0.05,
            suppressor: &Suppressor::new(10),
            design: &design,
            scenarios: &[Scenario::Primary],
            rows: &rows,
            scopes: &[],
            warnings: &warnings,
        });
        assert!(text.contains("- `NC1`: p = 0.01 (FLAG: association where none is expected); excluded from BH"));
        assert!(text.contains("- Design: srs\n"));
    }
}
