//! Markdown QC note (`qc/missingness_report.md`)

use crate::derive::DerivationRecord;
use crate::profile::{PatternSummary, VariableProfile};
use cbp_common::logging::Warnings;
use cbp_common::suppression::{markdown_grid, Suppressor};

pub struct ReportContext<'a> {
    pub command: &'a str,
    pub seed: u64,
    pub suppressor: &'a Suppressor,
    pub profiles: &'a [VariableProfile],
    pub patterns: &'a PatternSummary,
    pub derivations: &'a [DerivationRecord],
    pub warnings: &'a Warnings,
}

pub fn render(ctx: &ReportContext<'_>) -> String {
    let s = ctx.suppressor;
    let mut out = String::new();
    out.push_str("# Missingness & Derivation\n\n");
    out.push_str(&format!("- Command: `{}`\n", ctx.command));
    out.push_str(&format!("- Seed: {}\n", ctx.seed));
    out.push_str(&format!("- Small-cell threshold: {}\n", s.threshold()));
    out.push_str(&format!("- Key variables: {}\n", ctx.profiles.len()));
    out.push_str(&format!(
        "- Complete cases across key variables: {}\n\n",
        s.count(ctx.patterns.complete_cases_across_key_vars)
    ));

    out.push_str("## Missing-code conventions\n\n");
    if ctx.profiles.is_empty() {
        out.push_str("No registered variables.\n\n");
    } else {
        let rows: Vec<Vec<String>> = ctx
            .profiles
            .iter()
            .map(|p| vec![p.variable.clone(), p.convention.to_string()])
            .collect();
        out.push_str(&markdown_grid(&["variable", "convention"].map(String::from), &rows));
        out.push('\n');
    }

    out.push_str("## Derivations\n\n");
    if ctx.derivations.is_empty() {
        out.push_str("None declared.\n\n");
    } else {
        let rows: Vec<Vec<String>> = ctx
            .derivations
            .iter()
            .map(|d| {
                vec![
                    d.name.clone(),
                    d.source.clone(),
                    d.op.clone(),
                    d.detail.clone(),
                    s.count(d.n_defined as u64),
                ]
            })
            .collect();
        out.push_str(&markdown_grid(
            &["name", "source", "op", "rule", "n_defined"].map(String::from),
            &rows,
        ));
        out.push('\n');
    }

    out.push_str("## Warnings\n\n");
    out.push_str(&ctx.warnings.to_markdown());
    out
}
