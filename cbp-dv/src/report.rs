//! Markdown validation report (`qc/validation_report.md`)

use crate::alignment::AlignmentOutcome;
use crate::detection::Candidate;
use cbp_common::design::DesignManifest;
use cbp_common::logging::Warnings;
use cbp_common::suppression::markdown_grid;

/// Everything the report needs
pub struct ReportContext<'a> {
    pub command: &'a str,
    pub timestamp: &'a str,
    pub seed: u64,
    pub n_rows: usize,
    pub n_cols: usize,
    pub alignment: &'a AlignmentOutcome,
    pub candidates: &'a [Candidate],
    pub manifest: &'a DesignManifest,
    pub warnings: &'a Warnings,
}

fn name_list(names: &[String]) -> String {
    if names.is_empty() {
        "none".to_string()
    } else {
        names.iter().map(|n| format!("`{}`", n)).collect::<Vec<_>>().join(", ")
    }
}

pub fn render(ctx: &ReportContext<'_>) -> String {
    let mut out = String::new();
    out.push_str("# Codebook & Design Validation\n\n");
    out.push_str(&format!("- Command: `{}`\n", ctx.command));
    out.push_str(&format!("- Timestamp: {}\n", ctx.timestamp));
    out.push_str(&format!("- Seed: {}\n", ctx.seed));
    out.push_str(&format!("- Dataset: {} rows x {} columns\n\n", ctx.n_rows, ctx.n_cols));

    out.push_str("## Schema alignment\n\n");
    out.push_str(&format!("- Entries aligned: {}\n", ctx.alignment.aligned.len()));
    out.push_str(&format!(
        "- Undocumented dataset columns: {}\n",
        name_list(&ctx.alignment.undocumented)
    ));
    out.push_str(&format!(
        "- Codebook entries without a column: {}\n\n",
        name_list(&ctx.alignment.unused)
    ));

    if !ctx.alignment.conflicts.is_empty() {
        out.push_str("### Schema conflicts\n\n");
        let rows: Vec<Vec<String>> = ctx
            .alignment
            .conflicts
            .iter()
            .map(|c| vec![c.variable.clone(), c.row.to_string(), c.value.clone(), c.detail.clone()])
            .collect();
        out.push_str(&markdown_grid(
            &["variable", "row", "value", "problem"].map(String::from),
            &rows,
        ));
        out.push('\n');
    }

    out.push_str("## Design detection\n\n");
    if ctx.candidates.is_empty() {
        out.push_str("No design-related columns matched.\n\n");
    } else {
        let rows: Vec<Vec<String>> = ctx
            .candidates
            .iter()
            .map(|c| {
                vec![
                    c.column.clone(),
                    c.role.to_string(),
                    c.keyword.clone(),
                    c.excluded.clone().unwrap_or_else(|| "confirmed".to_string()),
                ]
            })
            .collect();
        out.push_str(&markdown_grid(
            &["column", "role", "keyword", "status"].map(String::from),
            &rows,
        ));
        out.push('\n');
    }

    let m = ctx.manifest;
    let opt = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".to_string());
    out.push_str("## Resolved design\n\n");
    out.push_str(&format!("- design: **{}**\n", m.design));
    out.push_str(&format!("- weight_var: {}\n", opt(&m.weight_var)));
    out.push_str(&format!("- strata_var: {}\n", opt(&m.strata_var)));
    out.push_str(&format!("- cluster_var: {}\n", opt(&m.cluster_var)));
    out.push_str(&format!("- replicate_weights: {}\n", m.replicate_weights.len()));
    out.push_str(&format!("- fpc: {}\n", opt(&m.fpc)));
    if let Some(j) = &m.justification {
        out.push_str(&format!("- justification: {}\n", j));
    }
    for note in &m.notes {
        out.push_str(&format!("- note: {}\n", note));
    }

    out.push_str("\n## Warnings\n\n");
    out.push_str(&ctx.warnings.to_markdown());
    out
}
