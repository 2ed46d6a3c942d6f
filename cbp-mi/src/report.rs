//! Markdown QC note (`qc/imputation_report.md`)

use crate::diagnostics::ReviewRow;
use crate::stack::ImputationManifest;
use cbp_common::logging::Warnings;
use cbp_common::suppression::markdown_grid;

pub fn render(command: &str, manifest: &ImputationManifest, review: &[ReviewRow], warnings: &Warnings) -> String {
    let mut out = String::new();
    out.push_str("# Multiple Imputation\n\n");
    out.push_str(&format!("- Command: `{}`\n", command));
    out.push_str(&format!("- Seed: {}\n", manifest.seed));
    out.push_str(&format!("- Back-end: {}\n", manifest.backend.as_str()));
    out.push_str(&format!("- Completions (m): {}\n", manifest.m));
    out.push_str(&format!("- Burn-in passes: {}\n", manifest.burn_in));
    out.push_str(&format!(
        "- Sub-seeds: {}\n",
        manifest
            .sub_seeds
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    ));
    out.push_str(&format!("- Stack: `{}` (sha256 {})\n\n", manifest.stack_path, manifest.stack_sha256));

    out.push_str("## Columns\n\n");
    let rows: Vec<Vec<String>> = manifest
        .columns
        .iter()
        .map(|c| vec![c.original.clone(), c.sanitized.clone(), c.kind.to_string()])
        .collect();
    out.push_str(&markdown_grid(&["original", "sanitized", "kind"].map(String::from), &rows));
    out.push('\n');

    out.push_str("## Dropped columns\n\n");
    if manifest.dropped_columns.is_empty() {
        out.push_str("None.\n\n");
    } else {
        for name in &manifest.dropped_columns {
            out.push_str(&format!("- `{}` (no observed values)\n", name));
        }
        out.push('\n');
    }

    out.push_str("## Complete-case review\n\n");
    let flagged: Vec<&str> = review
        .iter()
        .filter(|r| r.flagged == Some(true))
        .map(|r| r.variable.as_str())
        .collect();
    if flagged.is_empty() {
        out.push_str("No column shifted its mean by more than 15%.\n\n");
    } else {
        out.push_str(&format!("Mean shift above 15%: {}\n\n", flagged.join(", ")));
    }

    out.push_str("## Warnings\n\n");
    out.push_str(&warnings.to_markdown());
    out
}
