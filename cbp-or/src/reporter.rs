//! Run summary and overview table
//!
//! Runs after the last stage, even when a stage failed, so the QC note
//! always says how far the run got and how to regenerate each piece.

use crate::pipeline::{PipelineRun, StageStatus};
use cbp_common::suppression::{markdown_grid, Cell, ColumnKind, PublicTable};
use cbp_common::Result;

pub const SUMMARY_PATH: &str = "qc/run_summary.md";

pub const OVERVIEW_TABLE: &str = "run_overview";

pub struct SummaryContext<'a> {
    pub command: &'a str,
    pub seed: u64,
    pub threshold: u64,
    pub fdr_q: f64,
    pub run: &'a PipelineRun,
}

/// `tables/run_overview`: one row per stage
pub fn overview_table(run: &PipelineRun) -> Result<PublicTable> {
    let mut table = PublicTable::new(
        OVERVIEW_TABLE,
        &[
            ("stage", ColumnKind::Text),
            ("component", ColumnKind::Text),
            ("status", ColumnKind::Text),
            ("warnings", ColumnKind::Text),
            ("regenerate", ColumnKind::Text),
        ],
    );
    for report in &run.reports {
        table.push_row(vec![
            Cell::text(report.stage.title()),
            Cell::text(report.component),
            Cell::text(report.status.as_str()),
            Cell::text(report.warnings.len().to_string()),
            Cell::text(report.command.clone()),
        ])?;
    }
    Ok(table)
}

/// Markdown for `qc/run_summary.md`
pub fn render_summary(ctx: &SummaryContext<'_>) -> String {
    let mut out = String::new();
    out.push_str("# Run Summary\n\n");
    out.push_str(&format!("- Command: `{}`\n", ctx.command));
    out.push_str(&format!("- Seed: {}\n", ctx.seed));
    out.push_str(&format!("- Small-cell threshold: {}\n", ctx.threshold));
    out.push_str(&format!("- FDR level: {}\n", ctx.fdr_q));
    let outcome = match &ctx.run.failure {
        None => "completed".to_string(),
        Some(f) => format!("stopped at {}", f.stage.component()),
    };
    out.push_str(&format!("- Outcome: {}\n\n", outcome));

    out.push_str("## Stages\n\n");
    let rows: Vec<Vec<String>> = ctx
        .run
        .reports
        .iter()
        .map(|r| {
            vec![
                r.component.to_string(),
                r.stage.title().to_string(),
                r.status.as_str().to_string(),
                r.warnings.len().to_string(),
                r.summary.clone(),
            ]
        })
        .collect();
    out.push_str(&markdown_grid(
        &["component", "stage", "status", "warnings", "summary"].map(String::from),
        &rows,
    ));
    out.push('\n');

    if let Some(f) = &ctx.run.failure {
        out.push_str("## Failure\n\n");
        out.push_str(&format!("- Component: {}\n", f.stage.component()));
        out.push_str(&format!("- Kind: {}\n", f.error.kind()));
        out.push_str(&format!("- Error: {}\n", f.error));
        out.push_str(&format!("- Regenerate: `{}`\n", f.command));
        out.push_str("- Partial artifacts of the failed stage carry a `.partial` suffix.\n\n");
    }

    for r in ctx.run.reports.iter().filter(|r| r.status != StageStatus::NotRun) {
        out.push_str(&format!("## {}\n\n", r.component));
        out.push_str(&format!("Regenerate: `{}`\n\n", r.command));
        if r.warnings.is_empty() {
            out.push_str("No warnings.\n\n");
        } else {
            for w in &r.warnings {
                out.push_str(&format!("- {}\n", w));
            }
            out.push('\n');
        }
    }
    out
}
