//! # cbp-or: Orchestrator + Reporter
//!
//! Runs the analysis stages in order within one process and closes the run
//! with a summary of what each stage did.
//!
//! **Stages:** cbp-dv → cbp-md → cbp-mi (only when the stack is consumed)
//! → cbp-ac. See [`pipeline`].
//!
//! **Failure:** the first fatal error stops the run. The failed stage has
//! already flushed its buffered artifacts as `.partial`; the summary is
//! still written and names the component, the error kind and the command
//! that regenerates that stage.
//!
//! **Artifacts:**
//! - `qc/run_summary.md`
//! - `tables/run_overview.{csv,md}`
//! - `artifacts/cbp-or_run.json`

pub mod pipeline;
pub mod reporter;

use cbp_common::artifacts::{write_atomic, ArtifactWriter, RunMetadata};
use cbp_common::suppression::{Footer, Suppressor};
use cbp_common::{Result, RunConfig};
use pipeline::{Invocation, PipelineRun};
use tracing::info;

pub use pipeline::{Stage, StageFailure, StageReport, StageStatus};

pub const COMPONENT: &str = "cbp-or";

/// Run every stage, then write the run summary
///
/// A stage failure is carried in [`PipelineRun::failure`]; the returned
/// error covers only the summary's own writes.
pub fn run(config: &RunConfig, invocation: &Invocation, command: &str) -> Result<PipelineRun> {
    let run = pipeline::run_stages(config, invocation);
    publish(config, command, &run)?;
    Ok(run)
}

fn publish(config: &RunConfig, command: &str, run: &PipelineRun) -> Result<()> {
    let mut writer = ArtifactWriter::new(&config.output_root(), COMPONENT);
    let mut meta = RunMetadata::new(COMPONENT, config.seed(), command);
    if let Some(source) = &config.source {
        meta.record_input("config", source)?;
    }

    let suppressor = Suppressor::new(config.threshold());
    let footer = Footer {
        command: command.to_string(),
        seed: config.seed(),
        threshold: suppressor.threshold(),
        notes: Vec::new(),
    };
    writer.stage_table(&reporter::overview_table(run)?, &suppressor, &footer)?;
    writer.stage(
        reporter::SUMMARY_PATH,
        reporter::render_summary(&reporter::SummaryContext {
            command,
            seed: config.seed(),
            threshold: config.threshold(),
            fdr_q: config.fdr_q(),
            run,
        })
        .into_bytes(),
    );
    let outputs = writer.commit()?;

    meta.warnings = run
        .reports
        .iter()
        .flat_map(|r| r.warnings.iter().map(move |w| format!("{}: {}", r.component, w)))
        .collect();
    meta.detail("stages", &run.reports)?;
    if let Some(f) = &run.failure {
        meta.detail("failed_component", f.stage.component())?;
        meta.detail("failed_kind", f.error.kind().as_str())?;
    }
    meta.finish(&outputs);
    write_atomic(&writer.resolve(meta.relative_path()), &meta.to_json_bytes()?)?;

    info!(
        stages = run.reports.len(),
        warnings = run.warning_count(),
        succeeded = run.succeeded(),
        "Run summary written"
    );
    Ok(())
}
