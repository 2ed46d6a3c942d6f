//! Stage sequencing
//!
//! **Order:** Validator → Derivation → Imputation → Controller
//!
//! Every stage runs in this process against the same immutable
//! [`RunConfig`]. A stage commits its artifacts before returning, so the
//! next stage only ever reads closed files. The first fatal error stops the
//! run; later stages are reported as not run.
//!
//! Imputation runs only when something consumes the stack: a registered
//! hypothesis with `use_imputation = Y`, or an explicit
//! `imputation.columns` list.

use cbp_common::cli::{path_flag, regeneration_command};
use cbp_common::registry::Registry;
use cbp_common::{Error, Result, RunConfig};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use tracing::{error, info, warn};

// ========================================
// Stages
// ========================================

/// One analysis stage, named by its component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validator,
    Derivation,
    Imputation,
    Controller,
}

impl Stage {
    /// Execution order
    pub const ALL: [Stage; 4] = [
        Stage::Validator,
        Stage::Derivation,
        Stage::Imputation,
        Stage::Controller,
    ];

    pub fn component(self) -> &'static str {
        match self {
            Stage::Validator => cbp_dv::COMPONENT,
            Stage::Derivation => cbp_md::COMPONENT,
            Stage::Imputation => cbp_mi::COMPONENT,
            Stage::Controller => cbp_ac::COMPONENT,
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Stage::Validator => "Codebook & design validation",
            Stage::Derivation => "Missingness & derivation",
            Stage::Imputation => "Multiple imputation",
            Stage::Controller => "Analysis & multiplicity",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Completed,
    Skipped,
    Failed,
    /// An earlier stage failed
    NotRun,
}

impl StageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StageStatus::Completed => "completed",
            StageStatus::Skipped => "skipped",
            StageStatus::Failed => "failed",
            StageStatus::NotRun => "not_run",
        }
    }
}

/// What one stage did
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    pub component: &'static str,
    pub status: StageStatus,
    pub summary: String,
    pub warnings: Vec<String>,
    /// Command that regenerates this stage on its own
    pub command: String,
}

// ========================================
// Invocation
// ========================================

/// How the orchestrator was invoked; the source of every stage command
#[derive(Debug, Clone)]
pub struct Invocation {
    pub config_path: PathBuf,
    /// Effective seed (command line over configuration)
    pub seed: u64,
    /// Output root given on the command line, if any
    pub output_root: Option<PathBuf>,
}

impl Invocation {
    /// Regeneration command for a component under this invocation
    pub fn command_for(&self, component: &str) -> String {
        regeneration_command(
            component,
            &self.config_path,
            Some(self.seed),
            &path_flag("output-root", self.output_root.as_ref()),
        )
    }
}

// ========================================
// Failure
// ========================================

/// Fatal error raised by a stage
#[derive(Debug)]
pub struct StageFailure {
    pub stage: Stage,
    pub command: String,
    pub error: Error,
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed [{}]: {} | regenerate: {}",
            self.stage.component(),
            self.error.kind(),
            self.error,
            self.command
        )
    }
}

impl std::error::Error for StageFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Reports for every stage plus the fatal error that stopped the run, if any
#[derive(Debug)]
pub struct PipelineRun {
    pub reports: Vec<StageReport>,
    pub failure: Option<StageFailure>,
}

impl PipelineRun {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }

    pub fn report(&self, stage: Stage) -> Option<&StageReport> {
        self.reports.iter().find(|r| r.stage == stage)
    }

    pub fn warning_count(&self) -> usize {
        self.reports.iter().map(|r| r.warnings.len()).sum()
    }
}

// ========================================
// Execution
// ========================================

/// Whether any consumer of the imputation stack is configured
pub fn imputation_required(config: &RunConfig) -> Result<bool> {
    if config.imputation.columns.is_some() {
        return Ok(true);
    }
    let Some(path) = config.optional_path("registry") else {
        return Ok(false);
    };
    let registry = Registry::load(&path)?;
    Ok(registry
        .records()
        .iter()
        .any(|r| r.use_imputation && r.status.is_registered()))
}

/// Summary line and warnings of a completed stage
type StageResult = Result<Option<(String, Vec<String>)>>;

fn execute(stage: Stage, config: &RunConfig, command: &str) -> StageResult {
    match stage {
        Stage::Validator => {
            let outcome = cbp_dv::run(config, command)?;
            let summary = format!(
                "{} design; {} rows x {} columns; {} codebook entries aligned",
                outcome.manifest.design, outcome.n_rows, outcome.n_cols, outcome.aligned_entries
            );
            Ok(Some((summary, outcome.warnings.as_slice().to_vec())))
        }
        Stage::Derivation => {
            let outcome = cbp_md::run(config, command)?;
            let summary = format!(
                "{} key variables profiled; {} derived columns",
                outcome.key_vars.len(),
                outcome.derivations.len()
            );
            Ok(Some((summary, outcome.warnings.as_slice().to_vec())))
        }
        Stage::Imputation => {
            if !imputation_required(config)? {
                return Ok(None);
            }
            let outcome = cbp_mi::run(config, command)?;
            let summary = format!(
                "{} back-end; m = {}; {} columns imputed",
                outcome.manifest.backend.as_str(),
                outcome.manifest.m,
                outcome.manifest.columns.len()
            );
            Ok(Some((summary, outcome.warnings.as_slice().to_vec())))
        }
        Stage::Controller => {
            let outcome = cbp_ac::run(config, command)?;
            let fitted = outcome.primary_rows().count();
            let estimated = outcome.primary_rows().filter(|r| r.is_estimated()).count();
            let in_scope: usize = outcome.scopes.iter().map(|s| s.ids.len()).sum();
            let summary = format!(
                "{} hypotheses fitted ({} estimated); {} result rows; {} BH-scope entries",
                fitted,
                estimated,
                outcome.rows.len(),
                in_scope
            );
            Ok(Some((summary, outcome.warnings.as_slice().to_vec())))
        }
    }
}

/// Run every stage in order, stopping at the first fatal error
pub fn run_stages(config: &RunConfig, invocation: &Invocation) -> PipelineRun {
    let mut reports = Vec::with_capacity(Stage::ALL.len());
    let mut failure = None;

    for stage in Stage::ALL {
        let command = invocation.command_for(stage.component());
        let mut report = StageReport {
            stage,
            component: stage.component(),
            status: StageStatus::NotRun,
            summary: String::new(),
            warnings: Vec::new(),
            command: command.clone(),
        };
        if failure.is_some() {
            reports.push(report);
            continue;
        }

        info!(component = stage.component(), "Starting stage");
        match execute(stage, config, &command) {
            Ok(Some((summary, warnings))) => {
                info!(
                    component = stage.component(),
                    warnings = warnings.len(),
                    "Stage completed"
                );
                report.status = StageStatus::Completed;
                report.summary = summary;
                report.warnings = warnings;
            }
            Ok(None) => {
                info!(component = stage.component(), "Stage skipped");
                report.status = StageStatus::Skipped;
                report.summary = "no hypothesis uses the imputation stack".to_string();
            }
            Err(e) => {
                error!(component = stage.component(), kind = %e.kind(), "Stage failed: {}", e);
                report.status = StageStatus::Failed;
                report.summary = e.to_string();
                failure = Some(StageFailure {
                    stage,
                    command,
                    error: e,
                });
            }
        }
        reports.push(report);
    }

    if let Some(f) = &failure {
        let not_run = reports.iter().filter(|r| r.status == StageStatus::NotRun).count();
        warn!(component = f.stage.component(), not_run, "Run stopped after fatal error");
    }
    PipelineRun { reports, failure }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order_matches_components() {
        let components: Vec<&str> = Stage::ALL.iter().map(|s| s.component()).collect();
        assert_eq!(components, vec!["cbp-dv", "cbp-md", "cbp-mi", "cbp-ac"]);
    }

    #[test]
    fn test_command_for_carries_seed_and_output_root() {
        let invocation = Invocation {
            config_path: PathBuf::from("config/run.yaml"),
            seed: 20251016,
            output_root: Some(PathBuf::from("out dir")),
        };
        assert_eq!(
            invocation.command_for("cbp-md"),
            "cbp-md --config config/run.yaml --seed 20251016 --output-root 'out dir'"
        );
    }

    #[test]
    fn test_failure_display_names_component_kind_and_command() {
        let failure = StageFailure {
            stage: Stage::Validator,
            command: "cbp-dv --config run.yaml --seed 7".to_string(),
            error: Error::SchemaConflict("'age' row 3".to_string()),
        };
        assert_eq!(
            failure.to_string(),
            "cbp-dv failed [SchemaConflict]: Schema conflict: 'age' row 3 | regenerate: cbp-dv --config run.yaml --seed 7"
        );
    }
}
