//! # cbp-ac: Analysis & Multiplicity Controller
//!
//! Last analysis stage. Fits every registered hypothesis, runs the
//! configured sensitivity scenarios, applies family-scoped BH within each
//! (family, scenario) group and writes the q-values back to the registry.
//!
//! **Inputs:** the derived dataset (cbp-md), the design manifest (cbp-dv),
//! the hypothesis registry, and, when a hypothesis sets `use_imputation`,
//! the imputation stack and its manifest (cbp-mi).
//!
//! **Hypothesis lifecycle:**
//! - `draft`: skipped with a warning
//! - `dropped`: skipped; never in BH scope
//! - `in_PAP` / `tested`: fitted, then marked `tested`
//!
//! **Artifacts:**
//! - `analysis/results_pre_bh.csv`, `analysis/results.csv` (content-addressed
//!   write, then renamed; deterministic)
//! - `analysis/hypothesis_registry.csv`
//! - `tables/results_summary.{csv,md}`
//! - `qc/analysis_report.md`
//! - `artifacts/cbp-ac_run.json`

pub mod analysis;
pub mod bh;
pub mod completed;
pub mod fit;
pub mod model;
pub mod pooling;
pub mod prepare;
pub mod report;
pub mod results;
pub mod sensitivity;

use cbp_common::artifacts::{sha256_file, write_atomic, ArtifactWriter, RunMetadata};
use cbp_common::codebook::Codebook;
use cbp_common::dataset::Dataset;
use cbp_common::design::DesignManifest;
use cbp_common::logging::Warnings;
use cbp_common::missing::MissingPolicy;
use cbp_common::registry::{Registry, Status};
use cbp_common::suppression::{Footer, Suppressor};
use cbp_common::{Error, Result, RunConfig, SeedService};
use cbp_mi::stack::MANIFEST_PATH;
use cbp_mi::ImputationManifest;
use results::{ConfidenceRating, ResultRow};
use sensitivity::Scenario;
use std::path::PathBuf;
use tracing::{info, warn};

pub const COMPONENT: &str = "cbp-ac";

pub const REPORT_PATH: &str = "qc/analysis_report.md";

#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub rows: Vec<ResultRow>,
    pub scopes: Vec<bh::ScopeRecord>,
    pub registry: Registry,
    pub warnings: Warnings,
}

impl AnalysisOutcome {
    /// Rows of the baseline scenario
    pub fn primary_rows(&self) -> impl Iterator<Item = &ResultRow> {
        self.rows.iter().filter(|r| r.is_primary())
    }
}

/// Run the controller stage
pub fn run(config: &RunConfig, command: &str) -> Result<AnalysisOutcome> {
    let seeds = SeedService::new(config.seed(), config.rng_backend);
    let mut writer = ArtifactWriter::new(&config.output_root(), COMPONENT);
    let mut meta = RunMetadata::new(COMPONENT, seeds.seed(), command);

    let outcome = control(config, command, &seeds, &mut writer, &mut meta);
    let outcome = writer.finish(outcome)?;

    meta.warnings = outcome.warnings.as_slice().to_vec();
    let outputs: Vec<PathBuf> = [
        results::RESULTS_PRE_BH_PATH,
        results::RESULTS_PATH,
        results::REGISTRY_OUT_PATH,
        "tables/results_summary.csv",
        "tables/results_summary.md",
        REPORT_PATH,
    ]
    .iter()
    .map(|p| writer.resolve(p))
    .collect();
    meta.finish(&outputs);
    write_atomic(&writer.resolve(meta.relative_path()), &meta.to_json_bytes()?)?;
    Ok(outcome)
}

/// Completed tables for hypotheses that delegate to the imputation stack
fn load_completed(
    config: &RunConfig,
    derived: &Dataset,
    derived_path: &std::path::Path,
    meta: &mut RunMetadata,
) -> Result<Vec<Dataset>> {
    let root = config.output_root();
    let manifest_path = root.join(MANIFEST_PATH);
    let manifest = ImputationManifest::load(&manifest_path)?;
    let stack_path = manifest.stack_file(&root);
    meta.record_input("imputation_manifest", &manifest_path)?;
    meta.record_input("imputation_stack", &stack_path)?;
    if sha256_file(&stack_path)? != manifest.stack_sha256 {
        return Err(Error::SchemaConflict(format!(
            "{} does not match the digest in its manifest",
            stack_path.display()
        )));
    }
    let stack = Dataset::read_csv(&stack_path)?;
    completed::completed_tables(derived, derived_path, &manifest, &stack)
}

fn control(
    config: &RunConfig,
    command: &str,
    seeds: &SeedService,
    writer: &mut ArtifactWriter,
    meta: &mut RunMetadata,
) -> Result<AnalysisOutcome> {
    let scenarios = sensitivity::scenarios(&config.sensitivity)?;
    if scenarios.iter().any(|s| matches!(s, Scenario::PseudoWeights { .. })) {
        seeds.ensure_deterministic()?;
    }

    let derived_path = cbp_mi::input_path(config);
    let codebook_path = config.path("codebook")?;
    let registry_path = config.path("registry")?;
    let design_path = config.output_root().join(DesignManifest::relative_path());
    meta.record_input("derived_data", &derived_path)?;
    meta.record_input("codebook", &codebook_path)?;
    meta.record_input("registry", &registry_path)?;
    meta.record_input("design_manifest", &design_path)?;

    let mut warnings = Warnings::new();
    for key in &config.ignored_keys {
        warnings.push(format!("unknown configuration key '{}' ignored", key));
    }

    let design = DesignManifest::load(&design_path)?;
    let derived = Dataset::read_csv(&derived_path)?;
    let codebook = Codebook::load(&codebook_path)?;
    let mut registry = Registry::load(&registry_path)?;
    let policy = MissingPolicy::with_tokens(config.missing_tokens.as_deref());
    if let Some(w) = &design.weight_var {
        if design.is_weighted() && !derived.has_column(w) {
            return Err(Error::InputMissing(format!("design weight column '{}'", w)));
        }
    }

    let needs_stack = registry
        .records()
        .iter()
        .any(|r| r.use_imputation && r.status.is_registered());
    let completed = if needs_stack {
        Some(load_completed(config, &derived, &derived_path, meta)?)
    } else {
        None
    };

    let ctx = analysis::Context {
        codebook: &codebook,
        policy: &policy,
        design: &design,
        derived: &derived,
        completed: completed.as_deref(),
        scenarios: &scenarios,
        seeds,
        min_analytic_n: config.min_analytic_n,
        command,
    };

    let mut rows = Vec::new();
    let mut fitted = Vec::new();
    for record in registry.records() {
        match record.status {
            Status::Dropped => {
                info!(hypothesis = %record.id, "Dropped hypothesis skipped");
            }
            Status::Draft => {
                warnings.push(format!("hypothesis '{}' is still draft and was not fitted", record.id));
            }
            Status::InPap | Status::Tested => {
                let mut produced = analysis::analyze(&ctx, record)?;
                for row in &mut produced {
                    row.status = Status::Tested;
                    if row.is_primary() && row.estimate.is_none() {
                        warnings.push(format!("hypothesis '{}': {}", row.hypothesis_id, row.notes));
                    }
                }
                fitted.push(record.id.clone());
                rows.extend(produced);
            }
        }
    }

    let pre_bh = results::pre_bh_bytes(&rows)?;
    let scopes = bh::adjust(&mut rows);
    for row in &mut rows {
        row.confidence_rating = Some(ConfidenceRating::rate(row, config.fdr_q()));
    }

    for id in &fitted {
        let q = rows
            .iter()
            .find(|r| r.is_primary() && &r.hypothesis_id == id)
            .and_then(|r| r.q_value);
        if let Some(record) = registry.get_mut(id) {
            record.transition(Status::Tested)?;
            record.q_value = q;
        }
    }

    for row in report::failed_negative_controls(&rows) {
        warnings.push(format!(
            "negative control '{}' shows an association (p = {:.4}); check for residual confounding",
            row.hypothesis_id,
            row.p_value.unwrap_or(f64::NAN)
        ));
    }
    for row in rows.iter().filter(|r| r.is_primary() && r.family == bh::NEGATIVE_CONTROL_FAMILY && r.targeted) {
        warnings.push(format!(
            "negative control '{}' is marked targeted; it is excluded from BH regardless",
            row.hypothesis_id
        ));
    }

    let suppressor = Suppressor::new(config.threshold());
    let footer = Footer {
        command: command.to_string(),
        seed: seeds.seed(),
        threshold: suppressor.threshold(),
        notes: vec![format!(
            "BH at q = {} within each (family, scenario); negative controls are never adjusted.",
            config.fdr_q()
        )],
    };
    writer.stage_content_addressed(results::RESULTS_PRE_BH_PATH, pre_bh);
    writer.stage_content_addressed(results::RESULTS_PATH, results::results_bytes(&rows)?);
    writer.stage(results::REGISTRY_OUT_PATH, registry.to_csv_bytes()?);
    writer.stage_table(&results::summary_table(&rows)?, &suppressor, &footer)?;
    writer.stage(
        REPORT_PATH,
        report::render(&report::ReportContext {
            command,
            seed: seeds.seed(),
            fdr_q: config.fdr_q(),
            suppressor: &suppressor,
            design: &design,
            scenarios: &scenarios,
            rows: &rows,
            scopes: &scopes,
            warnings: &warnings,
        })
        .into_bytes(),
    );

    let scenario_ids: Vec<String> = scenarios.iter().map(Scenario::id).collect();
    meta.detail("design", design.design)?;
    meta.detail("scenarios", &scenario_ids)?;
    meta.detail("fitted", &fitted)?;
    meta.detail(
        "bh_scopes",
        scopes
            .iter()
            .map(|s| format!("{}/{}: {}", s.family, s.scenario_id, s.ids.join(";")))
            .collect::<Vec<_>>(),
    )?;
    let degenerate = rows.iter().filter(|r| r.is_primary() && r.estimate.is_none()).count();
    if degenerate > 0 {
        warn!(degenerate, "Hypotheses without estimates");
    }
    info!(
        fitted = fitted.len(),
        rows = rows.len(),
        scenarios = scenarios.len(),
        "Analysis complete"
    );

    Ok(AnalysisOutcome {
        rows,
        scopes,
        registry,
        warnings,
    })
}
