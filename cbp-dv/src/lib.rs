//! # cbp-dv: Codebook & Design Validator
//!
//! First analysis stage. Reads the raw dataset, the codebook and an optional
//! design YAML, then:
//! 1. aligns the codebook with the observed data ([`alignment`])
//! 2. detects and resolves the survey design ([`detection`])
//! 3. writes the design manifest, the aligned codebook and a Markdown
//!    validation report ([`report`])
//!
//! **Artifacts:**
//! - `artifacts/design_manifest.json`
//! - `artifacts/codebook_aligned.json`
//! - `qc/validation_report.md`
//! - `artifacts/cbp-dv_run.json`
//!
//! The stage fails (after staging the report) only when the codebook
//! contradicts the dataset.

pub mod alignment;
pub mod detection;
pub mod report;

use cbp_common::artifacts::{write_atomic, ArtifactWriter, RunMetadata};
use cbp_common::codebook::{Codebook, RegenerationBlock};
use cbp_common::dataset::Dataset;
use cbp_common::design::DesignManifest;
use cbp_common::logging::Warnings;
use cbp_common::missing::MissingPolicy;
use cbp_common::registry::Registry;
use cbp_common::{Error, Result, RunConfig, SeedService};
use chrono::{SecondsFormat, Utc};
use std::collections::BTreeMap;
use tracing::info;

pub const COMPONENT: &str = "cbp-dv";

pub const REPORT_PATH: &str = "qc/validation_report.md";
pub const ALIGNED_CODEBOOK_PATH: &str = "artifacts/codebook_aligned.json";

/// Summary handed back to the caller (and the orchestrator)
#[derive(Debug, Clone)]
pub struct ValidatorOutcome {
    pub manifest: DesignManifest,
    pub n_rows: usize,
    pub n_cols: usize,
    pub aligned_entries: usize,
    pub warnings: Warnings,
}

/// Run the validator stage
pub fn run(config: &RunConfig, command: &str) -> Result<ValidatorOutcome> {
    let seeds = SeedService::new(config.seed(), config.rng_backend);
    let mut writer = ArtifactWriter::new(&config.output_root(), COMPONENT);
    let mut meta = RunMetadata::new(COMPONENT, seeds.seed(), command);

    let outcome = validate(config, command, &mut writer, &mut meta);
    let outcome = writer.finish(outcome)?;

    meta.warnings = outcome.warnings.as_slice().to_vec();
    meta.finish(&[
        writer.resolve(DesignManifest::relative_path()),
        writer.resolve(ALIGNED_CODEBOOK_PATH),
        writer.resolve(REPORT_PATH),
    ]);
    write_atomic(&writer.resolve(meta.relative_path()), &meta.to_json_bytes()?)?;
    Ok(outcome)
}

fn validate(
    config: &RunConfig,
    command: &str,
    writer: &mut ArtifactWriter,
    meta: &mut RunMetadata,
) -> Result<ValidatorOutcome> {
    let raw_path = config.path("raw_data")?;
    let codebook_path = config.path("codebook")?;
    meta.record_input("raw_data", &raw_path)?;
    meta.record_input("codebook", &codebook_path)?;

    let mut warnings = Warnings::new();
    for key in &config.ignored_keys {
        warnings.push(format!("unknown configuration key '{}' ignored", key));
    }

    let dataset = Dataset::read_csv(&raw_path)?;
    let codebook = Codebook::load(&codebook_path)?;
    let policy = MissingPolicy::with_tokens(config.missing_tokens.as_deref());
    info!(
        rows = dataset.n_rows(),
        cols = dataset.n_cols(),
        entries = codebook.variables.len(),
        "Inputs loaded"
    );

    if let Some(registry_path) = config.optional_path("registry") {
        meta.record_input("registry", &registry_path)?;
        let registry = Registry::load(&registry_path)?;
        warnings.extend(registry.preflight(dataset.header(), &codebook)?);
    }

    let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    let regeneration = RegenerationBlock {
        command: command.to_string(),
        seed: Some(config.seed()),
        timestamp: timestamp.clone(),
        extra: BTreeMap::new(),
    };
    let alignment = alignment::align(&codebook, &dataset, &policy, regeneration)?;
    if !alignment.undocumented.is_empty() {
        warnings.push(format!(
            "{} dataset column(s) have no codebook entry and are kept as undocumented",
            alignment.undocumented.len()
        ));
    }
    if !alignment.unused.is_empty() {
        warnings.push(format!(
            "{} codebook entr(ies) have no dataset column: {}",
            alignment.unused.len(),
            alignment.unused.join(", ")
        ));
    }

    let declaration = match config.optional_path("design") {
        Some(path) => {
            meta.record_input("design", &path)?;
            Some(detection::DesignDeclaration::load(&path)?)
        }
        None => None,
    };
    let candidates = detection::detect(dataset.header(), &codebook);
    for c in candidates.iter().filter(|c| !c.confirmed()) {
        warnings.push(format!(
            "design candidate '{}' excluded: {}",
            c.column,
            c.excluded.as_deref().unwrap_or("")
        ));
    }
    let manifest = detection::resolve(&candidates, dataset.header(), declaration.as_ref())?;
    if let Some(j) = manifest.justification.as_deref() {
        if j.starts_with("Incomplete") {
            warnings.push(j.to_string());
        }
    }

    let report = report::render(&report::ReportContext {
        command,
        timestamp: &timestamp,
        seed: config.seed(),
        n_rows: dataset.n_rows(),
        n_cols: dataset.n_cols(),
        alignment: &alignment,
        candidates: &candidates,
        manifest: &manifest,
        warnings: &warnings,
    });
    writer.stage(REPORT_PATH, report.into_bytes());
    writer.stage(DesignManifest::relative_path(), manifest.to_json_bytes()?);
    writer.stage(ALIGNED_CODEBOOK_PATH, alignment.codebook.to_json_bytes()?);

    if let Some(first) = alignment.conflicts.first() {
        return Err(Error::SchemaConflict(format!(
            "{} codebook/dataset conflict(s); first: {}",
            alignment.conflicts.len(),
            first.describe()
        )));
    }

    meta.detail("design", manifest.design)?;
    meta.detail("candidates", &candidates)?;

    Ok(ValidatorOutcome {
        manifest,
        n_rows: dataset.n_rows(),
        n_cols: dataset.n_cols(),
        aligned_entries: alignment.aligned.len(),
        warnings,
    })
}
