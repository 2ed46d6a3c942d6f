//! # cbp-md: Missingness & Derivation Engine
//!
//! Second analysis stage. Applies the missing-value policy, derives the
//! codebook-declared columns, and profiles every variable a live hypothesis
//! depends on.
//!
//! **Artifacts:**
//! - `data/clean/derived.csv` (raw columns plus derived columns; deterministic)
//! - `tables/missingness_profile.{csv,md}`
//! - `tables/missingness_patterns.{csv,md}`
//! - `tables/indicator_distributions.{csv,md}`
//! - `qc/missingness_report.md`
//! - `artifacts/cbp-md_run.json`
//!
//! **Failure:** a registered variable absent from both the data and the
//! derivations is fatal (`InputMissing`, naming it); a variable referenced
//! only by dropped hypotheses is a warning.

pub mod derive;
pub mod distributions;
pub mod profile;
pub mod report;

use cbp_common::artifacts::{write_atomic, ArtifactWriter, RunMetadata};
use cbp_common::codebook::Codebook;
use cbp_common::dataset::Dataset;
use cbp_common::logging::Warnings;
use cbp_common::missing::{MissingConvention, MissingPolicy};
use cbp_common::registry::Registry;
use cbp_common::suppression::{Footer, Suppressor};
use cbp_common::{Result, RunConfig, SeedService};
use std::collections::BTreeMap;
use tracing::{info, warn};

pub const COMPONENT: &str = "cbp-md";

pub const DERIVED_DATA_PATH: &str = "data/clean/derived.csv";
pub const REPORT_PATH: &str = "qc/missingness_report.md";

/// Summary handed back to the caller (and the orchestrator)
#[derive(Debug, Clone)]
pub struct MissingnessOutcome {
    pub n_rows: usize,
    pub key_vars: Vec<String>,
    pub profiles: Vec<profile::VariableProfile>,
    pub patterns: profile::PatternSummary,
    pub derivations: Vec<derive::DerivationRecord>,
    pub warnings: Warnings,
}

impl MissingnessOutcome {
    /// Convention observed per key variable
    pub fn conventions(&self) -> BTreeMap<String, MissingConvention> {
        self.profiles
            .iter()
            .map(|p| (p.variable.clone(), p.convention))
            .collect()
    }
}

/// Run the missingness stage
pub fn run(config: &RunConfig, command: &str) -> Result<MissingnessOutcome> {
    let seeds = SeedService::new(config.seed(), config.rng_backend);
    let mut writer = ArtifactWriter::new(&config.output_root(), COMPONENT);
    let mut meta = RunMetadata::new(COMPONENT, seeds.seed(), command);

    let outcome = profile_stage(config, command, &mut writer, &mut meta);
    let outcome = writer.finish(outcome)?;

    meta.warnings = outcome.warnings.as_slice().to_vec();
    let mut outputs = vec![writer.resolve(DERIVED_DATA_PATH), writer.resolve(REPORT_PATH)];
    for table in ["missingness_profile", "missingness_patterns", "indicator_distributions"] {
        outputs.push(writer.resolve(format!("tables/{}.csv", table)));
        outputs.push(writer.resolve(format!("tables/{}.md", table)));
    }
    meta.finish(&outputs);
    write_atomic(&writer.resolve(meta.relative_path()), &meta.to_json_bytes()?)?;
    Ok(outcome)
}

fn profile_stage(
    config: &RunConfig,
    command: &str,
    writer: &mut ArtifactWriter,
    meta: &mut RunMetadata,
) -> Result<MissingnessOutcome> {
    let raw_path = config.path("raw_data")?;
    let codebook_path = config.path("codebook")?;
    let registry_path = config.path("registry")?;
    meta.record_input("raw_data", &raw_path)?;
    meta.record_input("codebook", &codebook_path)?;
    meta.record_input("registry", &registry_path)?;

    let mut warnings = Warnings::new();
    for key in &config.ignored_keys {
        warnings.push(format!("unknown configuration key '{}' ignored", key));
    }

    let dataset = Dataset::read_csv(&raw_path)?;
    let codebook = Codebook::load(&codebook_path)?;
    let registry = Registry::load(&registry_path)?;
    let policy = MissingPolicy::with_tokens(config.missing_tokens.as_deref());
    let suppressor = Suppressor::new(config.threshold());

    warnings.extend(registry.preflight(dataset.header(), &codebook)?);

    let (derived, derivations) = derive::apply_derivations(&dataset, &codebook, &policy)?;
    for d in derivations.iter().filter(|d| d.default_cuts) {
        warnings.push(format!(
            "derivation '{}' uses default three-bin cuts {:?}; declare cuts to override",
            d.name,
            derive::DEFAULT_THREE_BIN_CUTS
        ));
    }

    let key_vars = registry.registered_variables();
    let profiles = key_vars
        .iter()
        .map(|v| profile::profile_variable(&derived, &codebook, &policy, v))
        .collect::<Result<Vec<_>>>()?;
    for p in profiles.iter().filter(|p| p.n_total > 0 && p.n_missing == p.n_total) {
        warnings.push(format!("registered variable '{}' has no observed values", p.variable));
    }
    let patterns = profile::patterns(&derived, &codebook, &policy, &key_vars)?;
    let levels = distributions::indicator_distributions(&derived, &codebook, &suppressor)?;
    let suppressed_levels = levels
        .iter()
        .filter(|l| l.status == distributions::LevelStatus::Suppressed)
        .count();
    if suppressed_levels > 0 {
        warn!(suppressed_levels, "Indicator levels below the small-cell threshold");
    }
    info!(
        key_vars = key_vars.len(),
        complete_cases = patterns.complete_cases_across_key_vars,
        derived = derivations.len(),
        "Missingness profiled"
    );

    let footer = Footer {
        command: command.to_string(),
        seed: config.seed(),
        threshold: suppressor.threshold(),
        notes: Vec::new(),
    };
    writer.stage(DERIVED_DATA_PATH, derived.to_csv_bytes()?);
    writer.stage_table(&profile::profile_table(&profiles)?, &suppressor, &footer)?;
    writer.stage_table(&profile::pattern_table(&patterns)?, &suppressor, &footer)?;
    writer.stage_table(&distributions::distribution_table(&levels)?, &suppressor, &footer)?;

    let report = report::render(&report::ReportContext {
        command,
        seed: config.seed(),
        suppressor: &suppressor,
        profiles: &profiles,
        patterns: &patterns,
        derivations: &derivations,
        warnings: &warnings,
    });
    writer.stage(REPORT_PATH, report.into_bytes());

    let outcome = MissingnessOutcome {
        n_rows: derived.n_rows(),
        key_vars,
        profiles,
        patterns,
        derivations,
        warnings,
    };
    meta.detail("conventions", outcome.conventions())?;
    meta.detail("derivations", &outcome.derivations)?;
    meta.detail("key_vars", &outcome.key_vars)?;
    Ok(outcome)
}
