//! # cbp-mi: Multiple-Imputation Engine
//!
//! Third analysis stage. Reads the derived dataset written by cbp-md and
//! produces `m` completed tables, stacked long.
//!
//! **Pipeline:**
//! 1. select columns (configured list, else codebook-curated columns plus
//!    variables of hypotheses that delegate to the imputation stack)
//! 2. drop columns with zero observed values
//! 3. sanitize names ([`sanitize`])
//! 4. draw `m` completions with sub-seeds `seed + k` ([`engine`])
//! 5. write the stack, its manifest, diagnostics and the complete-case review
//!
//! **Artifacts:**
//! - `data/derived/imputation_stack.csv` (deterministic)
//! - `artifacts/imputation_manifest.json` (deterministic)
//! - `tables/imputation_diagnostics.{csv,md}`
//! - `tables/imputation_review.{csv,md}`
//! - `qc/imputation_report.md`
//! - `artifacts/cbp-mi_run.json`

pub mod chained;
pub mod diagnostics;
pub mod engine;
pub mod frame;
pub mod hot_deck;
pub mod report;
pub mod sanitize;
pub mod stack;

use cbp_common::artifacts::{sha256_file, sha256_hex, write_atomic, ArtifactWriter, RunMetadata};
use cbp_common::codebook::Codebook;
use cbp_common::dataset::Dataset;
use cbp_common::logging::Warnings;
use cbp_common::missing::MissingPolicy;
use cbp_common::registry::Registry;
use cbp_common::suppression::{Footer, Suppressor};
use cbp_common::{Error, Result, RunConfig, SeedService};
use std::path::PathBuf;
use tracing::{info, warn};

pub use stack::ImputationManifest;

pub const COMPONENT: &str = "cbp-mi";

pub const REPORT_PATH: &str = "qc/imputation_report.md";

/// Derived dataset written by cbp-md, relative to the output root
pub const DERIVED_INPUT_PATH: &str = "data/clean/derived.csv";

#[derive(Debug, Clone)]
pub struct ImputationOutcome {
    pub manifest: ImputationManifest,
    pub diagnostics: Vec<diagnostics::ColumnDiagnostics>,
    pub review: Vec<diagnostics::ReviewRow>,
    pub warnings: Warnings,
}

/// Input dataset: the `derived_data` path role if set, else cbp-md's output
pub fn input_path(config: &RunConfig) -> PathBuf {
    config
        .optional_path("derived_data")
        .unwrap_or_else(|| config.output_root().join(DERIVED_INPUT_PATH))
}

/// Columns to impute, in dataset order for the curated part
pub fn select_columns(
    config: &RunConfig,
    dataset: &Dataset,
    codebook: &Codebook,
    registry: Option<&Registry>,
) -> Vec<String> {
    if let Some(columns) = &config.imputation.columns {
        return columns.clone();
    }
    let mut selected = codebook.curated_columns(dataset.header());
    if let Some(registry) = registry {
        for record in registry
            .records()
            .iter()
            .filter(|r| r.use_imputation && r.status.is_registered())
        {
            for var in record.variables() {
                if !selected.contains(&var) {
                    selected.push(var);
                }
            }
        }
    }
    selected
}

/// Run the imputation stage
pub fn run(config: &RunConfig, command: &str) -> Result<ImputationOutcome> {
    let seeds = SeedService::new(config.seed(), config.rng_backend);
    let mut writer = ArtifactWriter::new(&config.output_root(), COMPONENT);
    let mut meta = RunMetadata::new(COMPONENT, seeds.seed(), command);

    let outcome = impute(config, command, &seeds, &mut writer, &mut meta);
    let outcome = writer.finish(outcome)?;

    meta.warnings = outcome.warnings.as_slice().to_vec();
    let outputs = writer_outputs(&writer);
    meta.finish(&outputs);
    write_atomic(&writer.resolve(meta.relative_path()), &meta.to_json_bytes()?)?;
    Ok(outcome)
}

fn writer_outputs(writer: &ArtifactWriter) -> Vec<PathBuf> {
    let mut outputs = vec![
        writer.resolve(stack::STACK_PATH),
        writer.resolve(stack::MANIFEST_PATH),
        writer.resolve(REPORT_PATH),
    ];
    for table in ["imputation_diagnostics", "imputation_review"] {
        outputs.push(writer.resolve(format!("tables/{}.csv", table)));
        outputs.push(writer.resolve(format!("tables/{}.md", table)));
    }
    outputs
}

fn impute(
    config: &RunConfig,
    command: &str,
    seeds: &SeedService,
    writer: &mut ArtifactWriter,
    meta: &mut RunMetadata,
) -> Result<ImputationOutcome> {
    // Fail before any work when the back-end cannot be seeded
    seeds.ensure_deterministic()?;

    let input = input_path(config);
    let codebook_path = config.path("codebook")?;
    meta.record_input("derived_data", &input)?;
    meta.record_input("codebook", &codebook_path)?;

    let mut warnings = Warnings::new();
    for key in &config.ignored_keys {
        warnings.push(format!("unknown configuration key '{}' ignored", key));
    }

    let dataset = Dataset::read_csv(&input)?;
    let codebook = Codebook::load(&codebook_path)?;
    let registry = match config.optional_path("registry") {
        Some(path) => {
            meta.record_input("registry", &path)?;
            Some(Registry::load(&path)?)
        }
        None => None,
    };
    let policy = MissingPolicy::with_tokens(config.missing_tokens.as_deref());

    let selected = select_columns(config, &dataset, &codebook, registry.as_ref());
    if selected.is_empty() {
        return Err(Error::InvalidInput(
            "no columns selected for imputation (set imputation.columns or curate codebook roles)".to_string(),
        ));
    }
    let mut frame = frame::Frame::build(&dataset, &codebook, &policy, &selected)?;
    let dropped = frame.drop_unobserved();
    for name in &dropped {
        warnings.push(format!("column '{}' has no observed values and was dropped before imputation", name));
    }
    if frame.columns.is_empty() {
        return Err(Error::NumericallyDegenerate(
            "every selected column is entirely missing".to_string(),
        ));
    }

    let mapping = stack::column_mapping(&frame);
    for m in mapping.iter().filter(|m| m.original != m.sanitized) {
        info!(original = %m.original, sanitized = %m.sanitized, "Column renamed for the stack");
    }

    let imputer = engine::imputer_for(&config.imputation);
    let m = config.imputation.m;
    let completions = engine::draw_completions(&frame, imputer.as_ref(), seeds, m)?;
    let stack_bytes = stack::stack_bytes(&frame, &completions, &mapping)?;

    let sanitized: Vec<String> = mapping.iter().map(|m| m.sanitized.clone()).collect();
    let diag = diagnostics::diagnostics(&frame, &completions, &sanitized, &dropped);
    let review = diagnostics::review(&frame, &diag);
    for r in review.iter().filter(|r| r.flagged == Some(true)) {
        warn!(variable = %r.variable, delta_mean = ?r.delta_mean, "Imputed mean shifted more than 15%");
    }

    let manifest = ImputationManifest {
        backend: imputer.backend(),
        m,
        burn_in: config.imputation.burn_in,
        seed: seeds.seed(),
        sub_seeds: (1..=m as u64).map(|k| seeds.sub_seed(k)).collect(),
        n_rows: frame.n_rows,
        columns: frame
            .columns
            .iter()
            .zip(&mapping)
            .map(|(c, map)| stack::StackColumn {
                original: c.name.clone(),
                sanitized: map.sanitized.clone(),
                kind: c.kind,
                n_missing: c.n_missing(),
            })
            .collect(),
        dropped_columns: dropped,
        stack_path: stack::STACK_PATH.to_string(),
        stack_sha256: sha256_hex(&stack_bytes),
        input_sha256: sha256_file(&input)?,
    };

    let suppressor = Suppressor::new(config.threshold());
    let footer = Footer {
        command: command.to_string(),
        seed: seeds.seed(),
        threshold: suppressor.threshold(),
        notes: vec![format!(
            "Back-end {} with m = {}; draw k uses seed + k.",
            manifest.backend.as_str(),
            m
        )],
    };
    writer.stage(stack::STACK_PATH, stack_bytes);
    writer.stage(stack::MANIFEST_PATH, manifest.to_json_bytes()?);
    writer.stage_table(&diagnostics::diagnostics_table(&diag)?, &suppressor, &footer)?;
    writer.stage_table(&diagnostics::review_table(&review)?, &suppressor, &footer)?;
    writer.stage(
        REPORT_PATH,
        report::render(command, &manifest, &review, &warnings).into_bytes(),
    );

    meta.detail("backend", manifest.backend)?;
    meta.detail("column_map", &mapping)?;
    meta.detail("dropped_columns", &manifest.dropped_columns)?;
    meta.detail("sub_seeds", &manifest.sub_seeds)?;
    info!(
        columns = manifest.columns.len(),
        dropped = manifest.dropped_columns.len(),
        m,
        "Imputation stack built"
    );

    Ok(ImputationOutcome {
        manifest,
        diagnostics: diag,
        review,
        warnings,
    })
}
