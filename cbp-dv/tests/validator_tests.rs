//! End-to-end validator runs against scratch directories

use cbp_common::design::{Design, DesignManifest};
use cbp_common::{ErrorKind, RunConfig};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const CODEBOOK: &str = r#"{
  "dataset": "childhoodbalancedpublic.csv",
  "generated_at": "2025-10-16T00:00:00Z",
  "row_count": 0,
  "column_count": 0,
  "seed": 20251016,
  "variables": [
    {"name": "I love myself", "label": "I love myself", "analysis_role": "outcome",
     "type": "likert", "allowed_values": [-3, -2, -1, 0, 1, 2, 3], "missing_codes": [-9],
     "notes": "Empirical alignment 2025-01-01T00:00:00Z"},
    {"name": "your weight (kg)", "label": "What is your weight?", "type": "numeric"},
    {"name": "legacy", "type": "numeric"}
  ],
  "regeneration": {"command": "initial", "timestamp": "2025-10-16T00:00:00Z"},
  "notes": ""
}"#;

fn write_config(dir: &Path, extra: &str) -> RunConfig {
    let config = format!(
        "seed: 20251016\npaths:\n  raw_data: raw.csv\n  codebook: codebook.json\n{}",
        extra
    );
    let path = dir.join("run.yaml");
    fs::write(&path, config).unwrap();
    RunConfig::load(&path).unwrap()
}

#[test]
fn test_srs_run_writes_manifest_report_and_codebook() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("raw.csv"),
        "I love myself,your weight (kg),extra\n3,70,a\n-3,81,b\n-9,,c\n0,64,d\n",
    )
    .unwrap();
    fs::write(dir.path().join("codebook.json"), CODEBOOK).unwrap();
    let config = write_config(dir.path(), "");

    let outcome = cbp_dv::run(&config, "cbp-dv --config run.yaml --seed 20251016").unwrap();
    assert_eq!(outcome.manifest.design, Design::Srs);
    assert_eq!(
        outcome.manifest.justification.as_deref(),
        Some("No weights/strata/clusters detected")
    );
    assert_eq!(outcome.aligned_entries, 2);

    let manifest = DesignManifest::load(&dir.path().join("artifacts/design_manifest.json")).unwrap();
    assert_eq!(manifest, outcome.manifest);

    let report = fs::read_to_string(dir.path().join("qc/validation_report.md")).unwrap();
    assert!(report.contains("Seed: 20251016"));
    assert!(report.contains("4 rows x 3 columns"));
    assert!(report.contains("`legacy`"));
    assert!(report.contains("your weight (kg)"));

    let aligned: serde_json::Value = serde_json::from_slice(
        &fs::read(dir.path().join("artifacts/codebook_aligned.json")).unwrap(),
    )
    .unwrap();
    let love = &aligned["variables"][0];
    assert!(love["summary_stats"]["min"].as_f64().unwrap() >= -3.0);
    assert!(love["summary_stats"]["max"].as_f64().unwrap() <= 3.0);
    assert!(!love["notes"].as_str().unwrap().contains("2025-01-01"));
    assert_eq!(aligned["regeneration_history"][0]["command"], "initial");

    let meta: serde_json::Value =
        serde_json::from_slice(&fs::read(dir.path().join("artifacts/cbp-dv_run.json")).unwrap()).unwrap();
    assert_eq!(meta["seed"], 20251016);
    assert_eq!(meta["inputs"]["raw_data"]["sha256"].as_str().unwrap().len(), 64);
}

#[test]
fn test_out_of_range_likert_is_schema_conflict_with_partial_report() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("raw.csv"), "I love myself\n3\n5\n").unwrap();
    fs::write(dir.path().join("codebook.json"), CODEBOOK).unwrap();
    let config = write_config(dir.path(), "");

    let err = cbp_dv::run(&config, "cbp-dv").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SchemaConflict);
    assert!(err.to_string().contains("'I love myself' row 2"));
    assert!(!dir.path().join("qc/validation_report.md").exists());
    let partial = fs::read_to_string(dir.path().join("qc/validation_report.md.partial")).unwrap();
    assert!(partial.contains("Schema conflicts"));
}

#[test]
fn test_weighted_design_from_columns() {
    let dir = TempDir::new().unwrap();
    let mut header = vec!["weight".to_string(), "stratum_id".to_string(), "psu_id".to_string()];
    header.extend((1..=80).map(|i| format!("rw{:02}", i)));
    let row = vec!["1"; header.len()].join(",");
    fs::write(dir.path().join("raw.csv"), format!("{}\n{}\n", header.join(","), row)).unwrap();
    fs::write(dir.path().join("codebook.json"), CODEBOOK).unwrap();
    let config = write_config(dir.path(), "");

    let outcome = cbp_dv::run(&config, "cbp-dv").unwrap();
    let m = outcome.manifest;
    assert_eq!(m.design, Design::Weighted);
    assert_eq!(m.weight_var.as_deref(), Some("weight"));
    assert_eq!(m.strata_var.as_deref(), Some("stratum_id"));
    assert_eq!(m.cluster_var.as_deref(), Some("psu_id"));
    assert_eq!(m.replicate_weights.len(), 80);
}

#[test]
fn test_registry_preflight_names_unknown_variable() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("raw.csv"), "I love myself\n3\n").unwrap();
    fs::write(dir.path().join("codebook.json"), CODEBOOK).unwrap();
    fs::write(
        dir.path().join("registry.csv"),
        "id,family,status,targeted,outcome_var,predictors,controls,notes\n\
         H1,confirmatory,in_PAP,Y,I love myself,ghost_var,,\n",
    )
    .unwrap();
    let config = write_config(dir.path(), "  registry: registry.csv\n");

    let err = cbp_dv::run(&config, "cbp-dv").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InputMissing);
    assert!(err.to_string().contains("'ghost_var'"));
}
