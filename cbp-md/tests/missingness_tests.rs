//! End-to-end missingness runs against scratch directories

use cbp_common::{ErrorKind, RunConfig};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const CODEBOOK: &str = r#"{
  "dataset": "childhoodbalancedpublic.csv",
  "variables": [
    {"name": "I love myself", "type": "likert",
     "allowed_values": [-3, -2, -1, 0, 1, 2, 3], "missing_codes": [-9]},
    {"name": "happy", "type": "ordinal"},
    {"name": "age", "type": "numeric"}
  ],
  "derivations": [
    {"name": "love_pos", "source": "I love myself", "op": "indicator"}
  ]
}"#;

const RAW: &str = "I love myself,happy,age
3,5,30
2,4,31
-1,3,29
-9,2,40
0,4,35
1,5,22
-2,1,27
3,5,33
-9,3,45
1,4,38
2,,26
-3,2,51
";

const REGISTRY: &str = "id,family,status,targeted,outcome_var,predictors,controls,notes
H1,confirmatory,in_PAP,Y,love_pos,happy,age,
H2,exploratory,tested,N,I love myself,happy,,
H3,exploratory,dropped,N,ghost,happy,,retired
";

fn setup(dir: &Path, registry: &str) -> RunConfig {
    fs::write(dir.join("raw.csv"), RAW).unwrap();
    fs::write(dir.join("codebook.json"), CODEBOOK).unwrap();
    fs::write(dir.join("registry.csv"), registry).unwrap();
    let config = "seed: 20251016\nsmall_cell_threshold: 10\npaths:\n  raw_data: raw.csv\n  codebook: codebook.json\n  registry: registry.csv\n";
    let path = dir.join("run.yaml");
    fs::write(&path, config).unwrap();
    RunConfig::load(&path).unwrap()
}

#[test]
fn test_run_writes_derived_data_and_suppressed_tables() {
    let dir = TempDir::new().unwrap();
    let config = setup(dir.path(), REGISTRY);

    let outcome = cbp_md::run(&config, "cbp-md --config run.yaml --seed 20251016").unwrap();
    assert_eq!(outcome.n_rows, 12);
    assert_eq!(outcome.key_vars, vec!["love_pos", "happy", "age", "I love myself"]);
    assert_eq!(outcome.patterns.complete_cases_across_key_vars, 9);
    assert!(outcome.warnings.as_slice().iter().any(|w| w.contains("'ghost'")));

    let derived = fs::read_to_string(dir.path().join("data/clean/derived.csv")).unwrap();
    assert!(derived.starts_with("I love myself,happy,age,love_pos\n"));
    assert!(derived.contains("\n-9,2,40,\n"));

    let dist = fs::read_to_string(dir.path().join("tables/indicator_distributions.csv")).unwrap();
    assert!(dist.contains("love_pos,0,<10,,suppressed\n"));
    assert!(dist.contains("love_pos,1,<10,,suppressed\n"));
    assert!(dist.contains("love_pos,missing,<10,,missing\n"));
    assert!(dist.contains("# Seed: 20251016\n"));

    let profile = fs::read_to_string(dir.path().join("tables/missingness_profile.csv")).unwrap();
    let happy = profile.lines().find(|l| l.starts_with("happy,")).unwrap();
    assert!(happy.starts_with("happy,12,<10,,"));

    let patterns = fs::read_to_string(dir.path().join("tables/missingness_patterns.md")).unwrap();
    assert!(patterns.contains("| complete_cases_across_key_vars |  | <10 |  |"));
    assert!(patterns.contains("Regenerate: cbp-md --config run.yaml --seed 20251016"));

    let report = fs::read_to_string(dir.path().join("qc/missingness_report.md")).unwrap();
    assert!(report.contains("| I love myself | negative_code |"));
    assert!(report.contains("referenced only by dropped hypotheses"));

    let meta: serde_json::Value =
        serde_json::from_slice(&fs::read(dir.path().join("artifacts/cbp-md_run.json")).unwrap()).unwrap();
    assert_eq!(meta["details"]["conventions"]["I love myself"], "negative_code");
    assert_eq!(meta["details"]["conventions"]["love_pos"], "none");
}

#[test]
fn test_derived_data_is_byte_identical_across_runs() {
    let dir = TempDir::new().unwrap();
    let config = setup(dir.path(), REGISTRY);
    cbp_md::run(&config, "cbp-md").unwrap();
    let first = fs::read(dir.path().join("data/clean/derived.csv")).unwrap();
    cbp_md::run(&config, "cbp-md").unwrap();
    let second = fs::read(dir.path().join("data/clean/derived.csv")).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_unknown_registered_variable_is_input_missing() {
    let dir = TempDir::new().unwrap();
    let registry = format!("{}H4,exploratory,draft,N,bmi,happy,,\n", REGISTRY);
    let config = setup(dir.path(), &registry);
    let err = cbp_md::run(&config, "cbp-md").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InputMissing);
    assert!(err.to_string().contains("'bmi'"));
    assert!(!dir.path().join("tables/missingness_profile.csv").exists());
}

#[test]
fn test_mixed_conventions_are_a_schema_conflict() {
    let dir = TempDir::new().unwrap();
    let config = setup(dir.path(), REGISTRY);
    let codebook = CODEBOOK.replace(
        r#"{"name": "happy", "type": "ordinal"}"#,
        r#"{"name": "happy", "type": "ordinal", "coded_likert": true}"#,
    );
    fs::write(dir.path().join("codebook.json"), codebook).unwrap();
    fs::write(dir.path().join("raw.csv"), RAW.replace("5,30", "-8,30").replace("2,,26", "2,NA,26")).unwrap();
    let err = cbp_md::run(&config, "cbp-md").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SchemaConflict);
    assert!(err.to_string().contains("'happy'"));
}

#[test]
fn test_default_three_bin_cuts_are_reported() {
    let dir = TempDir::new().unwrap();
    let config = setup(dir.path(), REGISTRY);
    let codebook = CODEBOOK.replace(
        r#"{"name": "love_pos", "source": "I love myself", "op": "indicator"}"#,
        r#"{"name": "love_pos", "source": "I love myself", "op": "indicator"},
    {"name": "love_bin", "source": "I love myself", "op": "three_bin"}"#,
    );
    fs::write(dir.path().join("codebook.json"), codebook).unwrap();

    let outcome = cbp_md::run(&config, "cbp-md").unwrap();
    assert!(outcome
        .warnings
        .as_slice()
        .iter()
        .any(|w| w.contains("'love_bin' uses default three-bin cuts [-2.0, 0.0]")));
    let bin = outcome.derivations.iter().find(|d| d.name == "love_bin").unwrap();
    assert!(bin.default_cuts);

    let report = fs::read_to_string(dir.path().join("qc/missingness_report.md")).unwrap();
    assert!(report.contains("(default cuts, none declared)"));
    assert!(report.contains("uses default three-bin cuts"));
}
