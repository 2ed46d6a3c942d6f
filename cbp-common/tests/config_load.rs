//! Configuration loading from disk (YAML and TOML) and command-line overrides

use cbp_common::cli::CommonArgs;
use cbp_common::config::{ImputationBackend, RngBackend};
use cbp_common::{ErrorKind, RunConfig};
use clap::Parser;
use serial_test::serial;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

#[derive(Parser, Debug)]
struct Args {
    #[command(flatten)]
    common: CommonArgs,
}

const YAML: &str = r#"
seed: 20251016
small_cell_threshold: 10
fdr_q: 0.05
paths:
  raw_data: data/raw/childhoodbalancedpublic.csv
  codebook: config/codebook.json
  registry: analysis/hypothesis_registry.csv
imputation:
  m: 3
  backend: hot_deck
sensitivity:
  deff: [1.5, 2.0]
  jackknife_k: 5
plotting:
  dpi: 300
"#;

const TOML: &str = r#"
seed = 42
small_cell_threshold = 5
rng_backend = "os_entropy"

[paths]
raw_data = "/abs/raw.csv"
codebook = "codebook.json"
"#;

#[test]
fn test_yaml_config_resolves_paths_relative_to_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("run.yaml");
    fs::write(&path, YAML).unwrap();

    let config = RunConfig::load(&path).unwrap();
    assert_eq!(config.seed(), 20251016);
    assert_eq!(config.imputation.m, 3);
    assert_eq!(config.imputation.backend, ImputationBackend::HotDeck);
    assert_eq!(config.sensitivity.deff, vec![1.5, 2.0]);
    assert_eq!(config.ignored_keys, vec!["plotting".to_string()]);
    assert_eq!(
        config.path("raw_data").unwrap(),
        dir.path().join("data/raw/childhoodbalancedpublic.csv")
    );
    assert_eq!(config.output_root(), dir.path().join("."));
}

#[test]
fn test_toml_config_and_absolute_paths() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("run.toml");
    fs::write(&path, TOML).unwrap();

    let config = RunConfig::load(&path).unwrap();
    assert_eq!(config.seed(), 42);
    assert_eq!(config.threshold(), 5);
    assert_eq!(config.rng_backend, RngBackend::OsEntropy);
    assert_eq!(config.path("raw_data").unwrap(), PathBuf::from("/abs/raw.csv"));
}

#[test]
fn test_missing_config_file_is_input_missing() {
    let dir = TempDir::new().unwrap();
    let err = RunConfig::load(&dir.path().join("absent.yaml")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InputMissing);
}

#[test]
fn test_unsupported_extension_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("run.ini");
    fs::write(&path, "seed=1").unwrap();
    assert_eq!(RunConfig::load(&path).unwrap_err().kind(), ErrorKind::Config);
}

#[test]
#[serial]
fn test_cli_overrides_seed_and_output_root() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("run.yaml");
    fs::write(&path, YAML).unwrap();

    std::env::set_var("CBP_CONFIG", &path);
    let args = Args::parse_from(["cbp-dv", "--seed", "7", "--output-root", "/tmp/out"]);
    std::env::remove_var("CBP_CONFIG");

    let config = args.common.load_config().unwrap();
    assert_eq!(config.seed(), 7);
    assert_eq!(config.output_root(), PathBuf::from("/tmp/out"));
}

#[test]
fn test_nested_typos_are_listed_as_ignored() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("run.yaml");
    let yaml = YAML.replace("  backend: hot_deck\n", "  backend: hot_deck\n  burnin: 2\n");
    fs::write(&path, yaml).unwrap();

    let config = RunConfig::load(&path).unwrap();
    assert_eq!(config.imputation.burn_in, 10);
    assert_eq!(
        config.ignored_keys,
        vec!["plotting".to_string(), "imputation.burnin".to_string()]
    );
}

#[test]
fn test_unit_pseudo_weight_deff_fails_at_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("run.toml");
    fs::write(&path, format!("{}\n[sensitivity]\npseudo_weight_deff = 1.0\n", TOML)).unwrap();

    let err = RunConfig::load(&path).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
    assert!(err.to_string().contains("pseudo_weight_deff must be > 1"));
}
