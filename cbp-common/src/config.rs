//! Run configuration loading and validation
//!
//! **Resolution order for the seed:**
//! 1. `--seed` command-line argument (highest priority)
//! 2. `seed` key in the configuration file
//!
//! The file may be YAML (`.yaml`/`.yml`) or TOML (`.toml`). It is parsed to a
//! generic value first so unknown keys can be reported and ignored before the
//! typed deserialization runs. The resulting [`RunConfig`] is created once per
//! run and handed by value (clone) to every stage.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Default disclosure threshold
pub const DEFAULT_SMALL_CELL_THRESHOLD: u64 = 10;
/// Default FDR level
pub const DEFAULT_FDR_Q: f64 = 0.05;
/// Default listwise analytic-n floor for model routines
pub const DEFAULT_MIN_ANALYTIC_N: usize = 30;

const KNOWN_TOP_LEVEL_KEYS: &[&str] = &[
    "seed",
    "small_cell_threshold",
    "fdr_q",
    "paths",
    "missing_tokens",
    "min_analytic_n",
    "rng_backend",
    "imputation",
    "sensitivity",
    "logging",
];

const KNOWN_PATH_ROLES: &[&str] = &[
    "raw_data",
    "codebook",
    "registry",
    "design",
    "output_root",
];

/// Recognised keys of each nested section
const KNOWN_SECTION_KEYS: &[(&str, &[&str])] = &[
    ("imputation", &["m", "burn_in", "backend", "columns"]),
    (
        "sensitivity",
        &["deff", "jackknife_k", "pseudo_weight_deff", "pseudo_weight_draws"],
    ),
    ("logging", &["level"]),
];

/// Random back-end requested by the configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RngBackend {
    /// `rand::rngs::StdRng`, seedable
    #[default]
    StdRng,
    /// Operating-system entropy; cannot be seeded
    OsEntropy,
}

/// Imputation back-end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ImputationBackend {
    /// Chained equations with predictive mean matching
    #[default]
    Chained,
    /// Deterministic hot-deck from the same column's observed values
    HotDeck,
}

impl ImputationBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            ImputationBackend::Chained => "chained",
            ImputationBackend::HotDeck => "hot_deck",
        }
    }
}

/// Imputation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImputationConfig {
    /// Number of completed tables (m ≥ 1)
    pub m: usize,
    /// Burn-in passes before each completion (b ≥ 0)
    pub burn_in: usize,
    pub backend: ImputationBackend,
    /// Explicit column subset; defaults to the codebook-curated set
    pub columns: Option<Vec<String>>,
}

impl Default for ImputationConfig {
    fn default() -> Self {
        Self {
            m: 5,
            burn_in: 10,
            backend: ImputationBackend::Chained,
            columns: None,
        }
    }
}

/// Sensitivity scenarios re-run through the controller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensitivityConfig {
    /// Design-effect inflation factors (each one a scenario)
    pub deff: Vec<f64>,
    /// Number of jackknife pseudo-replicate groups
    pub jackknife_k: Option<usize>,
    /// DEFF targeted by log-normal pseudo-weights
    pub pseudo_weight_deff: Option<f64>,
    /// Number of pseudo-weight draws
    pub pseudo_weight_draws: usize,
}

impl Default for SensitivityConfig {
    fn default() -> Self {
        Self {
            deff: Vec::new(),
            jackknife_k: None,
            pseudo_weight_deff: None,
            pseudo_weight_draws: 20,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// On-disk shape of the configuration file
#[derive(Debug, Clone, Deserialize)]
struct RawConfig {
    seed: Option<i64>,
    small_cell_threshold: Option<i64>,
    fdr_q: Option<f64>,
    #[serde(default)]
    paths: BTreeMap<String, PathBuf>,
    missing_tokens: Option<Vec<String>>,
    min_analytic_n: Option<usize>,
    #[serde(default)]
    rng_backend: RngBackend,
    #[serde(default)]
    imputation: ImputationConfig,
    #[serde(default)]
    sensitivity: SensitivityConfig,
    #[serde(default)]
    logging: LoggingConfig,
}

/// Immutable run configuration
#[derive(Debug, Clone, Serialize)]
pub struct RunConfig {
    seed: u64,
    small_cell_threshold: u64,
    fdr_q: f64,
    paths: BTreeMap<String, PathBuf>,
    /// Command-line path overrides (relative to the working directory)
    overrides: BTreeMap<String, PathBuf>,
    pub missing_tokens: Option<Vec<String>>,
    pub min_analytic_n: usize,
    pub rng_backend: RngBackend,
    pub imputation: ImputationConfig,
    pub sensitivity: SensitivityConfig,
    pub logging: LoggingConfig,
    /// Unknown keys seen while loading (already logged as warnings)
    pub ignored_keys: Vec<String>,
    /// Path the configuration was loaded from
    pub source: Option<PathBuf>,
}

impl RunConfig {
    /// Load configuration from a YAML or TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::InputMissing(format!("configuration file {}: {}", path.display(), e))
        })?;

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        let value: Value = match ext.as_str() {
            "toml" => toml::from_str(&content)?,
            "yaml" | "yml" | "" => serde_yaml::from_str(&content)?,
            other => {
                return Err(Error::Config(format!(
                    "Unsupported configuration format '.{}' (expected .yaml, .yml or .toml)",
                    other
                )))
            }
        };

        let mut config = Self::from_value(value)?;
        config.source = Some(path.to_path_buf());
        info!(
            path = %path.display(),
            seed = config.seed,
            threshold = config.small_cell_threshold,
            fdr_q = config.fdr_q,
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Build configuration from an already parsed document
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(map) = &value else {
            return Err(Error::Config(
                "Configuration root must be a mapping".to_string(),
            ));
        };

        let mut ignored_keys = Vec::new();
        for key in map.keys() {
            if !KNOWN_TOP_LEVEL_KEYS.contains(&key.as_str()) {
                warn!(key = %key, "Unknown configuration key ignored");
                ignored_keys.push(key.clone());
            }
        }
        for (section, known) in KNOWN_SECTION_KEYS {
            if let Some(Value::Object(entries)) = map.get(*section) {
                for key in entries.keys() {
                    if !known.contains(&key.as_str()) {
                        let dotted = format!("{}.{}", section, key);
                        warn!(key = %dotted, "Unknown configuration key ignored");
                        ignored_keys.push(dotted);
                    }
                }
            }
        }
        if let Some(Value::Object(paths)) = map.get("paths") {
            for role in paths.keys() {
                if !KNOWN_PATH_ROLES.contains(&role.as_str()) {
                    // Extra path roles stay addressable through path(); only flag them
                    warn!(role = %role, "Unrecognised path role (kept)");
                }
            }
        }

        let raw: RawConfig = serde_json::from_value(value)
            .map_err(|e| Error::Config(format!("Invalid configuration: {}", e)))?;

        let seed = match raw.seed {
            Some(s) if s >= 0 => s as u64,
            Some(s) => return Err(Error::Config(format!("seed must be >= 0, got {}", s))),
            None => return Err(Error::Config("Missing required key: seed".to_string())),
        };

        let small_cell_threshold = match raw.small_cell_threshold {
            Some(t) if t >= 1 => t as u64,
            Some(t) => {
                return Err(Error::Config(format!(
                    "small_cell_threshold must be a positive integer, got {}",
                    t
                )))
            }
            None => DEFAULT_SMALL_CELL_THRESHOLD,
        };

        let fdr_q = raw.fdr_q.unwrap_or(DEFAULT_FDR_Q);
        if !(fdr_q > 0.0 && fdr_q <= 1.0) {
            return Err(Error::Config(format!("fdr_q must lie in (0, 1], got {}", fdr_q)));
        }

        for required in ["raw_data", "codebook"] {
            if !raw.paths.contains_key(required) {
                return Err(Error::Config(format!(
                    "Missing required key: paths.{}",
                    required
                )));
            }
        }

        if raw.imputation.m < 1 {
            return Err(Error::Config("imputation.m must be >= 1".to_string()));
        }
        if raw.sensitivity.deff.iter().any(|d| !(*d >= 1.0)) {
            return Err(Error::Config(
                "sensitivity.deff values must be >= 1".to_string(),
            ));
        }
        if let Some(k) = raw.sensitivity.jackknife_k {
            if k < 2 {
                return Err(Error::Config("sensitivity.jackknife_k must be >= 2".to_string()));
            }
        }
        if let Some(d) = raw.sensitivity.pseudo_weight_deff {
            // deff = 1 means log-normal weights with zero variance
            if !(d.is_finite() && d > 1.0) {
                return Err(Error::Config(format!(
                    "sensitivity.pseudo_weight_deff must be > 1, got {}",
                    d
                )));
            }
        }

        Ok(Self {
            seed,
            small_cell_threshold,
            fdr_q,
            paths: raw.paths,
            overrides: BTreeMap::new(),
            missing_tokens: raw.missing_tokens,
            min_analytic_n: raw.min_analytic_n.unwrap_or(DEFAULT_MIN_ANALYTIC_N),
            rng_backend: raw.rng_backend,
            imputation: raw.imputation,
            sensitivity: raw.sensitivity,
            logging: raw.logging,
            ignored_keys,
            source: None,
        })
    }

    /// Apply a command-line seed override
    pub fn with_seed_override(mut self, seed: Option<u64>) -> Self {
        if let Some(seed) = seed {
            if seed != self.seed {
                info!(config_seed = self.seed, cli_seed = seed, "Seed overridden from command line");
            }
            self.seed = seed;
        }
        self
    }

    /// Apply a command-line path override for a role
    pub fn with_path_override(mut self, role: &str, path: Option<PathBuf>) -> Self {
        if let Some(path) = path {
            info!(role, path = %path.display(), "Path overridden from command line");
            self.overrides.insert(role.to_string(), path);
        }
        self
    }

    /// Effective seed for this run
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Small-cell disclosure threshold T
    pub fn threshold(&self) -> u64 {
        self.small_cell_threshold
    }

    /// FDR level used by the BH step
    pub fn fdr_q(&self) -> f64 {
        self.fdr_q
    }

    /// Path configured for a role, resolved relative to the configuration file
    pub fn path(&self, role: &str) -> Result<PathBuf> {
        if let Some(path) = self.overrides.get(role) {
            return Ok(path.clone());
        }
        let path = self
            .paths
            .get(role)
            .ok_or_else(|| Error::InputMissing(format!("paths.{} is not configured", role)))?;
        Ok(self.resolve(path))
    }

    /// Optional path role
    pub fn optional_path(&self, role: &str) -> Option<PathBuf> {
        if let Some(path) = self.overrides.get(role) {
            return Some(path.clone());
        }
        self.paths.get(role).map(|p| self.resolve(p))
    }

    /// Root under which `analysis/`, `tables/`, `qc/`, `artifacts/`, `data/` live
    pub fn output_root(&self) -> PathBuf {
        self.optional_path("output_root")
            .unwrap_or_else(|| self.resolve(Path::new(".")))
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            return path.to_path_buf();
        }
        match self.source.as_ref().and_then(|s| s.parent()) {
            Some(dir) if !dir.as_os_str().is_empty() => dir.join(path),
            _ => path.to_path_buf(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal() -> Value {
        json!({
            "seed": 20251016,
            "paths": { "raw_data": "data/raw/survey.csv", "codebook": "config/codebook.json" }
        })
    }

    #[test]
    fn test_defaults_applied() {
        let config = RunConfig::from_value(minimal()).unwrap();
        assert_eq!(config.seed(), 20251016);
        assert_eq!(config.threshold(), 10);
        assert_eq!(config.fdr_q(), 0.05);
        assert_eq!(config.min_analytic_n, 30);
        assert_eq!(config.imputation.m, 5);
        assert_eq!(config.rng_backend, RngBackend::StdRng);
        assert!(config.ignored_keys.is_empty());
    }

    #[test]
    fn test_missing_seed_is_fatal() {
        let value = json!({ "paths": { "raw_data": "a.csv", "codebook": "c.json" } });
        let err = RunConfig::from_value(value).unwrap_err();
        assert!(err.to_string().contains("seed"));
    }

    #[test]
    fn test_missing_required_path_is_fatal() {
        let value = json!({ "seed": 1, "paths": { "raw_data": "a.csv" } });
        let err = RunConfig::from_value(value).unwrap_err();
        assert!(err.to_string().contains("paths.codebook"));
    }

    #[test]
    fn test_unknown_key_warns_and_is_ignored() {
        let mut value = minimal();
        value["colour"] = json!("blue");
        let config = RunConfig::from_value(value).unwrap();
        assert_eq!(config.ignored_keys, vec!["colour".to_string()]);
    }

    #[test]
    fn test_unknown_nested_keys_are_reported_with_dotted_paths() {
        let mut value = minimal();
        value["imputation"] = json!({ "m": 3, "burnin": 4 });
        value["sensitivity"] = json!({ "deff": [1.5], "jacknife_k": 5 });
        value["logging"] = json!({ "level": "debug", "format": "json" });
        let config = RunConfig::from_value(value).unwrap();
        assert_eq!(config.imputation.m, 3);
        assert_eq!(config.imputation.burn_in, 10);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(
            config.ignored_keys,
            vec![
                "imputation.burnin".to_string(),
                "sensitivity.jacknife_k".to_string(),
                "logging.format".to_string(),
            ]
        );
    }

    #[test]
    fn test_pseudo_weight_deff_must_exceed_one() {
        let mut value = minimal();
        value["sensitivity"] = json!({ "pseudo_weight_deff": 1.0 });
        let err = RunConfig::from_value(value).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Config);
        assert!(err.to_string().contains("sensitivity.pseudo_weight_deff"));

        let mut value = minimal();
        value["sensitivity"] = json!({ "pseudo_weight_deff": 1.2 });
        let config = RunConfig::from_value(value).unwrap();
        assert_eq!(config.sensitivity.pseudo_weight_deff, Some(1.2));
    }

    #[test]
    fn test_non_positive_threshold_is_fatal() {
        let mut value = minimal();
        value["small_cell_threshold"] = json!(0);
        assert!(RunConfig::from_value(value).is_err());
    }

    #[test]
    fn test_fdr_q_out_of_range_is_fatal() {
        for q in [0.0, -0.1, 1.5] {
            let mut value = minimal();
            value["fdr_q"] = json!(q);
            assert!(RunConfig::from_value(value).is_err(), "q={} accepted", q);
        }
        let mut value = minimal();
        value["fdr_q"] = json!(1.0);
        assert!(RunConfig::from_value(value).is_ok());
    }

    #[test]
    fn test_seed_override() {
        let config = RunConfig::from_value(minimal())
            .unwrap()
            .with_seed_override(Some(7));
        assert_eq!(config.seed(), 7);
    }

    #[test]
    fn test_unconfigured_role_is_input_missing() {
        let config = RunConfig::from_value(minimal()).unwrap();
        let err = config.path("registry").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InputMissing);
    }
}
