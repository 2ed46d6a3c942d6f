//! Codebook model
//!
//! The codebook is a JSON document keyed by variable `name`. It is treated as
//! an append-only log: alignment produces a *new* document whose previous
//! `regeneration` block is pushed onto `regeneration_history`; the input file
//! is never edited in place.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// Role a variable plays in the registered analyses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisRole {
    Predictor,
    Outcome,
    Control,
    Auxiliary,
    #[default]
    #[serde(other)]
    Unspecified,
}

/// Measurement type of a variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VariableType {
    Binary,
    Ordinal,
    Likert,
    Numeric,
    Categorical,
    #[default]
    #[serde(other)]
    Unknown,
}

impl VariableType {
    pub fn is_numeric_scale(self) -> bool {
        matches!(
            self,
            VariableType::Binary | VariableType::Ordinal | VariableType::Likert | VariableType::Numeric
        )
    }
}

impl fmt::Display for VariableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VariableType::Binary => "binary",
            VariableType::Ordinal => "ordinal",
            VariableType::Likert => "likert",
            VariableType::Numeric => "numeric",
            VariableType::Categorical => "categorical",
            VariableType::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Allowed value or missing code (numbers and strings both occur)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CodeValue {
    Number(f64),
    Text(String),
}

impl CodeValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            CodeValue::Number(n) => Some(*n),
            CodeValue::Text(t) => crate::dataset::parse_number(t),
        }
    }
}

/// Observed summary statistics attached during alignment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SummaryStats {
    pub count: u64,
    pub mean: Option<f64>,
    pub std: Option<f64>,
    pub min: Option<f64>,
    pub q25: Option<f64>,
    pub q50: Option<f64>,
    pub q75: Option<f64>,
    pub max: Option<f64>,
    pub n_missing: u64,
    pub n_unique: u64,
}

/// One codebook entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodebookEntry {
    pub name: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub analysis_role: AnalysisRole,
    #[serde(rename = "type", default)]
    pub var_type: VariableType,
    #[serde(default)]
    pub allowed_values: Vec<CodeValue>,
    #[serde(default)]
    pub value_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub missing_codes: Vec<CodeValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_stats: Option<SummaryStats>,
    #[serde(default)]
    pub notes: String,
    /// Aligned Likert variants negate this variable
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub flip_sign: bool,
    /// Strictly negative numeric values are non-response sentinels
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub coded_likert: bool,
    /// Upper bounds of bins 0 and 1 for the three-bin collapse
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub three_bin_cuts: Option<[f64; 2]>,
}

impl CodebookEntry {
    /// Bare entry with defaults (used for undocumented columns and tests)
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            label: String::new(),
            analysis_role: AnalysisRole::Unspecified,
            var_type: VariableType::Unknown,
            allowed_values: Vec::new(),
            value_labels: BTreeMap::new(),
            missing_codes: Vec::new(),
            summary_stats: None,
            notes: String::new(),
            flip_sign: false,
            coded_likert: false,
            three_bin_cuts: None,
        }
    }

    /// Numeric range of `allowed_values`, when they are all numeric
    pub fn allowed_range(&self) -> Option<(f64, f64)> {
        if self.allowed_values.is_empty() {
            return None;
        }
        let nums: Option<Vec<f64>> = self.allowed_values.iter().map(|v| v.as_number()).collect();
        let nums = nums?;
        let min = nums.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = nums.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        Some((min, max))
    }
}

/// Derivation operation declared in the codebook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivationOp {
    /// `1 if S > 0 else 0`
    Indicator,
    /// `-S` when the source entry has `flip_sign`
    Aligned,
    /// Centre by mean, scale by population std
    Zscore,
    /// Collapse a 7-point aligned scale to {0, 1, 2}
    ThreeBin,
}

impl fmt::Display for DerivationOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DerivationOp::Indicator => "indicator",
            DerivationOp::Aligned => "aligned",
            DerivationOp::Zscore => "zscore",
            DerivationOp::ThreeBin => "three_bin",
        })
    }
}

/// Declared derived variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Derivation {
    pub name: String,
    pub source: String,
    pub op: DerivationOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cuts: Option<[f64; 2]>,
}

/// Rolling regeneration record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegenerationBlock {
    pub command: String,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub timestamp: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Codebook document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Codebook {
    #[serde(default)]
    pub dataset: String,
    #[serde(default)]
    pub generated_at: String,
    #[serde(default)]
    pub row_count: u64,
    #[serde(default)]
    pub column_count: u64,
    #[serde(default)]
    pub seed: Option<u64>,
    pub variables: Vec<CodebookEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weights_reference: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regeneration: Option<RegenerationBlock>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub regeneration_history: Vec<RegenerationBlock>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub derivations: Vec<Derivation>,
    #[serde(default)]
    pub notes: Value,
}

impl Codebook {
    /// Load a codebook JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .map_err(|e| Error::InputMissing(format!("codebook {}: {}", path.display(), e)))?;
        let codebook: Codebook = serde_json::from_slice(&bytes)?;
        codebook.check_unique_names()?;
        Ok(codebook)
    }

    fn check_unique_names(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        let names = self
            .variables
            .iter()
            .map(|e| e.name.as_str())
            .chain(self.derivations.iter().map(|d| d.name.as_str()));
        for name in names {
            if !seen.insert(name) {
                return Err(Error::SchemaConflict(format!(
                    "codebook lists variable '{}' more than once",
                    name
                )));
            }
        }
        Ok(())
    }

    pub fn entry(&self, name: &str) -> Option<&CodebookEntry> {
        self.variables.iter().find(|e| e.name == name)
    }

    /// Declared derivation producing `name`
    pub fn derivation(&self, name: &str) -> Option<&Derivation> {
        self.derivations.iter().find(|d| d.name == name)
    }

    /// Name is a documented variable or a declared derived variable
    pub fn contains(&self, name: &str) -> bool {
        self.entry(name).is_some() || self.derivation(name).is_some()
    }

    /// Variables curated for imputation: predictors, outcomes and controls present in the header
    pub fn curated_columns(&self, header: &[String]) -> Vec<String> {
        header
            .iter()
            .filter(|h| {
                self.entry(h).is_some_and(|e| {
                    matches!(
                        e.analysis_role,
                        AnalysisRole::Predictor | AnalysisRole::Outcome | AnalysisRole::Control
                    )
                })
            })
            .cloned()
            .collect()
    }

    /// Start a new regeneration: the current block moves to the history
    pub fn push_regeneration(&mut self, block: RegenerationBlock) {
        if let Some(previous) = self.regeneration.take() {
            self.regeneration_history.push(previous);
        }
        self.regeneration = Some(block);
    }

    /// Pretty JSON bytes with a trailing newline
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = serde_json::to_vec_pretty(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "dataset": "childhoodbalancedpublic.csv",
        "generated_at": "2025-10-16T00:00:00Z",
        "row_count": 3,
        "column_count": 2,
        "seed": 20251016,
        "variables": [
            {"name": "I love myself", "label": "I love myself", "analysis_role": "outcome",
             "type": "likert", "allowed_values": [-3, -2, -1, 0, 1, 2, 3]},
            {"name": "region", "type": "mystery", "analysis_role": "covariate-ish",
             "missing_codes": ["refused", -9]}
        ],
        "regeneration": {"command": "cbp-dv --config config/run.yaml", "seed": 1, "timestamp": "t0"},
        "notes": "seeded"
    }"#;

    #[test]
    fn test_parse_tolerates_unknown_enum_values() {
        let cb: Codebook = serde_json::from_str(SAMPLE).unwrap();
        let region = cb.entry("region").unwrap();
        assert_eq!(region.var_type, VariableType::Unknown);
        assert_eq!(region.analysis_role, AnalysisRole::Unspecified);
        assert_eq!(region.missing_codes[0], CodeValue::Text("refused".into()));
        assert_eq!(region.missing_codes[1], CodeValue::Number(-9.0));
    }

    #[test]
    fn test_allowed_range() {
        let cb: Codebook = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(cb.entry("I love myself").unwrap().allowed_range(), Some((-3.0, 3.0)));
        assert_eq!(cb.entry("region").unwrap().allowed_range(), None);
    }

    #[test]
    fn test_push_regeneration_keeps_history() {
        let mut cb: Codebook = serde_json::from_str(SAMPLE).unwrap();
        cb.push_regeneration(RegenerationBlock {
            command: "cbp-dv --seed 2".into(),
            seed: Some(2),
            timestamp: "t1".into(),
            extra: BTreeMap::new(),
        });
        assert_eq!(cb.regeneration_history.len(), 1);
        assert_eq!(cb.regeneration_history[0].timestamp, "t0");
        assert_eq!(cb.regeneration.as_ref().unwrap().seed, Some(2));
    }

    #[test]
    fn test_curated_columns_follow_header_order() {
        let cb: Codebook = serde_json::from_str(SAMPLE).unwrap();
        let header = vec!["region".to_string(), "I love myself".to_string(), "extra".to_string()];
        assert_eq!(cb.curated_columns(&header), vec!["I love myself".to_string()]);
    }
}
