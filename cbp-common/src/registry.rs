//! Hypothesis registry
//!
//! # State Progression
//! `draft → in_PAP → tested`; `dropped` is reachable from any state and is
//! terminal. Only the controller mutates a record, and only its `status` and
//! `q_value`.

use crate::codebook::Codebook;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::warn;

/// Family name reserved for confirmatory tests
pub const CONFIRMATORY_FAMILY: &str = "confirmatory";

/// Hypothesis lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Status {
    #[serde(rename = "draft")]
    Draft,
    #[serde(rename = "in_PAP")]
    InPap,
    #[serde(rename = "tested")]
    Tested,
    #[serde(rename = "dropped")]
    Dropped,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Draft => "draft",
            Status::InPap => "in_PAP",
            Status::Tested => "tested",
            Status::Dropped => "dropped",
        }
    }

    /// Status counts toward BH scope and missingness profiling
    pub fn is_registered(self) -> bool {
        matches!(self, Status::InPap | Status::Tested)
    }
}

impl FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "draft" => Ok(Status::Draft),
            "in_PAP" => Ok(Status::InPap),
            "tested" => Ok(Status::Tested),
            "dropped" => Ok(Status::Dropped),
            other => Err(Error::InvalidInput(format!(
                "unknown hypothesis status '{}' (expected draft, in_PAP, tested, dropped)",
                other
            ))),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse a canonical `Y`/`N` flag; every other token is rejected
pub fn parse_flag(field: &str, raw: &str) -> Result<bool> {
    match raw.trim() {
        "Y" => Ok(true),
        "N" => Ok(false),
        other => Err(Error::InvalidInput(format!(
            "{} must be 'Y' or 'N', got '{}'",
            field, other
        ))),
    }
}

pub fn flag_str(value: bool) -> &'static str {
    if value {
        "Y"
    } else {
        "N"
    }
}

/// Split a `;`- or `|`-separated list, trimming and de-duplicating in order
pub fn split_list(raw: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.split(|c| c == ';' || c == '|')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter(|s| seen.insert(s.to_string()))
        .map(|s| s.to_string())
        .collect()
}

/// One registered hypothesis
#[derive(Debug, Clone, PartialEq)]
pub struct HypothesisRecord {
    pub id: String,
    pub family: String,
    pub status: Status,
    pub targeted: bool,
    pub outcome_var: String,
    pub predictors: Vec<String>,
    pub controls: Vec<String>,
    pub model_hint: Option<String>,
    pub use_imputation: bool,
    pub notes: String,
    pub q_value: Option<f64>,
}

impl HypothesisRecord {
    /// Outcome, predictors and controls in declaration order (deduplicated)
    pub fn variables(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        std::iter::once(&self.outcome_var)
            .chain(self.predictors.iter())
            .chain(self.controls.iter())
            .filter(|v| seen.insert(v.as_str()))
            .cloned()
            .collect()
    }

    /// Apply a status transition, enforcing monotone progression
    pub fn transition(&mut self, to: Status) -> Result<()> {
        let allowed = match (self.status, to) {
            (from, to) if from == to => true,
            (Status::Dropped, _) => false,
            (_, Status::Dropped) => true,
            (Status::Draft, Status::InPap) | (Status::InPap, Status::Tested) => true,
            _ => false,
        };
        if !allowed {
            return Err(Error::InvalidInput(format!(
                "hypothesis '{}': illegal status transition {} -> {}",
                self.id, self.status, to
            )));
        }
        if to == Status::Dropped {
            self.q_value = None;
        }
        self.status = to;
        Ok(())
    }

    /// Whether this record belongs to the BH scope predicate (p-value aside)
    pub fn in_bh_scope(&self) -> bool {
        self.targeted && self.status.is_registered()
    }
}

#[derive(Debug, Deserialize)]
struct RegistryRow {
    id: String,
    family: String,
    status: String,
    targeted: String,
    outcome_var: String,
    #[serde(default)]
    predictors: String,
    #[serde(default)]
    controls: String,
    #[serde(default)]
    notes: String,
    #[serde(default)]
    model_hint: Option<String>,
    #[serde(default)]
    use_imputation: Option<String>,
    #[serde(default)]
    q_value: Option<String>,
}

/// Ordered hypothesis registry
#[derive(Debug, Clone, Default)]
pub struct Registry {
    records: Vec<HypothesisRecord>,
}

impl Registry {
    pub fn new(records: Vec<HypothesisRecord>) -> Result<Self> {
        let registry = Self { records };
        registry.validate()?;
        Ok(registry)
    }

    /// Load a registry CSV
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::InputMissing(format!("hypothesis registry {}", path.display())));
        }
        let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::Headers).from_path(path)?;
        let mut records = Vec::new();
        for (line, row) in reader.deserialize::<RegistryRow>().enumerate() {
            let row = row?;
            records.push(Self::record_from_row(row).map_err(|e| {
                Error::InvalidInput(format!("registry row {}: {}", line + 1, e))
            })?);
        }
        Self::new(records)
    }

    fn record_from_row(row: RegistryRow) -> Result<HypothesisRecord> {
        let q_value = match row.q_value.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(q) => Some(q.parse::<f64>().map_err(|_| {
                Error::InvalidInput(format!("q_value '{}' is not a number", q))
            })?),
        };
        Ok(HypothesisRecord {
            id: row.id.trim().to_string(),
            family: row.family.trim().to_string(),
            status: row.status.parse()?,
            targeted: parse_flag("targeted", &row.targeted)?,
            outcome_var: row.outcome_var.trim().to_string(),
            predictors: split_list(&row.predictors),
            controls: split_list(&row.controls),
            model_hint: row
                .model_hint
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty()),
            use_imputation: match row.use_imputation.as_deref().map(str::trim) {
                None | Some("") => false,
                Some(flag) => parse_flag("use_imputation", flag)?,
            },
            notes: row.notes,
            q_value,
        })
    }

    fn validate(&self) -> Result<()> {
        let mut ids = HashSet::new();
        for record in &self.records {
            if record.id.is_empty() {
                return Err(Error::InvalidInput("hypothesis id must not be empty".to_string()));
            }
            if !ids.insert(record.id.as_str()) {
                return Err(Error::InvalidInput(format!("duplicate hypothesis id '{}'", record.id)));
            }
            if record.family.is_empty() {
                return Err(Error::InvalidInput(format!(
                    "hypothesis '{}' has an empty family",
                    record.id
                )));
            }
            if record.status != Status::Dropped && record.outcome_var.is_empty() {
                return Err(Error::InvalidInput(format!(
                    "hypothesis '{}' has no outcome_var",
                    record.id
                )));
            }
            if record.status != Status::Dropped && record.predictors.is_empty() {
                return Err(Error::InvalidInput(format!(
                    "hypothesis '{}' has no predictors",
                    record.id
                )));
            }
            if record.use_imputation && record.family == CONFIRMATORY_FAMILY {
                return Err(Error::InvalidInput(format!(
                    "hypothesis '{}': confirmatory hypotheses cannot be fitted on imputed data",
                    record.id
                )));
            }
        }
        Ok(())
    }

    pub fn records(&self) -> &[HypothesisRecord] {
        &self.records
    }

    pub fn get(&self, id: &str) -> Option<&HypothesisRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut HypothesisRecord> {
        self.records.iter_mut().find(|r| r.id == id)
    }

    /// Variables referenced by `in_PAP`/`tested` hypotheses, first-seen order
    pub fn registered_variables(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.records
            .iter()
            .filter(|r| r.status.is_registered())
            .flat_map(|r| r.variables())
            .filter(|v| seen.insert(v.clone()))
            .collect()
    }

    /// Variables referenced only by dropped hypotheses
    pub fn dropped_only_variables(&self) -> Vec<String> {
        let live: HashSet<String> = self
            .records
            .iter()
            .filter(|r| r.status != Status::Dropped)
            .flat_map(|r| r.variables())
            .collect();
        let mut seen = HashSet::new();
        self.records
            .iter()
            .filter(|r| r.status == Status::Dropped)
            .flat_map(|r| r.variables())
            .filter(|v| !live.contains(v) && seen.insert(v.clone()))
            .collect()
    }

    /// Pre-flight: every variable of a non-dropped hypothesis must exist in
    /// the codebook or the dataset header
    ///
    /// Returns warnings for variables referenced only by dropped hypotheses.
    pub fn preflight(&self, header: &[String], codebook: &Codebook) -> Result<Vec<String>> {
        let header: HashSet<&str> = header.iter().map(|s| s.as_str()).collect();
        for record in self.records.iter().filter(|r| r.status != Status::Dropped) {
            for var in record.variables() {
                if !header.contains(var.as_str()) && !codebook.contains(&var) {
                    return Err(Error::InputMissing(format!(
                        "variable '{}' (hypothesis '{}') is in neither the codebook nor the dataset header",
                        var, record.id
                    )));
                }
            }
        }
        let warnings: Vec<String> = self
            .dropped_only_variables()
            .into_iter()
            .map(|v| format!("variable '{}' is referenced only by dropped hypotheses", v))
            .collect();
        for w in &warnings {
            warn!("{}", w);
        }
        Ok(warnings)
    }

    /// Serialize the registry (including written-back q-values) as CSV bytes
    pub fn to_csv_bytes(&self) -> Result<Vec<u8>> {
        let mut writer = csv::WriterBuilder::new()
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(Vec::new());
        writer.write_record([
            "id",
            "family",
            "status",
            "targeted",
            "outcome_var",
            "predictors",
            "controls",
            "notes",
            "model_hint",
            "use_imputation",
            "q_value",
        ])?;
        for r in &self.records {
            writer.write_record([
                r.id.as_str(),
                r.family.as_str(),
                r.status.as_str(),
                flag_str(r.targeted),
                r.outcome_var.as_str(),
                r.predictors.join(";").as_str(),
                r.controls.join(";").as_str(),
                r.notes.as_str(),
                r.model_hint.as_deref().unwrap_or(""),
                flag_str(r.use_imputation),
                crate::dataset::format_optional(r.q_value).as_str(),
            ])?;
        }
        writer
            .into_inner()
            .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn record(id: &str, family: &str, status: Status, targeted: bool) -> HypothesisRecord {
        HypothesisRecord {
            id: id.to_string(),
            family: family.to_string(),
            status,
            targeted,
            outcome_var: "y".to_string(),
            predictors: vec!["x".to_string()],
            controls: vec![],
            model_hint: None,
            use_imputation: false,
            notes: String::new(),
            q_value: None,
        }
    }

    #[test]
    fn test_split_list_dedupes_and_accepts_both_separators() {
        assert_eq!(split_list("a; b|a ;c"), vec!["a", "b", "c"]);
        assert!(split_list("").is_empty());
    }

    #[test]
    fn test_flag_parsing_is_canonical_only() {
        assert!(parse_flag("targeted", "Y").unwrap());
        assert!(!parse_flag("targeted", " N ").unwrap());
        for bad in ["y", "yes", "true", "1", ""] {
            assert!(parse_flag("targeted", bad).is_err(), "{:?} accepted", bad);
        }
    }

    #[test]
    fn test_status_transitions_are_monotone() {
        let mut r = record("H1", "confirmatory", Status::Draft, true);
        r.transition(Status::InPap).unwrap();
        r.transition(Status::Tested).unwrap();
        assert!(r.transition(Status::InPap).is_err());
        r.transition(Status::Dropped).unwrap();
        assert!(r.transition(Status::Tested).is_err());

        let mut r = record("H2", "confirmatory", Status::Draft, true);
        assert!(r.transition(Status::Tested).is_err());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let err = Registry::new(vec![
            record("H1", "f", Status::InPap, true),
            record("H1", "f", Status::InPap, true),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_confirmatory_cannot_use_imputation() {
        let mut r = record("H1", CONFIRMATORY_FAMILY, Status::InPap, true);
        r.use_imputation = true;
        assert!(Registry::new(vec![r]).is_err());
    }

    #[test]
    fn test_registered_and_dropped_only_variables() {
        let mut dropped = record("H9", "f", Status::Dropped, true);
        dropped.outcome_var = "legacy".to_string();
        let registry = Registry::new(vec![
            record("H1", "f", Status::InPap, true),
            record("H2", "f", Status::Draft, true),
            dropped,
        ])
        .unwrap();
        assert_eq!(registry.registered_variables(), vec!["y", "x"]);
        assert_eq!(registry.dropped_only_variables(), vec!["legacy"]);
    }
}
