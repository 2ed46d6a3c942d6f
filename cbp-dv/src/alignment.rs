//! Schema alignment between the codebook and the dataset
//!
//! **Alignment** attaches observed summary statistics (after missing-code
//! masking) to every codebook entry present in the header and stamps its
//! notes with `Empirical alignment <timestamp>`. The input codebook is never
//! touched: a new document is produced and the previous `regeneration` block
//! moves to `regeneration_history`.
//!
//! An entry whose `allowed_values` cannot hold an observed value is a
//! `SchemaConflict`; every conflict is collected so the report can list them
//! all before the stage fails.

use cbp_common::codebook::{Codebook, CodebookEntry, RegenerationBlock, SummaryStats, VariableType};
use cbp_common::dataset::{format_number, parse_number, Dataset};
use cbp_common::missing::MissingPolicy;
use cbp_common::stats;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Marker that prefixes the alignment timestamp in entry notes
pub const ALIGNMENT_MARKER: &str = "Empirical alignment ";

/// One codebook/dataset disagreement
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaIssue {
    pub variable: String,
    pub row: usize,
    pub value: String,
    pub detail: String,
}

impl SchemaIssue {
    pub fn describe(&self) -> String {
        format!(
            "'{}' row {}: observed '{}' {}",
            self.variable, self.row, self.value, self.detail
        )
    }
}

/// Result of aligning a codebook with a dataset
#[derive(Debug, Clone)]
pub struct AlignmentOutcome {
    pub codebook: Codebook,
    /// Entries that received fresh summary statistics
    pub aligned: Vec<String>,
    /// Dataset columns with no codebook entry (kept, undocumented)
    pub undocumented: Vec<String>,
    /// Codebook entries with no dataset column
    pub unused: Vec<String>,
    pub conflicts: Vec<SchemaIssue>,
}

/// Replace the timestamp after an existing marker, or append a fresh marker
pub fn stamp_alignment_note(notes: &str, timestamp: &str) -> String {
    if let Some(start) = notes.find(ALIGNMENT_MARKER) {
        let ts_start = start + ALIGNMENT_MARKER.len();
        let ts_len = notes[ts_start..]
            .find(|c: char| c.is_whitespace() || c == ';' || c == ')')
            .unwrap_or(notes.len() - ts_start);
        let mut out = String::with_capacity(notes.len());
        out.push_str(&notes[..ts_start]);
        out.push_str(timestamp);
        out.push_str(&notes[ts_start + ts_len..]);
        return out;
    }
    let stamp = format!("{}{}", ALIGNMENT_MARKER, timestamp);
    if notes.trim().is_empty() {
        stamp
    } else {
        format!("{}; {}", notes.trim_end(), stamp)
    }
}

/// Summary statistics of a column after masking
pub fn summarize(values: &[&str], entry: &CodebookEntry, policy: &MissingPolicy) -> SummaryStats {
    let observed: Vec<&str> = values
        .iter()
        .copied()
        .filter(|v| !policy.is_missing(v, Some(entry)))
        .collect();
    let numeric: Vec<f64> = observed.iter().filter_map(|v| parse_number(v)).collect();
    SummaryStats {
        count: observed.len() as u64,
        mean: stats::mean(&numeric),
        std: stats::sample_sd(&numeric),
        min: stats::min(&numeric),
        q25: stats::quantile(&numeric, 0.25),
        q50: stats::quantile(&numeric, 0.5),
        q75: stats::quantile(&numeric, 0.75),
        max: stats::max(&numeric),
        n_missing: (values.len() - observed.len()) as u64,
        n_unique: stats::n_unique(observed.iter().copied()) as u64,
    }
}

/// Check observed values against `allowed_values`
///
/// Numeric variables treat the allowed values as a closed range; every other
/// type requires membership (numeric codes compare numerically, text codes
/// case-insensitively).
fn check_allowed(values: &[&str], entry: &CodebookEntry, policy: &MissingPolicy) -> Vec<SchemaIssue> {
    if entry.allowed_values.is_empty() {
        return Vec::new();
    }
    let range = entry.allowed_range();
    let mut issues = Vec::new();
    for (row, raw) in values.iter().enumerate() {
        if policy.is_missing(raw, Some(entry)) {
            continue;
        }
        let numeric = parse_number(raw);
        let detail = match (entry.var_type, range, numeric) {
            (VariableType::Numeric, Some((lo, hi)), Some(v)) if v < lo || v > hi => Some(format!(
                "outside allowed range [{}, {}]",
                format_number(lo),
                format_number(hi)
            )),
            (VariableType::Numeric, Some(_), Some(_)) => None,
            (_, Some(_), None) => Some("is not numeric but allowed_values are".to_string()),
            _ => {
                if entry.allowed_values.iter().any(|a| a.matches(raw, numeric)) {
                    None
                } else {
                    Some("is not among allowed_values".to_string())
                }
            }
        };
        if let Some(detail) = detail {
            issues.push(SchemaIssue {
                variable: entry.name.clone(),
                row: row + 1,
                value: raw.trim().to_string(),
                detail,
            });
        }
    }
    issues
}

/// Align a codebook with the dataset
pub fn align(
    codebook: &Codebook,
    dataset: &Dataset,
    policy: &MissingPolicy,
    regeneration: RegenerationBlock,
) -> cbp_common::Result<AlignmentOutcome> {
    let timestamp = regeneration.timestamp.clone();
    let mut aligned_doc = codebook.clone();
    let mut aligned = Vec::new();
    let mut unused = Vec::new();
    let mut conflicts = Vec::new();

    for entry in aligned_doc.variables.iter_mut() {
        if !dataset.has_column(&entry.name) {
            unused.push(entry.name.clone());
            continue;
        }
        let values = dataset.column(&entry.name)?;
        let issues = check_allowed(&values, entry, policy);
        if !issues.is_empty() {
            debug!(variable = %entry.name, count = issues.len(), "Allowed-value conflicts");
        }
        conflicts.extend(issues);
        entry.summary_stats = Some(summarize(&values, entry, policy));
        entry.notes = stamp_alignment_note(&entry.notes, &timestamp);
        aligned.push(entry.name.clone());
    }

    let undocumented: Vec<String> = dataset
        .header()
        .iter()
        .filter(|h| !codebook.contains(h))
        .cloned()
        .collect();

    aligned_doc.row_count = dataset.n_rows() as u64;
    aligned_doc.column_count = dataset.n_cols() as u64;
    aligned_doc.seed = regeneration.seed;
    let mut extra = BTreeMap::new();
    extra.insert("aligned_entries".to_string(), serde_json::json!(aligned.len()));
    aligned_doc.push_regeneration(RegenerationBlock { extra, ..regeneration });

    info!(
        aligned = aligned.len(),
        undocumented = undocumented.len(),
        unused = unused.len(),
        conflicts = conflicts.len(),
        "Schema alignment complete"
    );

    Ok(AlignmentOutcome {
        codebook: aligned_doc,
        aligned,
        undocumented,
        unused,
        conflicts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbp_common::codebook::CodeValue;

    fn block(ts: &str) -> RegenerationBlock {
        RegenerationBlock {
            command: "cbp-dv --config config/run.yaml --seed 1".to_string(),
            seed: Some(1),
            timestamp: ts.to_string(),
            extra: BTreeMap::new(),
        }
    }

    fn likert_codebook() -> Codebook {
        let mut entry = CodebookEntry::named("I love myself");
        entry.var_type = VariableType::Likert;
        entry.allowed_values = (-3..=3).map(|v| CodeValue::Number(v as f64)).collect();
        entry.missing_codes = vec![CodeValue::Number(-9.0)];
        let mut unused = CodebookEntry::named("retired_item");
        unused.notes = "Empirical alignment 2025-01-01T00:00:00Z; kept for history".to_string();
        serde_json::from_value(serde_json::json!({
            "dataset": "childhoodbalancedpublic.csv",
            "variables": [entry, unused],
            "regeneration": {"command": "seed", "timestamp": "t0"}
        }))
        .unwrap()
    }

    fn dataset(values: &[&str]) -> Dataset {
        Dataset::new(
            vec!["I love myself".to_string(), "extra".to_string()],
            values.iter().map(|v| vec![v.to_string(), "x".to_string()]).collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_stamp_replaces_existing_marker() {
        let notes = "Empirical alignment 2025-01-01T00:00:00Z; kept for history";
        assert_eq!(
            stamp_alignment_note(notes, "2025-10-16T12:00:00Z"),
            "Empirical alignment 2025-10-16T12:00:00Z; kept for history"
        );
        assert_eq!(stamp_alignment_note("", "T"), "Empirical alignment T");
        assert_eq!(stamp_alignment_note("Reverse coded.", "T"), "Reverse coded.; Empirical alignment T");
    }

    #[test]
    fn test_summary_stats_respect_allowed_range_after_masking() {
        let codebook = likert_codebook();
        let ds = dataset(&["3", "-3", "-9", "", "1", "0"]);
        let outcome = align(&codebook, &ds, &MissingPolicy::default(), block("t1")).unwrap();
        assert!(outcome.conflicts.is_empty());

        let entry = outcome.codebook.entry("I love myself").unwrap();
        let stats = entry.summary_stats.as_ref().unwrap();
        assert!(stats.min.unwrap() >= -3.0);
        assert!(stats.max.unwrap() <= 3.0);
        assert_eq!(stats.count, 4);
        assert_eq!(stats.n_missing, 2);
        assert_eq!(stats.n_unique, 4);
        assert!(entry.notes.ends_with("Empirical alignment t1"));
    }

    #[test]
    fn test_out_of_range_value_is_conflict() {
        let codebook = likert_codebook();
        let ds = dataset(&["3", "4", "-3"]);
        let outcome = align(&codebook, &ds, &MissingPolicy::default(), block("t1")).unwrap();
        assert_eq!(outcome.conflicts.len(), 1);
        assert_eq!(outcome.conflicts[0].row, 2);
        assert_eq!(outcome.conflicts[0].value, "4");
    }

    #[test]
    fn test_undocumented_and_unused_listed() {
        let codebook = likert_codebook();
        let ds = dataset(&["1"]);
        let outcome = align(&codebook, &ds, &MissingPolicy::default(), block("t1")).unwrap();
        assert_eq!(outcome.undocumented, vec!["extra".to_string()]);
        assert_eq!(outcome.unused, vec!["retired_item".to_string()]);
        let retired = outcome.codebook.entry("retired_item").unwrap();
        assert!(retired.notes.contains("2025-01-01"));
    }

    #[test]
    fn test_regeneration_history_appended() {
        let codebook = likert_codebook();
        let ds = dataset(&["1"]);
        let outcome = align(&codebook, &ds, &MissingPolicy::default(), block("t1")).unwrap();
        assert_eq!(outcome.codebook.regeneration_history.len(), 1);
        assert_eq!(outcome.codebook.regeneration_history[0].command, "seed");
        assert_eq!(outcome.codebook.regeneration.as_ref().unwrap().timestamp, "t1");
        assert!(codebook.regeneration_history.is_empty());
    }
}
