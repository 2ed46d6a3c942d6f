//! Missingness profiling
//!
//! Profiles every variable referenced by an `in_PAP`/`tested` hypothesis and
//! the joint missingness patterns across those key variables. Counts here are
//! true counts; suppression happens only when the tables are rendered.

use cbp_common::codebook::Codebook;
use cbp_common::dataset::Dataset;
use cbp_common::missing::{MissingConvention, MissingPolicy, MissingReason};
use cbp_common::suppression::{Cell, ColumnKind, PublicTable};
use cbp_common::{stats, Result};
use serde::Serialize;
use std::collections::BTreeMap;

/// Per-variable missingness profile
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct VariableProfile {
    pub variable: String,
    pub n_total: u64,
    pub n_missing: u64,
    pub missing_fraction: f64,
    pub n_unique: u64,
    pub nonmissing_count: u64,
    pub negative_code_count: u64,
    pub convention: MissingConvention,
    pub notes: String,
}

/// Profile one variable
pub fn profile_variable(
    dataset: &Dataset,
    codebook: &Codebook,
    policy: &MissingPolicy,
    name: &str,
) -> Result<VariableProfile> {
    let values = dataset.column(name)?;
    let entry = codebook.entry(name);
    let convention = policy.convention(name, &values, entry)?;

    let mut n_missing = 0u64;
    let mut negative = 0u64;
    let mut observed = Vec::with_capacity(values.len());
    for raw in &values {
        match policy.classify(raw, entry) {
            Some(reason) => {
                n_missing += 1;
                if reason == MissingReason::NegativeCode {
                    negative += 1;
                }
            }
            None => observed.push(*raw),
        }
    }
    let n_total = values.len() as u64;

    let mut notes = Vec::new();
    if entry.is_none() {
        match codebook.derivation(name) {
            Some(d) => notes.push(format!("derived ({} of {})", d.op, d.source)),
            None => notes.push("undocumented".to_string()),
        }
    }
    if n_total > 0 && n_missing == n_total {
        notes.push("all values missing".to_string());
    }

    Ok(VariableProfile {
        variable: name.to_string(),
        n_total,
        n_missing,
        missing_fraction: if n_total == 0 {
            0.0
        } else {
            n_missing as f64 / n_total as f64
        },
        n_unique: stats::n_unique(observed.iter().copied()) as u64,
        nonmissing_count: observed.len() as u64,
        negative_code_count: negative,
        convention,
        notes: notes.join("; "),
    })
}

/// One joint missingness pattern across key variables
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PatternRow {
    pub pattern_rank: usize,
    /// Key variables missing together (empty for complete cases)
    pub missing_vars: Vec<String>,
    pub count: u64,
}

/// Joint missingness across key variables
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PatternSummary {
    pub n_rows: u64,
    pub complete_cases_across_key_vars: u64,
    pub missing_in_any_key_var: u64,
    pub patterns: Vec<PatternRow>,
}

/// Rank patterns by frequency (ties broken by pattern text)
pub fn patterns(
    dataset: &Dataset,
    codebook: &Codebook,
    policy: &MissingPolicy,
    key_vars: &[String],
) -> Result<PatternSummary> {
    let columns: Vec<Vec<&str>> = key_vars
        .iter()
        .map(|v| dataset.column(v))
        .collect::<Result<_>>()?;
    let entries: Vec<_> = key_vars.iter().map(|v| codebook.entry(v)).collect();

    let mut counts: BTreeMap<Vec<usize>, u64> = BTreeMap::new();
    for row in 0..dataset.n_rows() {
        let missing: Vec<usize> = (0..key_vars.len())
            .filter(|&k| policy.is_missing(columns[k][row], entries[k]))
            .collect();
        *counts.entry(missing).or_insert(0) += 1;
    }

    let complete = counts.get(&Vec::new()).copied().unwrap_or(0);
    let mut ranked: Vec<(Vec<String>, u64)> = counts
        .into_iter()
        .map(|(idx, n)| (idx.into_iter().map(|k| key_vars[k].clone()).collect(), n))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let n_rows = dataset.n_rows() as u64;
    Ok(PatternSummary {
        n_rows,
        complete_cases_across_key_vars: complete,
        missing_in_any_key_var: n_rows - complete,
        patterns: ranked
            .into_iter()
            .enumerate()
            .map(|(i, (missing_vars, count))| PatternRow {
                pattern_rank: i + 1,
                missing_vars,
                count,
            })
            .collect(),
    })
}

// ========================================
// Public tables
// ========================================

pub fn profile_table(profiles: &[VariableProfile]) -> Result<PublicTable> {
    let mut table = PublicTable::new(
        "missingness_profile",
        &[
            ("variable", ColumnKind::Text),
            ("n_total", ColumnKind::Count),
            ("n_missing", ColumnKind::Count),
            ("missing_fraction", ColumnKind::Proportion),
            ("n_unique", ColumnKind::Number),
            ("nonmissing_count", ColumnKind::Count),
            ("negative_code_count", ColumnKind::Count),
            ("convention", ColumnKind::Text),
            ("notes", ColumnKind::Text),
        ],
    );
    for p in profiles {
        table.push_row(vec![
            Cell::text(&p.variable),
            Cell::Count(p.n_total),
            Cell::Count(p.n_missing),
            Cell::Share {
                value: Some(p.missing_fraction),
                base: p.n_missing,
            },
            Cell::Number(Some(p.n_unique as f64)),
            Cell::Count(p.nonmissing_count),
            Cell::Count(p.negative_code_count),
            Cell::text(p.convention.to_string()),
            Cell::text(&p.notes),
        ])?;
    }
    Ok(table)
}

pub fn pattern_table(summary: &PatternSummary) -> Result<PublicTable> {
    let mut table = PublicTable::new(
        "missingness_patterns",
        &[
            ("pattern_rank", ColumnKind::Text),
            ("missing_vars", ColumnKind::Text),
            ("count", ColumnKind::Count),
            ("proportion", ColumnKind::Proportion),
        ],
    );
    table.push_row(vec![
        Cell::text("complete_cases_across_key_vars"),
        Cell::text(""),
        Cell::Count(summary.complete_cases_across_key_vars),
        share(summary.complete_cases_across_key_vars, summary.n_rows),
    ])?;
    table.push_row(vec![
        Cell::text("missing_in_>=1_key_var"),
        Cell::text(""),
        Cell::Count(summary.missing_in_any_key_var),
        share(summary.missing_in_any_key_var, summary.n_rows),
    ])?;
    for row in &summary.patterns {
        let label = if row.missing_vars.is_empty() {
            "(complete)".to_string()
        } else {
            row.missing_vars.join(";")
        };
        table.push_row(vec![
            Cell::text(row.pattern_rank.to_string()),
            Cell::text(label),
            Cell::Count(row.count),
            share(row.count, summary.n_rows),
        ])?;
    }
    Ok(table)
}

fn share(count: u64, total: u64) -> Cell {
    Cell::Share {
        value: (total > 0).then(|| count as f64 / total as f64),
        base: count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbp_common::codebook::CodebookEntry;
    use cbp_common::suppression::Suppressor;

    fn fixture() -> (Dataset, Codebook) {
        let mut likert = CodebookEntry::named("q1");
        likert.coded_likert = true;
        let codebook: Codebook = serde_json::from_value(serde_json::json!({
            "variables": [likert, CodebookEntry::named("q2")]
        }))
        .unwrap();
        let ds = Dataset::new(
            vec!["q1".to_string(), "q2".to_string()],
            vec![
                vec!["1".into(), "a".into()],
                vec!["-9".into(), "b".into()],
                vec!["2".into(), "".into()],
                vec!["-1".into(), "NA".into()],
                vec!["1".into(), "a".into()],
            ],
        )
        .unwrap();
        (ds, codebook)
    }

    #[test]
    fn test_profile_counts_and_convention() {
        let (ds, cb) = fixture();
        let p = profile_variable(&ds, &cb, &MissingPolicy::default(), "q1").unwrap();
        assert_eq!(p.n_total, 5);
        assert_eq!(p.n_missing, 2);
        assert_eq!(p.negative_code_count, 2);
        assert_eq!(p.nonmissing_count, 3);
        assert_eq!(p.n_unique, 2);
        assert_eq!(p.convention, MissingConvention::NegativeCode);

        let p = profile_variable(&ds, &cb, &MissingPolicy::default(), "q2").unwrap();
        assert_eq!(p.convention, MissingConvention::Token);
    }

    #[test]
    fn test_missing_column_names_offender() {
        let (ds, cb) = fixture();
        let err = profile_variable(&ds, &cb, &MissingPolicy::default(), "age").unwrap_err();
        assert_eq!(err.kind(), cbp_common::ErrorKind::InputMissing);
        assert!(err.to_string().contains("'age'"));
    }

    #[test]
    fn test_patterns_ranked_by_frequency() {
        let (ds, cb) = fixture();
        let keys = vec!["q1".to_string(), "q2".to_string()];
        let summary = patterns(&ds, &cb, &MissingPolicy::default(), &keys).unwrap();
        assert_eq!(summary.complete_cases_across_key_vars, 2);
        assert_eq!(summary.missing_in_any_key_var, 3);
        assert_eq!(summary.patterns[0].missing_vars, Vec::<String>::new());
        assert_eq!(summary.patterns[0].count, 2);
        let total: u64 = summary.patterns.iter().map(|p| p.count).sum();
        assert_eq!(total, 5);
    }

    #[test]
    fn test_profile_table_suppresses_small_counts() {
        let (ds, cb) = fixture();
        let p = profile_variable(&ds, &cb, &MissingPolicy::default(), "q1").unwrap();
        let rendered = profile_table(&[p]).unwrap().render(&Suppressor::new(10)).unwrap();
        assert_eq!(rendered[0][1], "<10");
        assert_eq!(rendered[0][2], "<10");
        assert_eq!(rendered[0][3], "");
        assert_eq!(rendered[0][6], "<10");
    }
}
