//! Indicator distributions
//!
//! Per-level counts of the categorical derived variables (indicators and
//! three-bin collapses), plus one `missing` row per variable. The `status`
//! column reads `ok`, `suppressed` or `missing`.

use cbp_common::codebook::{Codebook, DerivationOp};
use cbp_common::dataset::{format_number, parse_number, Dataset};
use cbp_common::suppression::{Cell, ColumnKind, PublicTable, Suppressor};
use cbp_common::Result;
use serde::Serialize;

/// Status of a distribution row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelStatus {
    Ok,
    Suppressed,
    Missing,
}

impl LevelStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LevelStatus::Ok => "ok",
            LevelStatus::Suppressed => "suppressed",
            LevelStatus::Missing => "missing",
        }
    }
}

/// One level of one variable
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LevelCount {
    pub variable: String,
    pub level: String,
    pub count: u64,
    /// Share of non-missing rows (of all rows for the missing level)
    pub percent: Option<f64>,
    pub status: LevelStatus,
}

fn levels_for(op: DerivationOp) -> Option<&'static [f64]> {
    match op {
        DerivationOp::Indicator => Some(&[0.0, 1.0]),
        DerivationOp::ThreeBin => Some(&[0.0, 1.0, 2.0]),
        DerivationOp::Aligned | DerivationOp::Zscore => None,
    }
}

/// Level counts for every categorical derived variable present in `dataset`
pub fn indicator_distributions(
    dataset: &Dataset,
    codebook: &Codebook,
    suppressor: &Suppressor,
) -> Result<Vec<LevelCount>> {
    let mut rows = Vec::new();
    for derivation in &codebook.derivations {
        let Some(levels) = levels_for(derivation.op) else {
            continue;
        };
        let values: Vec<Option<f64>> = dataset
            .column(&derivation.name)?
            .into_iter()
            .map(parse_number)
            .collect();
        let n_total = values.len() as u64;
        let n_missing = values.iter().filter(|v| v.is_none()).count() as u64;
        let n_observed = n_total - n_missing;

        for level in levels {
            let count = values.iter().filter(|v| **v == Some(*level)).count() as u64;
            rows.push(LevelCount {
                variable: derivation.name.clone(),
                level: format_number(*level),
                count,
                percent: (n_observed > 0).then(|| 100.0 * count as f64 / n_observed as f64),
                status: if suppressor.is_small(count) {
                    LevelStatus::Suppressed
                } else {
                    LevelStatus::Ok
                },
            });
        }
        rows.push(LevelCount {
            variable: derivation.name.clone(),
            level: "missing".to_string(),
            count: n_missing,
            percent: (n_total > 0).then(|| 100.0 * n_missing as f64 / n_total as f64),
            status: LevelStatus::Missing,
        });
    }
    Ok(rows)
}

pub fn distribution_table(rows: &[LevelCount]) -> Result<PublicTable> {
    let mut table = PublicTable::new(
        "indicator_distributions",
        &[
            ("variable", ColumnKind::Text),
            ("level", ColumnKind::Text),
            ("count", ColumnKind::Count),
            ("percent", ColumnKind::Proportion),
            ("status", ColumnKind::Text),
        ],
    );
    for r in rows {
        table.push_row(vec![
            Cell::text(&r.variable),
            Cell::text(&r.level),
            Cell::Count(r.count),
            Cell::Share {
                value: r.percent,
                base: r.count,
            },
            Cell::text(r.status.as_str()),
        ])?;
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_by_two_response_table() {
        // 42 + 7 respondents for flag_a, 15 + 0 for flag_b
        let mut rows = Vec::new();
        rows.extend(std::iter::repeat(vec!["1".to_string(), "1".to_string()]).take(7));
        rows.extend(std::iter::repeat(vec!["0".to_string(), "0".to_string()]).take(15));
        rows.extend(std::iter::repeat(vec!["0".to_string(), "".to_string()]).take(27));
        let ds = Dataset::new(vec!["flag_a".to_string(), "flag_b".to_string()], rows).unwrap();
        let codebook: Codebook = serde_json::from_value(serde_json::json!({
            "variables": [],
            "derivations": [
                {"name": "flag_a", "source": "a", "op": "indicator"},
                {"name": "flag_b", "source": "b", "op": "indicator"}
            ]
        }))
        .unwrap();
        let suppressor = Suppressor::new(10);
        let dist = indicator_distributions(&ds, &codebook, &suppressor).unwrap();

        let counts: Vec<(String, String, u64, LevelStatus)> = dist
            .iter()
            .map(|r| (r.variable.clone(), r.level.clone(), r.count, r.status))
            .collect();
        assert_eq!(counts[0], ("flag_a".into(), "0".into(), 42, LevelStatus::Ok));
        assert_eq!(counts[1], ("flag_a".into(), "1".into(), 7, LevelStatus::Suppressed));
        assert_eq!(counts[3], ("flag_b".into(), "0".into(), 15, LevelStatus::Ok));
        assert_eq!(counts[4], ("flag_b".into(), "1".into(), 0, LevelStatus::Ok));
        assert_eq!(counts[5].3, LevelStatus::Missing);

        let rendered = distribution_table(&dist).unwrap().render(&suppressor).unwrap();
        let published: Vec<&str> = [0, 1, 3, 4].iter().map(|&i| rendered[i][2].as_str()).collect();
        assert_eq!(published, vec!["42", "<10", "15", "0"]);
        assert_eq!(rendered[1][3], "");
        assert_eq!(rendered[4][3], "0.0000");
    }
}
