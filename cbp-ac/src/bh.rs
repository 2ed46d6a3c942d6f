//! Family-scoped Benjamini-Hochberg adjustment
//!
//! A row enters the scope of its (family, scenario) group when it is
//! targeted, registered (`in_PAP` or `tested`), has a defined p-value and is
//! not a negative control. Rows outside scope keep an empty q-value; every
//! row of the group records the ids that were in scope.

use crate::results::ResultRow;
use std::collections::BTreeMap;

/// Family excluded from adjustment regardless of flags
pub const NEGATIVE_CONTROL_FAMILY: &str = "negative_control";

/// Step-up q-values in input order
///
/// `q_(k) = min_{j ≥ k} m · p_(j) / j`, clipped to `[0, 1]`. Ties keep input
/// order.
pub fn q_values(p_values: &[f64]) -> Vec<f64> {
    let m = p_values.len();
    let mut order: Vec<usize> = (0..m).collect();
    order.sort_by(|&i, &j| p_values[i].total_cmp(&p_values[j]).then(i.cmp(&j)));

    let mut q = vec![1.0; m];
    let mut running = 1.0_f64;
    for (rank0, &idx) in order.iter().enumerate().rev() {
        let adjusted = p_values[idx] * m as f64 / (rank0 + 1) as f64;
        running = running.min(adjusted);
        q[idx] = running.clamp(0.0, 1.0);
    }
    q
}

/// Scope predicate for one result row
pub fn in_scope(row: &ResultRow) -> bool {
    row.targeted
        && row.status.is_registered()
        && row.p_value.is_some()
        && row.family != NEGATIVE_CONTROL_FAMILY
}

/// Per-group audit record
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeRecord {
    pub family: String,
    pub scenario_id: String,
    pub ids: Vec<String>,
}

/// Assign q-values and scope strings to every row, group by group
pub fn adjust(rows: &mut [ResultRow]) -> Vec<ScopeRecord> {
    let mut groups: BTreeMap<(String, String), Vec<usize>> = BTreeMap::new();
    for (i, row) in rows.iter().enumerate() {
        groups
            .entry((row.family.clone(), row.scenario_id.clone()))
            .or_default()
            .push(i);
    }

    let mut records = Vec::with_capacity(groups.len());
    for ((family, scenario_id), members) in groups {
        let scoped: Vec<usize> = members.iter().copied().filter(|&i| in_scope(&rows[i])).collect();
        let p: Vec<f64> = scoped.iter().filter_map(|&i| rows[i].p_value).collect();
        let q = q_values(&p);
        let ids: Vec<String> = scoped.iter().map(|&i| rows[i].hypothesis_id.clone()).collect();
        let scope = ids.join(";");

        for &i in &members {
            rows[i].q_value = None;
            rows[i].bh_in_scope = scope.clone();
        }
        for (&i, q) in scoped.iter().zip(q) {
            rows[i].q_value = Some(q);
        }
        tracing::debug!(family = %family, scenario = %scenario_id, m = ids.len(), "BH adjustment applied");
        records.push(ScopeRecord {
            family,
            scenario_id,
            ids,
        });
    }
    records
}
