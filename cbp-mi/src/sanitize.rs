//! Column-name sanitization
//!
//! Survey headers are free text ("I love myself", "your weight (kg)"). The
//! stack uses machine-safe names:
//! 1. every run of non-alphanumerics (ASCII) becomes a single `_`
//! 2. lowercase
//! 3. `col_` prefix when the result starts with a digit
//! 4. collisions take `_1`, `_2`, … in input order

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Original ↔ sanitized pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub original: String,
    pub sanitized: String,
}

fn base_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_run = false;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            in_run = false;
        } else if !in_run {
            out.push('_');
            in_run = true;
        }
    }
    if out.is_empty() {
        out.push_str("col");
    }
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert_str(0, "col_");
    }
    out
}

/// Sanitize names in order, suffixing collisions
pub fn sanitize_names(names: &[String]) -> Vec<ColumnMapping> {
    let mut used: HashSet<String> = HashSet::with_capacity(names.len());
    names
        .iter()
        .map(|original| {
            let base = base_name(original);
            let mut candidate = base.clone();
            let mut suffix = 1usize;
            while used.contains(&candidate) {
                candidate = format!("{}_{}", base, suffix);
                suffix += 1;
            }
            used.insert(candidate.clone());
            ColumnMapping {
                original: original.clone(),
                sanitized: candidate,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn sanitized(v: &[&str]) -> Vec<String> {
        sanitize_names(&names(v)).into_iter().map(|m| m.sanitized).collect()
    }

    #[test]
    fn test_runs_collapse_and_lowercase() {
        assert_eq!(
            sanitized(&["I love myself", "your weight (kg)", "Q-1..a"]),
            vec!["i_love_myself", "your_weight_kg_", "q_1_a"]
        );
    }

    #[test]
    fn test_digit_prefix() {
        assert_eq!(sanitized(&["1st child", "%"]), vec!["col_1st_child", "_"]);
    }

    #[test]
    fn test_collisions_suffix_in_input_order() {
        assert_eq!(
            sanitized(&["a b", "a-b", "A_B", "a_b_1"]),
            vec!["a_b", "a_b_1", "a_b_2", "a_b_1_1"]
        );
    }

    #[test]
    fn test_mapping_keeps_original() {
        let map = sanitize_names(&names(&["Age (years)"]));
        assert_eq!(map[0].original, "Age (years)");
        assert_eq!(map[0].sanitized, "age_years_");
    }

    proptest! {
        /// PROPERTY: sanitized names are unique and machine safe
        #[test]
        fn prop_unique_and_safe(input in prop::collection::vec(".{0,12}", 0..20)) {
            let map = sanitize_names(&input);
            prop_assert_eq!(map.len(), input.len());
            let unique: HashSet<&str> = map.iter().map(|m| m.sanitized.as_str()).collect();
            prop_assert_eq!(unique.len(), map.len());
            for m in &map {
                prop_assert!(!m.sanitized.is_empty());
                prop_assert!(m.sanitized.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'));
                prop_assert!(!m.sanitized.starts_with(|c: char| c.is_ascii_digit()));
            }
        }

        /// PROPERTY: sanitization is a pure function of the input sequence
        #[test]
        fn prop_deterministic(input in prop::collection::vec("[A-Za-z0-9 ()_-]{0,10}", 0..15)) {
            prop_assert_eq!(sanitize_names(&input), sanitize_names(&input));
        }
    }
}
