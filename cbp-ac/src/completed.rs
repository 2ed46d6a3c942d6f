//! Completed tables read back from the imputation stack
//!
//! The stack carries only imputed columns under sanitized names. Each
//! completed table is the derived dataset with those columns overwritten by
//! the block for one `imputation_id`, so every other column (weights,
//! non-imputed controls) keeps its original name and values.

use cbp_common::artifacts::sha256_file;
use cbp_common::dataset::Dataset;
use cbp_common::{Error, Result};
use cbp_mi::stack::{IMPUTATION_ID, ROW_INDEX};
use cbp_mi::ImputationManifest;
use std::path::Path;
use tracing::debug;

/// Rebuild the `m` completed tables
pub fn completed_tables(
    derived: &Dataset,
    derived_path: &Path,
    manifest: &ImputationManifest,
    stack: &Dataset,
) -> Result<Vec<Dataset>> {
    if sha256_file(derived_path)? != manifest.input_sha256 {
        return Err(Error::SchemaConflict(format!(
            "imputation stack was built from a different version of {}; rerun cbp-mi",
            derived_path.display()
        )));
    }
    let n = derived.n_rows();
    if manifest.n_rows != n || stack.n_rows() != manifest.m * n {
        return Err(Error::SchemaConflict(format!(
            "imputation stack has {} rows; expected m = {} blocks of {}",
            stack.n_rows(),
            manifest.m,
            n
        )));
    }

    let ids = stack.column(IMPUTATION_ID)?;
    let rows = stack.column(ROW_INDEX)?;
    let mut tables = Vec::with_capacity(manifest.m);
    for k in 0..manifest.m {
        let block = k * n..(k + 1) * n;
        let expected_id = (k + 1).to_string();
        for (offset, i) in block.clone().enumerate() {
            if ids[i] != expected_id || rows[i] != offset.to_string() {
                return Err(Error::SchemaConflict(format!(
                    "imputation stack row {} is out of order (imputation_id {}, row_index {})",
                    i, ids[i], rows[i]
                )));
            }
        }
        let mut table = derived.clone();
        for column in &manifest.columns {
            let values = stack.column(&column.sanitized)?;
            table.set_column(
                &column.original,
                values[block.clone()].iter().map(|v| v.to_string()).collect(),
            )?;
        }
        tables.push(table);
    }
    debug!(m = tables.len(), columns = manifest.columns.len(), "Completed tables rebuilt from stack");
    Ok(tables)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbp_common::artifacts::sha256_hex;
    use cbp_common::config::ImputationBackend;
    use cbp_mi::frame::VarKind;
    use cbp_mi::stack::StackColumn;
    use std::fs;
    use tempfile::TempDir;

    const DERIVED: &str = "Score A,wt\n1,2\n,3\n";

    fn manifest(input_sha256: String) -> ImputationManifest {
        ImputationManifest {
            backend: ImputationBackend::HotDeck,
            m: 2,
            burn_in: 0,
            seed: 1,
            sub_seeds: vec![2, 3],
            n_rows: 2,
            columns: vec![StackColumn {
                original: "Score A".into(),
                sanitized: "score_a".into(),
                kind: VarKind::Numeric,
                n_missing: 1,
            }],
            dropped_columns: Vec::new(),
            stack_path: "data/derived/imputation_stack.csv".into(),
            stack_sha256: String::new(),
            input_sha256,
        }
    }

    fn stack() -> Dataset {
        Dataset::new(
            vec!["imputation_id".into(), "row_index".into(), "score_a".into()],
            vec![
                vec!["1".into(), "0".into(), "1".into()],
                vec!["1".into(), "1".into(), "1".into()],
                vec!["2".into(), "0".into(), "1".into()],
                vec!["2".into(), "1".into(), "4".into()],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_blocks_overwrite_imputed_columns_only() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("derived.csv");
        fs::write(&path, DERIVED).unwrap();
        let derived = Dataset::read_csv(&path).unwrap();
        let tables = completed_tables(&derived, &path, &manifest(sha256_hex(DERIVED.as_bytes())), &stack()).unwrap();
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].column("Score A").unwrap(), vec!["1", "1"]);
        assert_eq!(tables[1].column("Score A").unwrap(), vec!["1", "4"]);
        assert_eq!(tables[1].column("wt").unwrap(), vec!["2", "3"]);
    }

    #[test]
    fn test_stale_stack_is_a_conflict() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("derived.csv");
        fs::write(&path, DERIVED).unwrap();
        let derived = Dataset::read_csv(&path).unwrap();
        let err = completed_tables(&derived, &path, &manifest("0".repeat(64)), &stack()).unwrap_err();
        assert_eq!(err.kind(), cbp_common::ErrorKind::SchemaConflict);
    }
}
