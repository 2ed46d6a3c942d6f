//! Survey design manifest
//!
//! Written by the validator at the start of a run and read by the controller
//! to decide between unweighted and weighted estimators.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Justification recorded when nothing design-related was found
pub const SRS_NO_DESIGN_COLUMNS: &str = "No weights/strata/clusters detected";

/// Resolved sampling design
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Design {
    Srs,
    Weighted,
}

impl fmt::Display for Design {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Design::Srs => "srs",
            Design::Weighted => "weighted",
        })
    }
}

/// Design manifest (`artifacts/design_manifest.json`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesignManifest {
    pub design: Design,
    #[serde(default)]
    pub weight_var: Option<String>,
    #[serde(default)]
    pub strata_var: Option<String>,
    #[serde(default)]
    pub cluster_var: Option<String>,
    #[serde(default)]
    pub replicate_weights: Vec<String>,
    #[serde(default)]
    pub fpc: Option<String>,
    /// Why the design resolved to `srs`
    #[serde(default)]
    pub justification: Option<String>,
    #[serde(default)]
    pub notes: Vec<String>,
}

impl DesignManifest {
    pub fn srs(justification: &str) -> Self {
        Self {
            design: Design::Srs,
            weight_var: None,
            strata_var: None,
            cluster_var: None,
            replicate_weights: Vec::new(),
            fpc: None,
            justification: Some(justification.to_string()),
            notes: Vec::new(),
        }
    }

    pub fn is_weighted(&self) -> bool {
        self.design == Design::Weighted
    }

    pub fn relative_path() -> PathBuf {
        PathBuf::from("artifacts").join("design_manifest.json")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .map_err(|e| Error::InputMissing(format!("design manifest {}: {}", path.display(), e)))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = serde_json::to_vec_pretty(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_srs_manifest_round_trips_through_json() {
        let manifest = DesignManifest::srs(SRS_NO_DESIGN_COLUMNS);
        let bytes = manifest.to_json_bytes().unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.contains("\"design\": \"srs\""));
        let back: DesignManifest = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, manifest);
        assert!(!back.is_weighted());
    }
}
