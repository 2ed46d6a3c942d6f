//! Survey design detection
//!
//! **Keyword families** (matched case-insensitively on name tokens):
//! - replicate: `replicate`, `repwt*`, `jack*`, `bootstrap`, `rw<digits>`, `jk<digits>`
//! - fpc: `fpc`, "finite population correction"
//! - stratum: `strata`, `stratum`, `strat*`
//! - cluster: `psu`, `cluster(s)`, "primary sampling unit"
//! - weight: whole tokens `weight(s)`, `wgt`, `wt`, or `wgt`/`wt` followed by
//!   digits (`wt2`); `final_wgt` matches, `weightloss` does not
//!
//! The first family that matches wins, in the order above (`repwt` must not
//! land in the weight family). Columns whose name or codebook label reads as
//! a personal attribute ("your weight", kg, `weight_loss`) are excluded from
//! the weight family and listed with the reason.

use cbp_common::codebook::Codebook;
use cbp_common::design::{Design, DesignManifest, SRS_NO_DESIGN_COLUMNS};
use cbp_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::{info, warn};

/// Design role a column may play
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DesignRole {
    Weight,
    Stratum,
    Cluster,
    Replicate,
    Fpc,
}

impl fmt::Display for DesignRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DesignRole::Weight => "weight",
            DesignRole::Stratum => "stratum",
            DesignRole::Cluster => "cluster",
            DesignRole::Replicate => "replicate",
            DesignRole::Fpc => "fpc",
        })
    }
}

/// A column that matched a design keyword family
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub column: String,
    pub role: DesignRole,
    /// Keyword that matched
    pub keyword: String,
    /// Reason the candidate was excluded, when it was
    pub excluded: Option<String>,
}

impl Candidate {
    pub fn confirmed(&self) -> bool {
        self.excluded.is_none()
    }
}

const PERSONAL_ATTRIBUTE_PHRASES: &[&str] = &[
    "your weight",
    "body weight",
    "how much do you weigh",
    "weigh yourself",
    "birth weight",
];

const PERSONAL_ATTRIBUTE_TOKENS: &[&str] = &[
    "kg", "kgs", "lb", "lbs", "pounds", "kilograms", "bmi", "body", "birth", "loss", "gain",
];

fn tokens(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

fn find_token(toks: &[String], pred: impl Fn(&str) -> bool) -> Option<String> {
    toks.iter().find(|t| pred(t.as_str())).cloned()
}

fn match_family(name: &str) -> Option<(DesignRole, String)> {
    let lowered = name.to_lowercase();
    let toks = tokens(name);

    if let Some(k) = find_token(&toks, |t| {
        t == "replicate"
            || t == "bootstrap"
            || t.starts_with("repwt")
            || t.starts_with("jack")
            || (t.len() > 2 && (t.starts_with("rw") || t.starts_with("jk")) && is_digits(&t[2..]))
    }) {
        return Some((DesignRole::Replicate, k));
    }
    if lowered.contains("finite population correction") {
        return Some((DesignRole::Fpc, "finite population correction".to_string()));
    }
    if let Some(k) = find_token(&toks, |t| t == "fpc") {
        return Some((DesignRole::Fpc, k));
    }
    if let Some(k) = find_token(&toks, |t| t == "strata" || t == "stratum" || t.starts_with("strat")) {
        return Some((DesignRole::Stratum, k));
    }
    if lowered.contains("primary sampling unit") {
        return Some((DesignRole::Cluster, "primary sampling unit".to_string()));
    }
    if let Some(k) = find_token(&toks, |t| t == "psu" || t == "cluster" || t == "clusters") {
        return Some((DesignRole::Cluster, k));
    }
    if let Some(k) = find_token(&toks, |t| {
        matches!(t, "weight" | "weights" | "wgt" | "wt")
            || ["wgt", "wt"]
                .iter()
                .any(|p| t.strip_prefix(p).map(is_digits).unwrap_or(false))
    }) {
        return Some((DesignRole::Weight, k));
    }
    None
}

fn personal_attribute(text: &str) -> Option<String> {
    let lowered = text.to_lowercase();
    if let Some(p) = PERSONAL_ATTRIBUTE_PHRASES.iter().find(|p| lowered.contains(*p)) {
        return Some(format!("personal attribute ('{}')", p));
    }
    let toks = tokens(text);
    PERSONAL_ATTRIBUTE_TOKENS
        .iter()
        .find(|u| toks.iter().any(|t| t.as_str() == **u))
        .map(|u| format!("personal attribute (token '{}')", u))
}

/// Scan the header for design candidates, in header order
pub fn detect(header: &[String], codebook: &Codebook) -> Vec<Candidate> {
    header
        .iter()
        .filter_map(|column| {
            let (role, keyword) = match_family(column)?;
            let excluded = if role == DesignRole::Weight {
                let label = codebook.entry(column).map(|e| e.label.as_str()).unwrap_or("");
                personal_attribute(column).or_else(|| personal_attribute(label))
            } else {
                None
            };
            if let Some(reason) = &excluded {
                info!(column = %column, reason = %reason, "Weight candidate excluded");
            }
            Some(Candidate {
                column: column.clone(),
                role,
                keyword,
                excluded,
            })
        })
        .collect()
}

/// Optional design YAML declaring the design explicitly
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DesignDeclaration {
    pub design: Option<Design>,
    pub weight_var: Option<String>,
    pub strata_var: Option<String>,
    pub cluster_var: Option<String>,
    #[serde(default)]
    pub replicate_weights: Vec<String>,
    pub fpc: Option<String>,
    #[serde(default)]
    pub notes: Vec<String>,
}

impl DesignDeclaration {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::InputMissing(format!("design file {}: {}", path.display(), e)))?;
        Ok(serde_yaml::from_str(&content)?)
    }
}

fn first_confirmed(candidates: &[Candidate], role: DesignRole) -> Option<String> {
    candidates
        .iter()
        .find(|c| c.role == role && c.confirmed())
        .map(|c| c.column.clone())
}

/// Resolve candidates (and an optional declaration) into a manifest
///
/// Without a declaration the design is `weighted` only when at least one
/// weight or replicate column and a stratum or cluster column are confirmed.
pub fn resolve(
    candidates: &[Candidate],
    header: &[String],
    declaration: Option<&DesignDeclaration>,
) -> Result<DesignManifest> {
    if let Some(decl) = declaration {
        return resolve_declared(decl, header);
    }

    let weight = first_confirmed(candidates, DesignRole::Weight);
    let strata = first_confirmed(candidates, DesignRole::Stratum);
    let cluster = first_confirmed(candidates, DesignRole::Cluster);
    let fpc = first_confirmed(candidates, DesignRole::Fpc);
    let replicates: Vec<String> = candidates
        .iter()
        .filter(|c| c.role == DesignRole::Replicate && c.confirmed())
        .map(|c| c.column.clone())
        .collect();

    let has_weighting = weight.is_some() || !replicates.is_empty();
    let has_structure = strata.is_some() || cluster.is_some();

    let manifest = if has_weighting && has_structure {
        DesignManifest {
            design: Design::Weighted,
            weight_var: weight,
            strata_var: strata,
            cluster_var: cluster,
            replicate_weights: replicates,
            fpc,
            justification: None,
            notes: vec!["Resolved from column-name detection".to_string()],
        }
    } else if !has_weighting && !has_structure {
        DesignManifest::srs(SRS_NO_DESIGN_COLUMNS)
    } else {
        let found: Vec<String> = [
            weight.map(|w| format!("weight '{}'", w)),
            (!replicates.is_empty()).then(|| format!("{} replicate column(s)", replicates.len())),
            strata.map(|s| format!("stratum '{}'", s)),
            cluster.map(|c| format!("cluster '{}'", c)),
        ]
        .into_iter()
        .flatten()
        .collect();
        let missing = if has_weighting {
            "no stratum or cluster column"
        } else {
            "no weight or replicate column"
        };
        let mut manifest = DesignManifest::srs(&format!(
            "Incomplete design metadata: found {} but {}",
            found.join(", "),
            missing
        ));
        manifest
            .notes
            .push("Partial design columns are reported but not used".to_string());
        manifest
    };

    info!(design = %manifest.design, weight = ?manifest.weight_var, "Design resolved");
    Ok(manifest)
}

fn resolve_declared(decl: &DesignDeclaration, header: &[String]) -> Result<DesignManifest> {
    let declared_columns = decl
        .weight_var
        .iter()
        .chain(decl.strata_var.iter())
        .chain(decl.cluster_var.iter())
        .chain(decl.fpc.iter())
        .chain(decl.replicate_weights.iter());
    for column in declared_columns {
        if !header.contains(column) {
            return Err(Error::InputMissing(format!(
                "design file declares column '{}' which is not in the dataset",
                column
            )));
        }
    }

    let has_weighting = decl.weight_var.is_some() || !decl.replicate_weights.is_empty();
    let design = decl.design.unwrap_or(if has_weighting {
        Design::Weighted
    } else {
        Design::Srs
    });

    if design == Design::Weighted && !has_weighting {
        return Err(Error::SchemaConflict(
            "design file declares a weighted design without weight_var or replicate_weights"
                .to_string(),
        ));
    }

    let mut notes = vec!["Declared in design file".to_string()];
    notes.extend(decl.notes.iter().cloned());
    if design == Design::Srs {
        if has_weighting {
            warn!("Design file declares srs but names weight columns; weights are ignored");
        }
        let mut manifest = DesignManifest::srs("Declared srs in design file");
        manifest.notes = notes;
        return Ok(manifest);
    }

    Ok(DesignManifest {
        design,
        weight_var: decl.weight_var.clone(),
        strata_var: decl.strata_var.clone(),
        cluster_var: decl.cluster_var.clone(),
        replicate_weights: decl.replicate_weights.clone(),
        fpc: decl.fpc.clone(),
        justification: None,
        notes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbp_common::codebook::CodebookEntry;

    fn codebook(entries: Vec<CodebookEntry>) -> Codebook {
        serde_json::from_value(serde_json::json!({ "variables": entries })).unwrap()
    }

    fn header(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_full_design_detected() {
        let mut names = vec!["weight".to_string(), "stratum_id".to_string(), "psu_id".to_string()];
        names.extend((1..=80).map(|i| format!("rw{:02}", i)));
        let candidates = detect(&names, &codebook(vec![]));
        let manifest = resolve(&candidates, &names, None).unwrap();

        assert_eq!(manifest.design, Design::Weighted);
        assert_eq!(manifest.weight_var.as_deref(), Some("weight"));
        assert_eq!(manifest.strata_var.as_deref(), Some("stratum_id"));
        assert_eq!(manifest.cluster_var.as_deref(), Some("psu_id"));
        assert_eq!(manifest.replicate_weights.len(), 80);
        assert_eq!(manifest.replicate_weights[0], "rw01");
        assert_eq!(manifest.replicate_weights[79], "rw80");
    }

    #[test]
    fn test_personal_weight_is_not_a_design_weight() {
        let names = header(&["your weight (kg)"]);
        let candidates = detect(&names, &codebook(vec![]));
        assert_eq!(candidates.len(), 1);
        assert!(!candidates[0].confirmed());

        let manifest = resolve(&candidates, &names, None).unwrap();
        assert_eq!(manifest.design, Design::Srs);
        assert_eq!(manifest.justification.as_deref(), Some("No weights/strata/clusters detected"));
        assert!(manifest.weight_var.is_none());
    }

    #[test]
    fn test_label_based_exclusion() {
        let mut entry = CodebookEntry::named("wt");
        entry.label = "How much do you weigh?".to_string();
        let names = header(&["wt"]);
        let candidates = detect(&names, &codebook(vec![entry]));
        assert!(candidates[0].excluded.is_some());
    }

    #[test]
    fn test_family_precedence() {
        let names = header(&["repwt1", "Primary Sampling Unit", "FPC", "strat", "final_wgt", "jk12", "age"]);
        let roles: Vec<(String, DesignRole)> = detect(&names, &codebook(vec![]))
            .into_iter()
            .map(|c| (c.column, c.role))
            .collect();
        assert_eq!(
            roles,
            vec![
                ("repwt1".to_string(), DesignRole::Replicate),
                ("Primary Sampling Unit".to_string(), DesignRole::Cluster),
                ("FPC".to_string(), DesignRole::Fpc),
                ("strat".to_string(), DesignRole::Stratum),
                ("final_wgt".to_string(), DesignRole::Weight),
                ("jk12".to_string(), DesignRole::Replicate),
            ]
        );
    }

    #[test]
    fn test_weight_family_matches_whole_tokens() {
        let names = header(&["weightloss", "bodyweightkg", "sampwt", "wt2", "Weights", "final_wgt"]);
        let found: Vec<String> = detect(&names, &codebook(vec![]))
            .into_iter()
            .map(|c| c.column)
            .collect();
        assert_eq!(found, vec!["wt2", "Weights", "final_wgt"]);

        let names = header(&["weight_loss", "body_weight_kg", "weight_gain"]);
        let candidates = detect(&names, &codebook(vec![]));
        assert_eq!(candidates.len(), 3);
        assert!(candidates.iter().all(|c| c.role == DesignRole::Weight && !c.confirmed()));
        assert_eq!(
            candidates[0].excluded.as_deref(),
            Some("personal attribute (token 'loss')")
        );
    }

    #[test]
    fn test_weight_without_structure_stays_srs() {
        let names = header(&["weight", "age"]);
        let manifest = resolve(&detect(&names, &codebook(vec![])), &names, None).unwrap();
        assert_eq!(manifest.design, Design::Srs);
        assert!(manifest.weight_var.is_none());
        assert!(manifest
            .justification
            .unwrap()
            .contains("no stratum or cluster column"));
    }

    #[test]
    fn test_declaration_overrides_detection() {
        let names = header(&["w", "s"]);
        let decl = DesignDeclaration {
            weight_var: Some("w".to_string()),
            strata_var: Some("s".to_string()),
            ..Default::default()
        };
        let manifest = resolve(&[], &names, Some(&decl)).unwrap();
        assert_eq!(manifest.design, Design::Weighted);
        assert_eq!(manifest.weight_var.as_deref(), Some("w"));

        let bad = DesignDeclaration {
            weight_var: Some("missing".to_string()),
            ..Default::default()
        };
        assert_eq!(
            resolve(&[], &names, Some(&bad)).unwrap_err().kind(),
            cbp_common::ErrorKind::InputMissing
        );
    }
}
