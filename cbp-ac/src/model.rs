//! Model dispatch
//!
//! Hypotheses name a routine through `model_hint`; the lookup is a plain
//! match onto tagged variants, each carrying its capability record.

use cbp_common::codebook::{Codebook, DerivationOp, VariableType};
use cbp_common::registry::HypothesisRecord;
use cbp_common::{Error, Result};
use serde::Serialize;
use std::fmt;

/// What a routine needs from, or gives back to, the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub needs_weights: bool,
    pub needs_imputation: bool,
    pub returns_ordinal_odds: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// Linear regression (WLS under a weighted design)
    Ols,
    /// Binary logistic regression
    Logit,
    /// Proportional-odds cumulative logit
    OrdinalLogit,
}

impl ModelKind {
    pub fn name(self) -> &'static str {
        match self {
            ModelKind::Ols => "ols",
            ModelKind::Logit => "logit",
            ModelKind::OrdinalLogit => "ordinal_logit",
        }
    }

    /// Capability record; `needs_weights` follows the design, imputation the hypothesis
    pub fn capabilities(self, weighted: bool, use_imputation: bool) -> Capabilities {
        Capabilities {
            needs_weights: weighted,
            needs_imputation: use_imputation,
            returns_ordinal_odds: self == ModelKind::OrdinalLogit,
        }
    }

    /// Parse a `model_hint`
    pub fn from_hint(hint: &str) -> Result<Self> {
        match hint.trim().to_ascii_lowercase().as_str() {
            "ols" | "linear" => Ok(ModelKind::Ols),
            "logit" | "logistic" => Ok(ModelKind::Logit),
            "ordinal" | "ologit" | "ordinal_logit" => Ok(ModelKind::OrdinalLogit),
            other => Err(Error::InvalidInput(format!(
                "unknown model_hint '{}' (expected ols, logit or ordinal_logit)",
                other
            ))),
        }
    }

    /// Routine for a hypothesis: its hint, else logit for binary outcomes, else OLS
    pub fn for_hypothesis(record: &HypothesisRecord, codebook: &Codebook) -> Result<Self> {
        if let Some(hint) = &record.model_hint {
            return Self::from_hint(hint);
        }
        let binary = codebook
            .entry(&record.outcome_var)
            .map(|e| e.var_type == VariableType::Binary)
            .unwrap_or(false)
            || codebook
                .derivation(&record.outcome_var)
                .map(|d| d.op == DerivationOp::Indicator)
                .unwrap_or(false);
        Ok(if binary { ModelKind::Logit } else { ModelKind::Ols })
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
