//! Missing-value semantics
//!
//! A cell is missing when:
//! 1. storage is null (empty cell),
//! 2. the trimmed text matches a missing token (case-insensitive),
//! 3. the codebook entry's `missing_codes` contains the observed value, or
//! 4. the column is flagged `coded_likert` and the numeric value is strictly negative.
//!
//! Two sentinel conventions exist in the source data: token lists and negative
//! integer codes. Each variable must use at most one of them; the convention
//! observed is recorded per variable and mixed use is a `SchemaConflict`.

use crate::codebook::{CodeValue, CodebookEntry};
use crate::dataset::parse_number;
use crate::{Error, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default token set (compared case-insensitively after trimming)
pub static DEFAULT_MISSING_TOKENS: Lazy<Vec<String>> = Lazy::new(|| {
    ["", "na", "n/a", "nan", "prefer not to answer"]
        .iter()
        .map(|s| s.to_string())
        .collect()
});

/// Why a cell is missing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingReason {
    /// Empty storage
    Null,
    /// Matched the missing-token set
    Token,
    /// Listed in the codebook's `missing_codes`
    DeclaredCode,
    /// Negative value in a coded-Likert column
    NegativeCode,
}

/// Sentinel convention a variable was observed to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingConvention {
    /// Only storage nulls (or nothing missing)
    None,
    /// String tokens such as "NA" or "prefer not to answer"
    Token,
    /// Negative integer codes
    NegativeCode,
}

impl fmt::Display for MissingConvention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MissingConvention::None => "none",
            MissingConvention::Token => "token",
            MissingConvention::NegativeCode => "negative_code",
        })
    }
}

/// Missing-value policy for a run
#[derive(Debug, Clone)]
pub struct MissingPolicy {
    tokens: Vec<String>,
}

impl Default for MissingPolicy {
    fn default() -> Self {
        Self {
            tokens: DEFAULT_MISSING_TOKENS.clone(),
        }
    }
}

impl MissingPolicy {
    /// Policy with a configured token set (empty string is always a token)
    pub fn with_tokens(tokens: Option<&[String]>) -> Self {
        match tokens {
            None => Self::default(),
            Some(list) => {
                let mut tokens: Vec<String> =
                    list.iter().map(|t| t.trim().to_lowercase()).collect();
                if !tokens.iter().any(|t| t.is_empty()) {
                    tokens.push(String::new());
                }
                Self { tokens }
            }
        }
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// Classify a cell; `None` means observed
    pub fn classify(&self, raw: &str, entry: Option<&CodebookEntry>) -> Option<MissingReason> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Some(MissingReason::Null);
        }
        let lowered = trimmed.to_lowercase();
        if self.tokens.iter().any(|t| *t == lowered) {
            return Some(MissingReason::Token);
        }
        if let Some(entry) = entry {
            let numeric = parse_number(trimmed);
            if entry.missing_codes.iter().any(|code| code.matches(trimmed, numeric)) {
                return Some(match numeric {
                    Some(v) if v < 0.0 => MissingReason::NegativeCode,
                    _ => MissingReason::DeclaredCode,
                });
            }
            if entry.coded_likert {
                if let Some(v) = numeric {
                    if v < 0.0 {
                        return Some(MissingReason::NegativeCode);
                    }
                }
            }
        }
        None
    }

    pub fn is_missing(&self, raw: &str, entry: Option<&CodebookEntry>) -> bool {
        self.classify(raw, entry).is_some()
    }

    /// Numeric value of an observed cell (None when missing or non-numeric)
    pub fn numeric(&self, raw: &str, entry: Option<&CodebookEntry>) -> Option<f64> {
        if self.is_missing(raw, entry) {
            None
        } else {
            parse_number(raw)
        }
    }

    /// Determine the sentinel convention used by one variable
    ///
    /// Declared string codes count as the token convention, declared negative
    /// codes as the negative-code convention. A variable that uses both is a
    /// `SchemaConflict`.
    pub fn convention(
        &self,
        name: &str,
        values: &[&str],
        entry: Option<&CodebookEntry>,
    ) -> Result<MissingConvention> {
        let mut token_hits = 0usize;
        let mut negative_hits = 0usize;
        for raw in values {
            match self.classify(raw, entry) {
                Some(MissingReason::Token) => token_hits += 1,
                Some(MissingReason::NegativeCode) => negative_hits += 1,
                Some(MissingReason::DeclaredCode) => token_hits += 1,
                Some(MissingReason::Null) | None => {}
            }
        }
        match (token_hits > 0, negative_hits > 0) {
            (true, true) => Err(Error::SchemaConflict(format!(
                "variable '{}' mixes missing-code conventions ({} token cells, {} negative-code cells)",
                name, token_hits, negative_hits
            ))),
            (true, false) => Ok(MissingConvention::Token),
            (false, true) => Ok(MissingConvention::NegativeCode),
            (false, false) => Ok(MissingConvention::None),
        }
    }
}

impl CodeValue {
    /// Whether an observed cell equals this code
    pub fn matches(&self, raw: &str, numeric: Option<f64>) -> bool {
        match self {
            CodeValue::Number(n) => numeric.map(|v| v == *n).unwrap_or(false),
            CodeValue::Text(t) => t.trim().eq_ignore_ascii_case(raw.trim()),
        }
    }
}
