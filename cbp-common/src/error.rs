//! Common error types for the analysis harness
//!
//! Every stage returns [`Result`]. The five analysis-level kinds
//! (`InputMissing`, `SchemaConflict`, `DisclosureRisk`,
//! `NumericallyDegenerate`, `NondeterministicBackend`) carry enough context
//! to name the offender verbatim; the remaining variants wrap plumbing errors.

use std::fmt;
use thiserror::Error;

/// Common result type for harness operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across all stages
#[derive(Error, Debug)]
pub enum Error {
    /// Required file, column, or configuration role is absent
    #[error("Input missing: {0}")]
    InputMissing(String),

    /// Codebook and dataset disagree (or a variable mixes missing-code conventions)
    #[error("Schema conflict: {0}")]
    SchemaConflict(String),

    /// A caller attempted to release an unsuppressed small cell
    #[error("Disclosure risk: unsuppressed count {count} at {table}[{row}, {column}] (threshold {threshold})")]
    DisclosureRisk {
        table: String,
        row: usize,
        column: String,
        count: u64,
        threshold: u64,
    },

    /// Zero variance, singular design, or analytic n below the floor
    #[error("Numerically degenerate: {0}")]
    NumericallyDegenerate(String),

    /// A random back-end that cannot be seeded was requested
    #[error("Nondeterministic backend: {0}")]
    NondeterministicBackend(String),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid user input (registry row, CLI argument, enum token)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV reader/writer error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML (de)serialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// TOML deserialization error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Stable error kind names used in the single-line stderr summary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InputMissing,
    SchemaConflict,
    DisclosureRisk,
    NumericallyDegenerate,
    NondeterministicBackend,
    Config,
    InvalidInput,
    Io,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InputMissing => "InputMissing",
            ErrorKind::SchemaConflict => "SchemaConflict",
            ErrorKind::DisclosureRisk => "DisclosureRisk",
            ErrorKind::NumericallyDegenerate => "NumericallyDegenerate",
            ErrorKind::NondeterministicBackend => "NondeterministicBackend",
            ErrorKind::Config => "ConfigError",
            ErrorKind::InvalidInput => "InvalidInput",
            ErrorKind::Io => "IoError",
        }
    }

    /// Process exit code for a fatal error of this kind
    pub fn exit_code(self) -> u8 {
        match self {
            ErrorKind::SchemaConflict => 2,
            ErrorKind::DisclosureRisk => 3,
            ErrorKind::InputMissing => 4,
            ErrorKind::NondeterministicBackend => 5,
            _ => 1,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InputMissing(_) => ErrorKind::InputMissing,
            Error::SchemaConflict(_) => ErrorKind::SchemaConflict,
            Error::DisclosureRisk { .. } => ErrorKind::DisclosureRisk,
            Error::NumericallyDegenerate(_) => ErrorKind::NumericallyDegenerate,
            Error::NondeterministicBackend(_) => ErrorKind::NondeterministicBackend,
            Error::Config(_) => ErrorKind::Config,
            Error::InvalidInput(_) => ErrorKind::InvalidInput,
            Error::Io(_) | Error::Csv(_) | Error::Json(_) | Error::Yaml(_) | Error::Toml(_) => {
                ErrorKind::Io
            }
        }
    }

    /// Whether the error is recovered locally as a degenerate result row
    pub fn is_degenerate(&self) -> bool {
        matches!(self, Error::NumericallyDegenerate(_))
    }
}
