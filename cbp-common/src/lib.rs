//! # CBP Common Library
//!
//! Shared code for every stage of the childhoodbalancedpublic analysis harness:
//! - Run configuration and the seed service
//! - Error kinds and exit-code mapping
//! - Dataset (wide CSV) reading and writing
//! - Codebook, design manifest and hypothesis registry models
//! - Missing-value semantics
//! - Small-cell suppression at the artifact boundary
//! - Artifact writing (atomic, content-addressed, `.partial` flush)
//! - Descriptive statistics and small dense linear algebra

pub mod artifacts;
pub mod cli;
pub mod codebook;
pub mod config;
pub mod dataset;
pub mod design;
pub mod error;
pub mod linalg;
pub mod logging;
pub mod missing;
pub mod registry;
pub mod seed;
pub mod stats;
pub mod suppression;

pub use config::RunConfig;
pub use error::{Error, ErrorKind, Result};
pub use seed::SeedService;
