//! cbp-md - Missingness & Derivation Engine
//!
//! Usage: `cbp-md --config config/run.yaml [--seed N] [--input raw.csv]
//! [--codebook codebook.json] [--registry registry.csv] [--output DIR]`

use cbp_common::cli::{path_flag, regeneration_command, report_fatal, CommonArgs};
use cbp_common::logging::{init_tracing, log_build_info};
use cbp_common::RunConfig;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;

/// Command-line arguments for cbp-md
#[derive(Parser, Debug)]
#[command(name = "cbp-md")]
#[command(about = "Missingness profiling and derivations for the childhoodbalancedpublic harness")]
#[command(version)]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Raw dataset (overrides paths.raw_data)
    #[arg(long)]
    input: Option<PathBuf>,

    /// Codebook JSON (overrides paths.codebook)
    #[arg(long)]
    codebook: Option<PathBuf>,

    /// Hypothesis registry CSV (overrides paths.registry)
    #[arg(long)]
    registry: Option<PathBuf>,

    /// Output root (alias of --output-root)
    #[arg(long)]
    output: Option<PathBuf>,
}

impl Args {
    fn output_root(&self) -> Option<PathBuf> {
        self.output.clone().or_else(|| self.common.output_root.clone())
    }

    fn command(&self, seed: Option<u64>) -> String {
        let mut extra = path_flag("input", self.input.as_ref());
        extra.extend(path_flag("codebook", self.codebook.as_ref()));
        extra.extend(path_flag("registry", self.registry.as_ref()));
        extra.extend(path_flag("output-root", self.output_root().as_ref()));
        regeneration_command(cbp_md::COMPONENT, &self.common.config, seed, &extra)
    }

    fn load_config(&self) -> cbp_common::Result<RunConfig> {
        Ok(self
            .common
            .load_config()?
            .with_path_override("raw_data", self.input.clone())
            .with_path_override("codebook", self.codebook.clone())
            .with_path_override("registry", self.registry.clone())
            .with_path_override("output_root", self.output.clone()))
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config = match args.load_config() {
        Ok(config) => config,
        Err(e) => {
            init_tracing("info");
            return report_fatal(cbp_md::COMPONENT, &anyhow::Error::from(e), &args.command(args.common.seed));
        }
    };
    init_tracing(&config.logging.level);
    log_build_info(cbp_md::COMPONENT, env!("CARGO_PKG_VERSION"));

    let command = args.command(Some(config.seed()));
    match cbp_md::run(&config, &command) {
        Ok(outcome) => {
            info!(
                key_vars = outcome.key_vars.len(),
                derived = outcome.derivations.len(),
                warnings = outcome.warnings.len(),
                "Missingness stage complete"
            );
            ExitCode::SUCCESS
        }
        Err(e) => report_fatal(cbp_md::COMPONENT, &anyhow::Error::from(e), &command),
    }
}
