//! cbp-dv - Codebook & Design Validator
//!
//! Usage: `cbp-dv --config config/run.yaml [--seed N] [--input raw.csv]
//! [--codebook codebook.json] [--design design.yaml]`

use cbp_common::cli::{path_flag, regeneration_command, report_fatal, CommonArgs};
use cbp_common::logging::{init_tracing, log_build_info};
use cbp_common::RunConfig;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;

/// Command-line arguments for cbp-dv
#[derive(Parser, Debug)]
#[command(name = "cbp-dv")]
#[command(about = "Codebook & design validator for the childhoodbalancedpublic harness")]
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

    /// Design YAML (overrides paths.design)
    #[arg(long)]
    design: Option<PathBuf>,
}

impl Args {
    fn command(&self, seed: Option<u64>) -> String {
        let mut extra = path_flag("input", self.input.as_ref());
        extra.extend(path_flag("codebook", self.codebook.as_ref()));
        extra.extend(path_flag("design", self.design.as_ref()));
        extra.extend(path_flag("output-root", self.common.output_root.as_ref()));
        regeneration_command(cbp_dv::COMPONENT, &self.common.config, seed, &extra)
    }

    fn load_config(&self) -> cbp_common::Result<RunConfig> {
        Ok(self
            .common
            .load_config()?
            .with_path_override("raw_data", self.input.clone())
            .with_path_override("codebook", self.codebook.clone())
            .with_path_override("design", self.design.clone()))
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config = match args.load_config() {
        Ok(config) => config,
        Err(e) => {
            init_tracing("info");
            return report_fatal(cbp_dv::COMPONENT, &anyhow::Error::from(e), &args.command(args.common.seed));
        }
    };
    init_tracing(&config.logging.level);
    log_build_info(cbp_dv::COMPONENT, env!("CARGO_PKG_VERSION"));

    let command = args.command(Some(config.seed()));
    match cbp_dv::run(&config, &command) {
        Ok(outcome) => {
            info!(
                design = %outcome.manifest.design,
                warnings = outcome.warnings.len(),
                "Validation complete"
            );
            ExitCode::SUCCESS
        }
        Err(e) => report_fatal(cbp_dv::COMPONENT, &anyhow::Error::from(e), &command),
    }
}
