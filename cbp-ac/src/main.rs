//! cbp-ac - Analysis & Multiplicity Controller
//!
//! Usage: `cbp-ac --config config/run.yaml [--seed N] [--input derived.csv]
//! [--registry hypotheses.csv] [--output DIR]`

use cbp_common::cli::{path_flag, regeneration_command, report_fatal, CommonArgs};
use cbp_common::logging::{init_tracing, log_build_info};
use cbp_common::RunConfig;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;

/// Command-line arguments for cbp-ac
#[derive(Parser, Debug)]
#[command(name = "cbp-ac")]
#[command(about = "Model fitting, sensitivity passes and BH control for the childhoodbalancedpublic harness")]
#[command(version)]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Derived dataset (defaults to <output-root>/data/clean/derived.csv)
    #[arg(long)]
    input: Option<PathBuf>,

    /// Hypothesis registry (overrides paths.registry)
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
        extra.extend(path_flag("registry", self.registry.as_ref()));
        extra.extend(path_flag("output-root", self.output_root().as_ref()));
        regeneration_command(cbp_ac::COMPONENT, &self.common.config, seed, &extra)
    }

    fn load_config(&self) -> cbp_common::Result<RunConfig> {
        Ok(self
            .common
            .load_config()?
            .with_path_override("derived_data", self.input.clone())
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
            return report_fatal(cbp_ac::COMPONENT, &anyhow::Error::from(e), &args.command(args.common.seed));
        }
    };
    init_tracing(&config.logging.level);
    log_build_info(cbp_ac::COMPONENT, env!("CARGO_PKG_VERSION"));

    let command = args.command(Some(config.seed()));
    match cbp_ac::run(&config, &command) {
        Ok(outcome) => {
            let in_scope: usize = outcome.scopes.iter().map(|s| s.ids.len()).sum();
            info!(
                rows = outcome.rows.len(),
                in_scope,
                warnings = outcome.warnings.len(),
                "Controller stage complete"
            );
            ExitCode::SUCCESS
        }
        Err(e) => report_fatal(cbp_ac::COMPONENT, &anyhow::Error::from(e), &command),
    }
}
