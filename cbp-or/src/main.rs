//! cbp-or - Orchestrator + Reporter
//!
//! Usage: `cbp-or --config config/run.yaml [--seed N] [--output-root DIR]`

use cbp_common::cli::{path_flag, regeneration_command, report_fatal, CommonArgs};
use cbp_common::logging::{init_tracing, log_build_info};
use cbp_or::pipeline::Invocation;
use clap::Parser;
use std::process::ExitCode;
use tracing::info;

/// Command-line arguments for cbp-or
#[derive(Parser, Debug)]
#[command(name = "cbp-or")]
#[command(about = "Run every stage of the childhoodbalancedpublic harness in order")]
#[command(version)]
struct Args {
    #[command(flatten)]
    common: CommonArgs,
}

impl Args {
    fn command(&self, seed: Option<u64>) -> String {
        regeneration_command(
            cbp_or::COMPONENT,
            &self.common.config,
            seed,
            &path_flag("output-root", self.common.output_root.as_ref()),
        )
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config = match args.common.load_config() {
        Ok(config) => config,
        Err(e) => {
            init_tracing("info");
            return report_fatal(cbp_or::COMPONENT, &anyhow::Error::from(e), &args.command(args.common.seed));
        }
    };
    init_tracing(&config.logging.level);
    log_build_info(cbp_or::COMPONENT, env!("CARGO_PKG_VERSION"));

    let command = args.command(Some(config.seed()));
    let invocation = Invocation {
        config_path: args.common.config.clone(),
        seed: config.seed(),
        output_root: args.common.output_root.clone(),
    };
    match cbp_or::run(&config, &invocation, &command) {
        Ok(run) => match run.failure {
            None => {
                info!(warnings = run.warning_count(), "All stages complete");
                ExitCode::SUCCESS
            }
            Some(failure) => report_fatal(
                failure.stage.component(),
                &anyhow::Error::from(failure.error),
                &failure.command,
            ),
        },
        Err(e) => report_fatal(cbp_or::COMPONENT, &anyhow::Error::from(e), &command),
    }
}
