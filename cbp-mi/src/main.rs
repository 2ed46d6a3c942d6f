//! cbp-mi - Multiple-Imputation Engine
//!
//! Usage: `cbp-mi --config config/run.yaml [--seed N] [--input derived.csv]
//! [-m M] [--burn-in B] [--backend chained|hot-deck] [--output DIR]`

use cbp_common::cli::{path_flag, regeneration_command, report_fatal, CommonArgs};
use cbp_common::config::ImputationBackend;
use cbp_common::logging::{init_tracing, log_build_info};
use cbp_common::RunConfig;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BackendArg {
    Chained,
    HotDeck,
}

impl From<BackendArg> for ImputationBackend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Chained => ImputationBackend::Chained,
            BackendArg::HotDeck => ImputationBackend::HotDeck,
        }
    }
}

/// Command-line arguments for cbp-mi
#[derive(Parser, Debug)]
#[command(name = "cbp-mi")]
#[command(about = "Multiple imputation for the childhoodbalancedpublic harness")]
#[command(version)]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Derived dataset (defaults to <output-root>/data/clean/derived.csv)
    #[arg(long)]
    input: Option<PathBuf>,

    /// Number of completed tables (overrides imputation.m)
    #[arg(short)]
    m: Option<usize>,

    /// Burn-in passes (overrides imputation.burn_in)
    #[arg(long)]
    burn_in: Option<usize>,

    /// Imputation back-end (overrides imputation.backend)
    #[arg(long, value_enum)]
    backend: Option<BackendArg>,

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
        if let Some(m) = self.m {
            extra.extend(["-m".to_string(), m.to_string()]);
        }
        if let Some(b) = self.burn_in {
            extra.extend(["--burn-in".to_string(), b.to_string()]);
        }
        if let Some(backend) = self.backend {
            let name = match backend {
                BackendArg::Chained => "chained",
                BackendArg::HotDeck => "hot-deck",
            };
            extra.extend(["--backend".to_string(), name.to_string()]);
        }
        extra.extend(path_flag("output-root", self.output_root().as_ref()));
        regeneration_command(cbp_mi::COMPONENT, &self.common.config, seed, &extra)
    }

    fn load_config(&self) -> cbp_common::Result<RunConfig> {
        let mut config = self
            .common
            .load_config()?
            .with_path_override("derived_data", self.input.clone())
            .with_path_override("output_root", self.output.clone());
        if let Some(m) = self.m {
            if m < 1 {
                return Err(cbp_common::Error::Config("-m must be >= 1".to_string()));
            }
            config.imputation.m = m;
        }
        if let Some(b) = self.burn_in {
            config.imputation.burn_in = b;
        }
        if let Some(backend) = self.backend {
            config.imputation.backend = backend.into();
        }
        Ok(config)
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config = match args.load_config() {
        Ok(config) => config,
        Err(e) => {
            init_tracing("info");
            return report_fatal(cbp_mi::COMPONENT, &anyhow::Error::from(e), &args.command(args.common.seed));
        }
    };
    init_tracing(&config.logging.level);
    log_build_info(cbp_mi::COMPONENT, env!("CARGO_PKG_VERSION"));

    let command = args.command(Some(config.seed()));
    match cbp_mi::run(&config, &command) {
        Ok(outcome) => {
            info!(
                backend = outcome.manifest.backend.as_str(),
                m = outcome.manifest.m,
                columns = outcome.manifest.columns.len(),
                "Imputation stage complete"
            );
            ExitCode::SUCCESS
        }
        Err(e) => report_fatal(cbp_mi::COMPONENT, &anyhow::Error::from(e), &command),
    }
}
