//! Shared command-line surface
//!
//! Every stage binary flattens [`CommonArgs`] into its own `Args` and adds
//! role-specific `--input`/`--output` flags. The effective seed (command line
//! over configuration) is what the regeneration command echoes.

use crate::config::RunConfig;
use crate::{Error, Result};
use clap::Args;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// Arguments shared by every stage binary
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Run configuration (YAML or TOML)
    #[arg(short, long, default_value = "config/run.yaml", env = "CBP_CONFIG")]
    pub config: PathBuf,

    /// Seed override (takes precedence over the configuration file)
    #[arg(short, long)]
    pub seed: Option<u64>,

    /// Output root override (where analysis/, tables/, qc/, artifacts/ and data/ land)
    #[arg(long)]
    pub output_root: Option<PathBuf>,
}

impl CommonArgs {
    /// Load the configuration and apply command-line overrides
    pub fn load_config(&self) -> Result<RunConfig> {
        Ok(RunConfig::load(&self.config)?
            .with_seed_override(self.seed)
            .with_path_override("output_root", self.output_root.clone()))
    }
}

/// Full regeneration command for a component
///
/// `extra` holds role-specific flags already rendered as `--flag value`. The
/// seed is omitted only when it is not yet known (configuration failed to
/// load).
pub fn regeneration_command(
    component: &str,
    config: &Path,
    seed: Option<u64>,
    extra: &[String],
) -> String {
    let mut parts = vec![
        component.to_string(),
        "--config".to_string(),
        quote(&config.display().to_string()),
    ];
    if let Some(seed) = seed {
        parts.push("--seed".to_string());
        parts.push(seed.to_string());
    }
    parts.extend(extra.iter().cloned());
    parts.join(" ")
}

/// Render an optional path flag for the regeneration command
pub fn path_flag(flag: &str, path: Option<&PathBuf>) -> Vec<String> {
    match path {
        Some(p) => vec![format!("--{}", flag), quote(&p.display().to_string())],
        None => Vec::new(),
    }
}

fn quote(s: &str) -> String {
    if s.chars().any(|c| c.is_whitespace() || c == '\'' || c == '"') {
        format!("'{}'", s.replace('\'', "'\\''"))
    } else {
        s.to_string()
    }
}

/// Kind and exit code of a fatal error surfaced through `anyhow`
pub fn classify(err: &anyhow::Error) -> (String, u8) {
    match err.downcast_ref::<Error>() {
        Some(e) => (e.kind().as_str().to_string(), e.kind().exit_code()),
        None => ("Error".to_string(), 1),
    }
}

/// Print the single-line stderr summary and produce the exit code
pub fn report_fatal(component: &str, err: &anyhow::Error, command: &str) -> ExitCode {
    let (kind, code) = classify(err);
    tracing::error!(component, kind = %kind, "Fatal: {:#}", err);
    eprintln!("{} failed [{}]: {:#} | regenerate: {}", component, kind, err, command);
    ExitCode::from(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser, Debug)]
    struct TestArgs {
        #[command(flatten)]
        common: CommonArgs,

        #[arg(long)]
        input: Option<PathBuf>,
    }

    #[test]
    fn test_common_args_flatten() {
        let args = TestArgs::parse_from(["cbp-dv", "--config", "cfg.toml", "--seed", "9", "--input", "raw.csv"]);
        assert_eq!(args.common.config, PathBuf::from("cfg.toml"));
        assert_eq!(args.common.seed, Some(9));
        assert_eq!(args.input, Some(PathBuf::from("raw.csv")));
    }

    #[test]
    fn test_regeneration_command_quotes_spaces() {
        let cmd = regeneration_command(
            "cbp-mi",
            Path::new("my config/run.yaml"),
            Some(20251016),
            &path_flag("input", Some(&PathBuf::from("data/clean/derived.csv"))),
        );
        assert_eq!(
            cmd,
            "cbp-mi --config 'my config/run.yaml' --seed 20251016 --input data/clean/derived.csv"
        );
        assert_eq!(
            regeneration_command("cbp-dv", Path::new("run.yaml"), None, &[]),
            "cbp-dv --config run.yaml"
        );
    }

    #[test]
    fn test_classify_downcasts_harness_errors() {
        let err: anyhow::Error = Error::DisclosureRisk {
            table: "t".into(),
            row: 0,
            column: "count".into(),
            count: 2,
            threshold: 10,
        }
        .into();
        assert_eq!(classify(&err), ("DisclosureRisk".to_string(), 3));

        let err = anyhow::anyhow!("plain failure");
        assert_eq!(classify(&err), ("Error".to_string(), 1));
    }
}
