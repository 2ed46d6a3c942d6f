//! Tracing initialization, build identification and the warning ledger

use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Build identification captured by `build.rs`
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BuildInfo {
    pub git_hash: &'static str,
    pub timestamp: &'static str,
    pub profile: &'static str,
    pub rustc: &'static str,
}

pub const BUILD_INFO: BuildInfo = BuildInfo {
    git_hash: env!("GIT_HASH"),
    timestamp: env!("BUILD_TIMESTAMP"),
    profile: env!("BUILD_PROFILE"),
    rustc: env!("RUSTC_VERSION"),
};

/// Install the global subscriber; `RUST_LOG` wins over `default_level`
///
/// Output goes to stderr so stdout stays machine-readable. A second call is a
/// no-op (the orchestrator initializes once, then runs every stage).
pub fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Log the startup banner for a binary
pub fn log_build_info(component: &str, version: &str) {
    info!("Starting {} (version {})", component, version);
    info!(
        "Build: {} [{}] built {} with {}",
        BUILD_INFO.git_hash, BUILD_INFO.profile, BUILD_INFO.timestamp, BUILD_INFO.rustc
    );
}

/// Warnings that must reach a QC report as well as the log
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Warnings {
    items: Vec<String>,
}

impl Warnings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log and record a warning
    pub fn push(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("{}", message);
        self.items.push(message);
    }

    /// Record warnings that were already logged elsewhere
    pub fn extend(&mut self, messages: impl IntoIterator<Item = String>) {
        self.items.extend(messages);
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.items
    }

    /// Markdown bullet list, or an explicit "none" line
    pub fn to_markdown(&self) -> String {
        if self.items.is_empty() {
            return "- none\n".to_string();
        }
        self.items.iter().map(|w| format!("- {}\n", w)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warnings_render_as_list() {
        let mut warnings = Warnings::new();
        assert_eq!(warnings.to_markdown(), "- none\n");
        warnings.push("column 'x' dropped");
        warnings.extend(vec!["variable 'y' unused".to_string()]);
        assert_eq!(warnings.len(), 2);
        assert_eq!(warnings.to_markdown(), "- column 'x' dropped\n- variable 'y' unused\n");
    }

    #[test]
    fn test_build_info_is_populated() {
        assert!(!BUILD_INFO.git_hash.is_empty());
        assert!(!BUILD_INFO.profile.is_empty());
    }

    #[test]
    fn test_init_tracing_twice_is_harmless() {
        init_tracing("warn");
        init_tracing("debug");
    }
}
