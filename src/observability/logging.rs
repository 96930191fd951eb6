//! # Logging
//!
//! Tracing subscriber setup. Logs always go to stderr; stdout carries the
//! progress lines of the run.

use crate::config::ProvisionerConfig;
use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

/// Output format of the log subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    /// `json` (any case) selects JSON; anything else is text
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Text
        }
    }
}

/// Filter from `RUST_LOG` when set, else `k8s_secret=<level>` with the noisy
/// client crates capped at `warn`
pub fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = level.trim().to_ascii_lowercase();
        EnvFilter::new(format!(
            "warn,k8s_secret={level},kube=warn,hyper=warn,rustls=warn"
        ))
    })
}

/// Install the global subscriber for `config.log_level` / `config.log_format`
pub fn init_tracing(config: &ProvisionerConfig) -> Result<()> {
    let filter = env_filter(&config.log_level);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);

    let result = match LogFormat::parse(&config.log_format) {
        LogFormat::Json => builder.json().with_current_span(true).try_init(),
        LogFormat::Text => builder.try_init(),
    };
    result.map_err(|e| anyhow!("Failed to initialize tracing subscriber: {e}"))
}
