//! Tracing subscriber setup.
//!
//! Logs go to stderr so they never mix with command output. `RUST_LOG`
//! overrides the configured level.

use crate::config::LogFormat;
use anyhow::Result;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber. Calling it twice is an error.
pub fn init_tracing(level: &str, format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter_directive(level)))
        .map_err(|e| anyhow::anyhow!("Invalid log level '{}': {}", level, e))?;

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Compact => registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
    }
    .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))
}

/// Scope the level to this crate and keep dependencies at warn.
fn filter_directive(level: &str) -> String {
    format!("warn,backforge={level}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directive_scopes_level_to_crate() {
        assert_eq!(filter_directive("debug"), "warn,backforge=debug");
    }
}
