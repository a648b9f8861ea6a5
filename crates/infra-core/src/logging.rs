//! Tracing bootstrap for binaries and tests embedding the engine

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

/// Default directives applied on top of `RUST_LOG`
pub const DEFAULT_DIRECTIVES: &[&str] = &[
    "infra_core=info",
    "infra_http=info",
    "infra_state=info",
    "infra_plugins=info",
];

/// Build the filter from `RUST_LOG` plus extra directives
pub fn build_filter(directives: &[&str]) -> Result<EnvFilter> {
    let mut filter = EnvFilter::from_default_env();
    for directive in directives {
        filter = filter.add_directive(
            directive
                .parse()
                .with_context(|| format!("Invalid tracing directive '{}'", directive))?,
        );
    }
    Ok(filter)
}

/// Install a global fmt subscriber.
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing(directives: &[&str]) -> Result<()> {
    let filter = build_filter(directives)?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))
}

/// Same as [`init_tracing`] but emitting JSON lines
pub fn init_json_tracing(directives: &[&str]) -> Result<()> {
    let filter = build_filter(directives)?;
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))
}
