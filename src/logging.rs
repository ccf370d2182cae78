//! Tracing subscriber setup for the CLI.

use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

use difftest_core::config::parse_verbosity;

/// Build the filter: `RUST_LOG` when it parses, else the configured level.
pub fn env_filter(verbosity: &str) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let level = parse_verbosity(verbosity)?;
    Ok(EnvFilter::new(level.as_str().to_ascii_lowercase()))
}

/// Install the global fmt subscriber, writing to stderr so stdout stays
/// free for command output. Call once per process.
pub fn init(verbosity: &str) -> Result<()> {
    let filter = env_filter(verbosity)?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("failed to install tracing subscriber: {e}"))
}
