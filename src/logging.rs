//! Structured logging setup
//!
//! Installs the global `tracing` subscriber from [`LoggingConfig`]. `RUST_LOG`
//! still wins over the configured level when it is set.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Build the env filter: `RUST_LOG` if present, otherwise `level`.
pub fn build_filter(level: Level) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy()
}

/// Install the global subscriber.
///
/// # Arguments
///
/// * `config` - Logging section of the loaded configuration
/// * `verbose` - Forces `debug` regardless of the configured level
pub fn init(config: &LoggingConfig, verbose: bool) -> Result<()> {
    let level = if verbose {
        Level::DEBUG
    } else {
        config
            .level
            .to_lowercase()
            .parse()
            .map_err(|e| anyhow::anyhow!("Failed to parse log level: {}", e))?
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(build_filter(level))
        .with_target(true);

    // Logs go to stderr so that `nser run` can stream tool output on stdout.
    let result = match (&config.log_file, config.format.to_lowercase().as_str()) {
        (Some(path), format) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path))?;
            let builder = builder.with_writer(Mutex::new(file)).with_ansi(false);
            match format {
                "json" => builder.json().try_init(),
                "pretty" => builder.pretty().try_init(),
                _ => builder.compact().try_init(),
            }
        }
        (None, "json") => builder.json().with_writer(std::io::stderr).try_init(),
        (None, "pretty") => builder.pretty().with_writer(std::io::stderr).try_init(),
        (None, _) => builder.compact().with_writer(std::io::stderr).try_init(),
    };

    result.map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))
}
