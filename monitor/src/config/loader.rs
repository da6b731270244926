//! Configuration loading utilities for the monitor.

use std::path::Path;

use eyre::WrapErr as _;
use tokio::fs;

use crate::config::MonitorConfig;

/// Reads, parses and validates the monitor config from a TOML file.
///
/// # Errors
///
/// Returns an error if the config file cannot be read, parsed or fails validation.
pub async fn load<P: AsRef<Path>>(path: P) -> eyre::Result<MonitorConfig> {
    let path_ref = path.as_ref();
    let content = fs::read_to_string(path_ref).await.wrap_err(format!(
        "Failed to read config file at: {}",
        path_ref.display()
    ))?;
    let config: MonitorConfig = toml::from_str(&content).wrap_err(format!(
        "Failed to parse config as TOML at: {}",
        path_ref.display()
    ))?;
    validate(&config).wrap_err(format!("Invalid config at: {}", path_ref.display()))?;
    Ok(config)
}

/// Checks cross-field constraints that serde cannot express.
///
/// # Errors
///
/// Returns an error describing the first violated constraint.
pub fn validate(config: &MonitorConfig) -> eyre::Result<()> {
    eyre::ensure!(
        config.monitor.queue_capacity >= 1,
        "monitor.queue_capacity must be at least 1"
    );
    eyre::ensure!(
        config.probe.echo_timeout_long_ms >= config.probe.echo_timeout_short_ms,
        "probe.echo_timeout_long_ms must not be shorter than probe.echo_timeout_short_ms"
    );
    eyre::ensure!(
        !config.feed.command.is_empty(),
        "feed.command must name a program"
    );
    eyre::ensure!(
        !config.broker.client_id.is_empty() && !config.broker.client_id.starts_with(' '),
        "broker.client_id must be non-empty and must not start with a space"
    );
    Ok(())
}
