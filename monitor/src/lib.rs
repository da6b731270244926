//! Library entry for the host-presence monitor.
//!
//! Exposes `inner_main` so a workspace-level shim binary can call into the monitor logic.
//!
//! The monitor reads a discovery feed, keeps per-host state in `SQLite`, confirms transitions
//! with an active probe and publishes confirmed changes to an MQTT broker.
#![cfg_attr(
    test,
    expect(clippy::indexing_slicing, reason = "This is not problematic in tests",)
)]

extern crate alloc;
extern crate core;

pub mod cli;
pub mod config;
pub mod detector;
pub mod ingest;
pub mod model;
pub mod notifier;
pub mod probe;
pub mod queue;
pub mod run;
pub mod shutdown;
pub mod store;

use std::path::{self, Path};
use std::sync::Once;
use std::{fs, process};

use eyre::{Result, WrapErr as _};
use tracing::{Instrument as _, info};
use tracing_subscriber::{EnvFilter, fmt::time::ChronoLocal};

use cli::{Cli, LogFormat};
use config::MonitorConfig;
use run::{FeedEnd, Monitor};

static INIT_TRACING: Once = Once::new();

/// The monitor's main function; can be called from a shim binary.
///
/// Loads configuration, opens the host database and runs until a termination signal arrives
/// or the discovery feed ends.
///
/// # Errors
///
/// Returns an error if configuration cannot be loaded, the database cannot be opened or the
/// discovery feed cannot be started.
pub async fn inner_main(invocation: Cli) -> Result<()> {
    let default_level = invocation.default_log_level();
    let log_format = invocation.log_format;
    INIT_TRACING.call_once(move || {
        let builder = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
            )
            .with_timer(ChronoLocal::rfc_3339());

        match log_format {
            LogFormat::Compact => builder.compact().init(),
            LogFormat::Json => builder.json().init(),
            LogFormat::Pretty => builder.pretty().init(),
        }
    });

    let config_path = invocation
        .config
        .as_deref()
        .map(|config| {
            fs::canonicalize(config).wrap_err(format!("Config file not found at: {config}"))
        })
        .transpose()?;

    let startup_span = tracing::info_span!(
        "monitor.startup",
        ?config_path,
        pid = ?process::id(),
        version = env!("CARGO_PKG_VERSION")
    );

    let monitor = async {
        let config = load_config(config_path.as_deref(), &invocation).await?;
        info!("Starting monitor");
        Monitor::from_config(&config, config_path.as_deref()).await
    }
    .instrument(startup_span)
    .await?;

    match monitor.run(invocation.target).await? {
        FeedEnd::Shutdown => info!("Stopped on request"),
        FeedEnd::Closed | FeedEnd::Failed => info!("Stopped after the discovery feed ended"),
    }
    Ok(())
}

/// Reads the configuration file (if any) and applies command-line overrides.
async fn load_config(config_path: Option<&Path>, invocation: &Cli) -> Result<MonitorConfig> {
    let mut config = match config_path {
        Some(path) => config::load(path).await?,
        None => MonitorConfig::default(),
    };

    if let Some(ref db) = invocation.db {
        // Relative to the working directory, not the config file.
        let db = path::absolute(db).wrap_err(format!("Invalid database path: {db}"))?;
        config.db.path = db.display().to_string();
    }
    if let Some(ref broker) = invocation.broker {
        config.broker.host.clone_from(&broker.host);
        if let Some(port) = broker.port {
            config.broker.port = port;
        }
    }
    Ok(config)
}
