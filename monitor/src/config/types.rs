//! Configuration data types for the monitor.
//!
//! Every table and field has a default, so an empty file (or no file) is a valid configuration.

use core::time::Duration;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Root of the TOML configuration file.
#[derive(Debug, Deserialize, Default, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorConfig {
    pub monitor: QueueConfig,
    pub probe: ProbeConfig,
    pub feed: FeedConfig,
    pub broker: BrokerConfig,
    pub db: DbConfig,
}

/// Notification queue and detector settings (`[monitor]`).
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
    /// Maximum number of pending notifications.
    pub queue_capacity: usize,
    /// How long the notifier waits on an empty queue before re-checking.
    pub idle_poll_ms: u64,
    /// `notify` flag stored for newly discovered hosts.
    pub default_notify: bool,
}

impl QueueConfig {
    #[must_use]
    pub const fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 10,
            idle_poll_ms: 1000,
            default_notify: false,
        }
    }
}

/// Active prober timeouts (`[probe]`).
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ProbeConfig {
    pub connect_timeout_ms: u64,
    /// First echo attempt.
    pub echo_timeout_short_ms: u64,
    /// Retry after a missed first echo.
    pub echo_timeout_long_ms: u64,
    pub ping_command: String,
}

impl ProbeConfig {
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    #[must_use]
    pub const fn echo_timeout_short(&self) -> Duration {
        Duration::from_millis(self.echo_timeout_short_ms)
    }

    #[must_use]
    pub const fn echo_timeout_long(&self) -> Duration {
        Duration::from_millis(self.echo_timeout_long_ms)
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 500,
            echo_timeout_short_ms: 1000,
            echo_timeout_long_ms: 2000,
            ping_command: "ping".to_string(),
        }
    }
}

/// Discovery feed process (`[feed]`).
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct FeedConfig {
    /// Program and arguments; `{target}` is replaced by the resolved subnet.
    pub command: Vec<String>,
    /// Prefix length appended to a target given as a bare address.
    pub default_prefix_len: u8,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            command: ["fing", "--silent", "{target}", "-o", "log,csv"]
                .map(str::to_string)
                .to_vec(),
            default_prefix_len: 24,
        }
    }
}

/// MQTT broker connection (`[broker]`).
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    /// Topics are `<topic_prefix>/<host-label>/<field>`.
    pub topic_prefix: String,
    pub connect_timeout_ms: u64,
    pub keep_alive_secs: u16,
    /// Also publish the whole event as JSON under `<topic_prefix>/<host-label>/event`.
    pub json_summary: bool,
}

impl BrokerConfig {
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            client_id: "hostwatch".to_string(),
            topic_prefix: "/test/monitor".to_string(),
            connect_timeout_ms: 5000,
            keep_alive_secs: 60,
            json_summary: false,
        }
    }
}

/// `SQLite` host table (`[db]`).
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct DbConfig {
    /// Relative paths are resolved against the config file's directory.
    pub path: String,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: "./hostwatch.db".to_string(),
        }
    }
}

/// Resolves `path` against the directory containing `config_path` unless it is absolute.
#[must_use]
pub fn resolve_config_relative_path(config_path: Option<&Path>, path: &str) -> PathBuf {
    let candidate = Path::new(path);
    match config_path.and_then(Path::parent) {
        Some(dir) if candidate.is_relative() => dir.join(candidate),
        _ => candidate.to_path_buf(),
    }
}
