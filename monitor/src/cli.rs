//! Command-line interface definitions for the monitor.

use clap::{Parser, ValueEnum};

use crate::ingest::DiscoveryTarget;

/// Top-level command-line interface definition.
#[derive(Debug, Parser)]
#[command(name = "hostwatch")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = env!("CARGO_PKG_DESCRIPTION"))]
pub struct Cli {
    /// Subnet to watch, as `a.b.c.d/len` or a bare address
    pub target: DiscoveryTarget,

    /// Raise the log level (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Path to the configuration file
    #[arg(short, long)]
    pub config: Option<String>,

    #[arg(long, value_enum, default_value_t = LogFormat::Compact)]
    pub log_format: LogFormat,

    /// Optional override for the host database path (overrides db.path in config)
    #[arg(long)]
    pub db: Option<String>,

    /// Optional override for the broker address (overrides broker.host/port in config)
    #[arg(long, value_name = "HOST[:PORT]", value_parser = parse_broker)]
    pub broker: Option<BrokerAddr>,
}

impl Cli {
    /// Default log filter derived from `-v`.
    #[must_use]
    pub const fn default_log_level(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Compact,
    Json,
    Pretty,
}

/// Broker address given on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddr {
    pub host: String,
    pub port: Option<u16>,
}

fn parse_broker(raw: &str) -> Result<BrokerAddr, String> {
    // Bracketed IPv6, e.g. `[::1]:1883`.
    if let Some(rest) = raw.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| format!("unterminated '[' in {raw:?}"))?;
        let port = match tail {
            "" => None,
            _ => Some(parse_port(tail.strip_prefix(':').unwrap_or(tail))?),
        };
        return Ok(BrokerAddr {
            host: host.to_string(),
            port,
        });
    }

    match raw.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => Ok(BrokerAddr {
            host: non_empty(host)?,
            port: Some(parse_port(port)?),
        }),
        _ => Ok(BrokerAddr {
            host: non_empty(raw)?,
            port: None,
        }),
    }
}

fn parse_port(raw: &str) -> Result<u16, String> {
    raw.parse()
        .map_err(|_| format!("invalid broker port {raw:?}"))
}

fn non_empty(host: &str) -> Result<String, String> {
    if host.is_empty() {
        Err("broker host must not be empty".to_string())
    } else {
        Ok(host.to_string())
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory as _;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_full_invocation() {
        let cli = Cli::try_parse_from([
            "hostwatch",
            "-vv",
            "--config",
            "monitor.toml",
            "--log-format",
            "json",
            "--db",
            "/tmp/hosts.db",
            "--broker",
            "mqtt.lan:1884",
            "192.168.1.0/24",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.default_log_level(), "trace");
        assert_eq!(cli.config.as_deref(), Some("monitor.toml"));
        assert_eq!(cli.log_format, LogFormat::Json);
        assert_eq!(cli.db.as_deref(), Some("/tmp/hosts.db"));
        assert_eq!(
            cli.broker,
            Some(BrokerAddr {
                host: "mqtt.lan".to_string(),
                port: Some(1884)
            })
        );
        assert_eq!(cli.target.resolve(24), "192.168.1.0/24");
    }

    #[test]
    fn defaults() {
        let cli = Cli::try_parse_from(["hostwatch", "10.0.0.1"]).unwrap();
        assert_eq!(cli.default_log_level(), "info");
        assert_eq!(cli.log_format, LogFormat::Compact);
        assert!(cli.broker.is_none(), "no broker override by default");
        assert_eq!(cli.target.resolve(24), "10.0.0.1/24");
    }

    #[test]
    fn target_is_required_and_validated() {
        assert!(Cli::try_parse_from(["hostwatch"]).is_err());
        assert!(Cli::try_parse_from(["hostwatch", "10.0.0.0/33"]).is_err());
    }

    #[test]
    fn broker_address_forms() {
        assert_eq!(
            parse_broker("broker").unwrap(),
            BrokerAddr {
                host: "broker".to_string(),
                port: None
            }
        );
        assert_eq!(
            parse_broker("[::1]:1883").unwrap(),
            BrokerAddr {
                host: "::1".to_string(),
                port: Some(1883)
            }
        );
        assert_eq!(parse_broker("fd00::1").unwrap().port, None);
        assert!(parse_broker("broker:notaport").is_err());
        assert!(parse_broker(":1883").is_err());
    }
}
