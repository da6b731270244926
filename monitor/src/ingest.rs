//! Scan ingestion: turning the discovery feed's output into [`Observation`]s.
//!
//! The feed is an external process (by default `fing`) printing one
//! semicolon-delimited record per sighting:
//! `timestamp;state;ip_address;unclassified;name;mac_address;vendor`.

use core::{net::IpAddr, str::FromStr};
use std::process::Stdio;

use eyre::WrapErr as _;
use thiserror::Error as ThisError;
use tokio::{
    io::{BufReader, Lines},
    process::{Child, ChildStdout, Command},
};
use tracing::info;

use crate::model::{HostState, Observation};

/// Number of `;`-separated fields in a discovery record.
pub const FIELD_COUNT: usize = 7;

/// Placeholder in the configured feed command replaced by the resolved target.
pub const TARGET_PLACEHOLDER: &str = "{target}";

/// Reasons a non-blank feed line is rejected.
#[derive(Debug, ThisError, PartialEq, Eq)]
pub enum ParseError {
    #[error("expected {FIELD_COUNT} fields, found {0}")]
    FieldCount(usize),
    #[error("invalid observed state '{0}'")]
    State(String),
    #[error("invalid ip address '{0}'")]
    Address(String),
}

/// Parses a single feed line.
///
/// Blank lines yield `Ok(None)`; every other line yields exactly one observation or an error.
///
/// # Errors
///
/// Returns a [`ParseError`] when the line does not have the expected shape.
pub fn parse_line(line: &str) -> Result<Option<Observation>, ParseError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Ok(None);
    }

    let fields: Vec<&str> = line.split(';').collect();
    let &[timestamp, state, ip, unclassified, name, mac, vendor] = fields.as_slice() else {
        return Err(ParseError::FieldCount(fields.len()));
    };

    let observed_state = match state.parse::<HostState>() {
        Ok(s @ (HostState::Up | HostState::Down)) => s,
        _ => return Err(ParseError::State(state.to_string())),
    };

    let ip = ip.trim();
    if ip.parse::<IpAddr>().is_err() {
        return Err(ParseError::Address(ip.to_string()));
    }

    Ok(Some(Observation {
        timestamp: timestamp.trim().to_string(),
        observed_state,
        ip_address: ip.to_string(),
        unclassified: unclassified.to_string(),
        name: name.trim().to_string(),
        mac_address: mac.trim().to_ascii_lowercase(),
        vendor: vendor.trim().to_string(),
    }))
}

#[derive(Debug, ThisError, PartialEq, Eq)]
pub enum TargetError {
    #[error("invalid address '{0}'")]
    Address(String),
    #[error("invalid prefix length '{0}'")]
    Prefix(String),
}

/// The subnet handed to the discovery feed, e.g. `192.168.10.0/24`.
///
/// A bare address is accepted; the configured default prefix length is applied on resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryTarget {
    addr: IpAddr,
    prefix_len: Option<u8>,
}

impl DiscoveryTarget {
    /// Renders the target in CIDR form, filling in `default_prefix_len` when none was given.
    #[must_use]
    pub fn resolve(&self, default_prefix_len: u8) -> String {
        let max = max_prefix_len(self.addr);
        let len = self.prefix_len.unwrap_or(default_prefix_len).min(max);
        format!("{}/{len}", self.addr)
    }
}

const fn max_prefix_len(addr: IpAddr) -> u8 {
    match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

impl FromStr for DiscoveryTarget {
    type Err = TargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (addr_part, prefix_part) = match s.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (s, None),
        };
        let addr: IpAddr = addr_part
            .parse()
            .map_err(|_| TargetError::Address(addr_part.to_string()))?;
        let prefix_len = prefix_part
            .map(|p| {
                p.parse::<u8>()
                    .ok()
                    .filter(|&len| len <= max_prefix_len(addr))
                    .ok_or_else(|| TargetError::Prefix(p.to_string()))
            })
            .transpose()?;
        Ok(Self { addr, prefix_len })
    }
}

/// Line stream over the feed process's standard output.
pub type FeedLines = Lines<BufReader<ChildStdout>>;

/// Spawns the discovery feed process with `{target}` substituted in its arguments.
///
/// The child is killed when the returned handle is dropped.
///
/// # Errors
///
/// Returns an error if the command is empty or the process cannot be spawned.
pub fn spawn_feed(command: &[String], target: &str) -> eyre::Result<(Child, FeedLines)> {
    use tokio::io::AsyncBufReadExt as _;

    let args: Vec<String> = command
        .iter()
        .map(|arg| arg.replace(TARGET_PLACEHOLDER, target))
        .collect();
    let Some((program, rest)) = args.split_first() else {
        eyre::bail!("Discovery feed command is empty");
    };

    info!("Starting discovery feed: {}", args.join(" "));

    let mut child = Command::new(program)
        .args(rest)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .wrap_err(format!("Failed to spawn discovery feed '{program}'"))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| eyre::eyre!("Discovery feed stdout was not captured"))?;

    Ok((child, BufReader::new(stdout).lines()))
}
