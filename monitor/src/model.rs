//! Core data types shared by the ingest, detection and notification stages.

use core::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

/// Reachability state of a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostState {
    Up,
    Down,
    Unknown,
}

impl HostState {
    /// Lowercase wire/database form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::Unknown => "unknown",
        }
    }

    /// Decodes a persisted state, treating anything unrecognised as [`HostState::Unknown`].
    #[must_use]
    pub fn from_stored(raw: &str) -> Self {
        raw.parse().unwrap_or(Self::Unknown)
    }
}

impl fmt::Display for HostState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, ThisError, PartialEq, Eq)]
#[error("unrecognised host state '{0}'")]
pub struct UnknownStateError(pub String);

impl FromStr for HostState {
    type Err = UnknownStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "up" => Ok(Self::Up),
            "down" => Ok(Self::Down),
            "unknown" => Ok(Self::Unknown),
            _ => Err(UnknownStateError(s.to_string())),
        }
    }
}

/// One persisted row of the host table.
///
/// `(ip_address, mac_address)` is unique; `state` is always the last confirmed state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRecord {
    pub id: i64,
    pub ip_address: String,
    pub mac_address: String,
    pub name: String,
    pub vendor: String,
    pub unclassified: String,
    pub state: HostState,
    pub notify: bool,
    /// Port for the TCP connect probe. `None` goes straight to the echo probe.
    pub check_port: Option<u16>,
    /// Timestamp of the observation that produced the current row, as emitted by the feed.
    pub last_seen: String,
    /// When the row was created or last went through a confirmed transition.
    pub event_time: DateTime<Utc>,
}

/// Fields needed to insert a host seen for the first time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewHost {
    pub ip_address: String,
    pub mac_address: String,
    pub name: String,
    pub vendor: String,
    pub unclassified: String,
    pub state: HostState,
    pub notify: bool,
    pub last_seen: String,
    pub event_time: DateTime<Utc>,
}

/// A single parsed discovery record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub timestamp: String,
    /// Only ever [`HostState::Up`] or [`HostState::Down`].
    pub observed_state: HostState,
    pub ip_address: String,
    pub unclassified: String,
    pub name: String,
    pub mac_address: String,
    pub vendor: String,
}

impl Observation {
    /// Builds the insert payload for a host that has never been seen before.
    #[must_use]
    pub fn to_new_host(&self, notify: bool, now: DateTime<Utc>) -> NewHost {
        NewHost {
            ip_address: self.ip_address.clone(),
            mac_address: self.mac_address.clone(),
            name: self.name.clone(),
            vendor: self.vendor.clone(),
            unclassified: self.unclassified.clone(),
            state: self.observed_state,
            notify,
            last_seen: self.timestamp.clone(),
            event_time: now,
        }
    }
}

/// Why a notification was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Cause {
    New,
    State,
}

impl Cause {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::State => "STATE",
        }
    }
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A confirmed change queued for publication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub cause: Cause,
    pub ip_address: String,
    pub name: String,
    pub state: HostState,
}

impl NotificationEvent {
    /// Label used as the per-host topic segment: the first dot-separated label of the
    /// name, or the IP address when there is no usable name.
    #[must_use]
    pub fn host_label(&self) -> &str {
        match self.name.split('.').next() {
            Some(label) if !label.trim().is_empty() => label,
            _ => &self.ip_address,
        }
    }
}
