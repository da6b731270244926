//! Transition detection: decides whether an observation is a new host, noise or a real change.
//!
//! A sighting that disagrees with the stored state is only a candidate. The host is actively
//! probed and the probe's verdict, not the raw sighting, is what gets compared against the
//! store and committed.

use alloc::sync::Arc;
use core::net::IpAddr;

use chrono::Utc;
use thiserror::Error as ThisError;
use tracing::{debug, info};

use crate::{
    model::{Cause, HostState, NotificationEvent, Observation},
    probe::Prober,
    queue::NotificationQueue,
    store::{HostStore, StoreError},
};

/// What processing one observation led to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// First sighting; the host was inserted and announced.
    NewHost,
    /// Observation agrees with the stored state.
    Unchanged,
    /// Observation disagreed but the probe sided with the stored state.
    Suppressed,
    /// The probe confirmed a change, which was committed.
    Confirmed { state: HostState, notified: bool },
}

#[derive(Debug, ThisError)]
pub enum DetectError {
    #[error("state store failure")]
    Store(#[from] StoreError),
    #[error("stored host has unusable ip address '{0}'")]
    Address(String),
}

pub struct TransitionDetector<S, P> {
    store: S,
    prober: P,
    queue: Arc<NotificationQueue>,
    default_notify: bool,
}

impl<S: HostStore, P: Prober> TransitionDetector<S, P> {
    pub const fn new(
        store: S,
        prober: P,
        queue: Arc<NotificationQueue>,
        default_notify: bool,
    ) -> Self {
        Self {
            store,
            prober,
            queue,
            default_notify,
        }
    }

    /// Processes a single observation against the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written. Nothing is enqueued in that case.
    #[tracing::instrument(skip_all, fields(ip = %obs.ip_address, mac = %obs.mac_address))]
    pub async fn process(&self, obs: &Observation) -> Result<Outcome, DetectError> {
        let Some(record) = self
            .store
            .find(&obs.ip_address, &obs.mac_address)
            .await?
        else {
            let record = self
                .store
                .insert(&obs.to_new_host(self.default_notify, Utc::now()))
                .await?;
            info!(
                "New host {} '{}' ({}) is {}",
                record.ip_address, record.name, record.vendor, record.state
            );
            // first sightings are announced regardless of the notify flag
            self.queue
                .push(NotificationEvent {
                    cause: Cause::New,
                    ip_address: record.ip_address,
                    name: record.name,
                    state: record.state,
                })
                .await;
            return Ok(Outcome::NewHost);
        };

        if obs.observed_state == record.state {
            return Ok(Outcome::Unchanged);
        }

        let ip: IpAddr = record
            .ip_address
            .parse()
            .map_err(|_| DetectError::Address(record.ip_address.clone()))?;

        debug!(
            "Candidate transition {} -> {}, probing",
            record.state, obs.observed_state
        );
        let verdict = self.prober.probe(ip, record.check_port).await;

        if verdict == record.state {
            debug!("Probe says {}, discarding candidate transition", verdict);
            return Ok(Outcome::Suppressed);
        }

        self.store
            .record_transition(record.id, verdict, &obs.timestamp, Utc::now())
            .await?;
        info!("Host {} is now {}", record.ip_address, verdict);

        if record.notify {
            let name = if obs.name.is_empty() {
                record.name
            } else {
                obs.name.clone()
            };
            self.queue
                .push(NotificationEvent {
                    cause: Cause::State,
                    ip_address: record.ip_address,
                    name,
                    state: verdict,
                })
                .await;
        }

        Ok(Outcome::Confirmed {
            state: verdict,
            notified: record.notify,
        })
    }
}
