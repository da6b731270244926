//! Publication of confirmed transitions.
//!
//! The notifier runs on its own task, drains the [`NotificationQueue`] and hands each event to
//! a [`Publisher`]. It owns its broker connection for the duration of one event: connect,
//! publish, disconnect. A failed delivery is logged and the event dropped.

pub mod mqtt;

use alloc::sync::Arc;
use core::{future::Future, time::Duration};

use chrono::Local;
use thiserror::Error as ThisError;
use tracing::{Instrument as _, debug, info, warn};

use crate::{
    config::{BrokerConfig, QueueConfig},
    model::NotificationEvent,
    queue::NotificationQueue,
    shutdown::ShutdownRx,
};

/// Format of the published `event_time` field.
pub const EVENT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A single topic/payload pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: String,
}

impl Message {
    fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

#[derive(Debug, ThisError)]
pub enum PublishError {
    #[error("broker connection failed")]
    Connection(#[from] rumqttc::ConnectionError),
    #[error("failed to queue request for the broker")]
    Client(#[from] rumqttc::ClientError),
    #[error("timed out talking to broker at {0}")]
    Timeout(String),
}

/// Delivers one event's messages to the broker as a unit.
pub trait Publisher {
    fn publish(&self, messages: &[Message]) -> impl Future<Output = Result<(), PublishError>> + Send;
}

pub struct Notifier<B> {
    publisher: B,
    queue: Arc<NotificationQueue>,
    topic_prefix: String,
    json_summary: bool,
    idle_poll: Duration,
}

impl<B: Publisher + Send + Sync + 'static> Notifier<B> {
    #[must_use]
    pub fn new(
        publisher: B,
        queue: Arc<NotificationQueue>,
        broker: &BrokerConfig,
        queue_config: &QueueConfig,
    ) -> Self {
        Self {
            publisher,
            queue,
            topic_prefix: broker.topic_prefix.trim_end_matches('/').to_string(),
            json_summary: broker.json_summary,
            idle_poll: queue_config.idle_poll(),
        }
    }

    /// Builds the messages for `event`, stamped with `event_time`.
    #[must_use]
    pub fn messages(&self, event: &NotificationEvent, event_time: &str) -> Vec<Message> {
        let base = format!("{}/{}", self.topic_prefix, event.host_label());
        let mut messages = vec![
            Message::new(format!("{base}/event_time"), event_time),
            Message::new(format!("{base}/cause"), event.cause.as_str()),
            Message::new(format!("{base}/state"), event.state.as_str()),
        ];
        if self.json_summary {
            let summary = serde_json::json!({
                "event_time": event_time,
                "cause": event.cause,
                "ip_address": event.ip_address,
                "name": event.name,
                "state": event.state,
            });
            messages.push(Message::new(format!("{base}/event"), summary.to_string()));
        }
        messages
    }

    /// Publishes a single event, stamping it with the current local time.
    ///
    /// # Errors
    ///
    /// Returns the publisher's error if delivery failed.
    #[tracing::instrument(skip_all, fields(ip = %event.ip_address, cause = %event.cause))]
    pub async fn deliver(&self, event: &NotificationEvent) -> Result<(), PublishError> {
        let event_time = Local::now().format(EVENT_TIME_FORMAT).to_string();
        let messages = self.messages(event, &event_time);
        self.publisher.publish(&messages).await?;
        debug!("Published {} messages", messages.len());
        Ok(())
    }

    /// Consumer loop. Returns the number of events delivered once shutdown is requested.
    pub async fn run(self, mut shutdown: ShutdownRx) -> usize {
        let mut delivered = 0;
        while let Some(event) = self.queue.recv(&mut shutdown, self.idle_poll).await {
            match self.deliver(&event).await {
                Ok(()) => {
                    delivered += 1;
                    info!(
                        "Notified {} {} for {}",
                        event.cause, event.state, event.ip_address
                    );
                }
                Err(e) => warn!(
                    "Dropping {} notification for {}: {:#}",
                    event.cause,
                    event.ip_address,
                    eyre::Report::new(e)
                ),
            }
        }
        info!("Notifier stopped after {delivered} deliveries");
        delivered
    }

    /// Runs the consumer loop on its own task.
    pub fn spawn(self, shutdown: ShutdownRx) -> tokio::task::JoinHandle<usize> {
        tokio::spawn(self.run(shutdown).in_current_span())
    }
}
