//! MQTT transport for the notifier.
//!
//! Every batch gets its own short session: connect with a clean session, wait for CONNACK,
//! QoS 0 PUBLISH each message, DISCONNECT.

use core::time::Duration;

use rumqttc::{AsyncClient, Event, MqttOptions, Outgoing, Packet, QoS};
use tracing::debug;

use super::{Message, PublishError, Publisher};
use crate::config::BrokerConfig;

/// Requests queued between the client handle and the event loop: a batch plus DISCONNECT.
const REQUEST_CAPACITY: usize = 8;

/// [`Publisher`] speaking MQTT to a single broker.
#[derive(Debug, Clone)]
pub struct MqttPublisher {
    host: String,
    port: u16,
    client_id: String,
    keep_alive: Duration,
    timeout: Duration,
}

impl MqttPublisher {
    #[must_use]
    pub fn from_config(config: &BrokerConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            client_id: config.client_id.clone(),
            keep_alive: Duration::from_secs(u64::from(config.keep_alive_secs)),
            timeout: config.connect_timeout(),
        }
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options
            .set_clean_session(true)
            .set_keep_alive(self.keep_alive);
        options
    }

    fn addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    async fn session(&self, messages: &[Message]) -> Result<(), PublishError> {
        let capacity = REQUEST_CAPACITY.max(messages.len() + 1);
        let (client, mut eventloop) = AsyncClient::new(self.options(), capacity);

        loop {
            match eventloop.poll().await? {
                Event::Incoming(Packet::ConnAck(_)) => break,
                event => debug!("Waiting for CONNACK, got {event:?}"),
            }
        }
        debug!("Connected to broker at {}", self.addr());

        for message in messages {
            client
                .publish(
                    message.topic.as_str(),
                    QoS::AtMostOnce,
                    false,
                    message.payload.as_bytes(),
                )
                .await?;
        }
        client.disconnect().await?;

        // Drive the event loop until the queued requests have gone out.
        loop {
            if let Event::Outgoing(Outgoing::Disconnect) = eventloop.poll().await? {
                return Ok(());
            }
        }
    }
}

impl Publisher for MqttPublisher {
    async fn publish(&self, messages: &[Message]) -> Result<(), PublishError> {
        tokio::time::timeout(self.timeout, self.session(messages))
            .await
            .map_err(|_| PublishError::Timeout(self.addr()))?
    }
}
