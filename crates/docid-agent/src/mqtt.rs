//! MQTT-backed propagation queue.
//!
//! Messages are published as CBOR with QoS 1 on the work topic of the
//! queue. Updates that fail are republished on the queue's dead-letter
//! topic so they stay inspectable.
//!
//! The worker connects with a persistent session under a stable client id,
//! so the broker holds its subscription and queues QoS 1 messages while it
//! is offline. The worker must have subscribed once before any producer
//! publishes; messages published before that first subscription have no
//! session to land in.

use crate::queue::{PropagationQueue, QueueAcceptance};
use async_trait::async_trait;
use docid_proto::{PropagationMessage, QueueScheme};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use url::Url;
use uuid::Uuid;

/// Request channel capacity of the MQTT client.
const CHANNEL_CAPACITY: usize = 256;

/// Propagation queue on an MQTT broker.
pub struct MqttQueue {
    client: AsyncClient,
    scheme: QueueScheme,
    name: String,
}

impl MqttQueue {
    /// Create a queue client. The returned event loop must be polled for
    /// anything to reach the broker.
    ///
    /// With `persistent_session` the broker keeps subscriptions and pending
    /// QoS 1 messages for `client_id` across disconnects.
    ///
    /// # Errors
    ///
    /// Returns error if the broker URL is invalid.
    pub fn new(
        mqtt_broker: &str,
        client_id: &str,
        scheme: QueueScheme,
        name: impl Into<String>,
        persistent_session: bool,
    ) -> Result<(Self, EventLoop), MqttQueueError> {
        let (host, port) = parse_mqtt_url(mqtt_broker)?;

        let mut mqtt_options = MqttOptions::new(client_id, host, port);
        mqtt_options.set_keep_alive(Duration::from_secs(30));
        mqtt_options.set_clean_session(!persistent_session);

        let (client, eventloop) = AsyncClient::new(mqtt_options, CHANNEL_CAPACITY);

        Ok((
            Self {
                client,
                scheme,
                name: name.into(),
            },
            eventloop,
        ))
    }

    /// Work topic of this queue.
    #[must_use]
    pub fn work_topic(&self) -> String {
        self.scheme.work(&self.name)
    }

    /// Subscribe to the work topic.
    ///
    /// # Errors
    ///
    /// Returns error if subscription fails.
    pub async fn subscribe(&self) -> Result<(), MqttQueueError> {
        let topic = self.work_topic();

        tracing::info!(topic, "Subscribing to work topic");

        self.client
            .subscribe(&topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| MqttQueueError::Subscribe(e.to_string()))?;

        Ok(())
    }

    /// Republish a failed message on the dead-letter topic.
    ///
    /// # Errors
    ///
    /// Returns error if encoding or publish fails.
    pub async fn publish_dead_letter(
        &self,
        message: &PropagationMessage,
    ) -> Result<(), MqttQueueError> {
        let topic = self.scheme.dead_letter(&self.name);
        self.publish(&topic, message).await
    }

    async fn publish(
        &self,
        topic: &str,
        message: &PropagationMessage,
    ) -> Result<(), MqttQueueError> {
        let payload = message
            .to_cbor()
            .map_err(|e| MqttQueueError::Serialize(e.to_string()))?;

        tracing::debug!(topic, payload_len = payload.len(), "Publishing message");

        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| MqttQueueError::Publish(e.to_string()))
    }

    /// Ask the broker connection to close once queued requests are sent.
    ///
    /// # Errors
    ///
    /// Returns error if the request channel is closed.
    pub async fn disconnect(&self) -> Result<(), MqttQueueError> {
        self.client
            .disconnect()
            .await
            .map_err(|e| MqttQueueError::Publish(e.to_string()))
    }
}

#[async_trait]
impl PropagationQueue for MqttQueue {
    fn name(&self) -> &str {
        &self.name
    }

    /// Accepted means handed to the client's request channel; the broker
    /// acknowledges later through the event loop (see [`PublishAckCounter`]).
    async fn enqueue(&self, message: &PropagationMessage) -> QueueAcceptance {
        let topic = self.work_topic();
        match self.publish(&topic, message).await {
            Ok(()) => QueueAcceptance::Accepted {
                message_id: Uuid::new_v4().to_string(),
            },
            Err(err) => QueueAcceptance::Rejected {
                error: err.to_string(),
            },
        }
    }
}

/// Drives a producer's event loop in the background and counts publish
/// acknowledgements.
///
/// Spawn it before publishing: the client's request channel is bounded, so
/// publishing more than its capacity with nobody polling blocks forever.
pub struct PublishAckCounter {
    acked: watch::Receiver<usize>,
    task: JoinHandle<MqttQueueError>,
}

impl PublishAckCounter {
    /// Start polling `eventloop` on the runtime.
    #[must_use]
    pub fn spawn(mut eventloop: EventLoop) -> Self {
        let (tx, acked) = watch::channel(0);
        let task = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::PubAck(_))) => tx.send_modify(|n| *n += 1),
                    Ok(_) => {}
                    Err(e) => return MqttQueueError::Connection(e.to_string()),
                }
            }
        });
        Self { acked, task }
    }

    /// Acknowledgements received so far.
    #[must_use]
    pub fn acked(&self) -> usize {
        *self.acked.borrow()
    }

    /// Wait until `expected` acknowledgements have arrived.
    ///
    /// Used by short-lived producers that must not exit before the broker
    /// has taken responsibility for their messages.
    ///
    /// # Errors
    ///
    /// Returns error on connection failure or if `limit` elapses first.
    pub async fn wait_for(&mut self, expected: usize, limit: Duration) -> Result<(), MqttQueueError> {
        let wait = async {
            loop {
                if *self.acked.borrow_and_update() >= expected {
                    return Ok(());
                }
                if self.acked.changed().await.is_err() {
                    // The polling task ended; it only does so on error.
                    return Err(match (&mut self.task).await {
                        Ok(err) => err,
                        Err(join) => MqttQueueError::Connection(join.to_string()),
                    });
                }
            }
        };

        tokio::time::timeout(limit, wait)
            .await
            .map_err(|_| MqttQueueError::Timeout { expected })?
    }
}

impl Drop for PublishAckCounter {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Parse MQTT URL into host and port.
fn parse_mqtt_url(input: &str) -> Result<(String, u16), MqttQueueError> {
    if input.contains("://") {
        let url = Url::parse(input)
            .map_err(|e| MqttQueueError::InvalidBrokerUrl(format!("{input}: {e}")))?;

        match url.scheme() {
            "tcp" | "mqtt" => {}
            scheme => {
                return Err(MqttQueueError::InvalidBrokerUrl(format!(
                    "{input}: unsupported scheme '{scheme}'"
                )));
            }
        }

        let host = url
            .host_str()
            .ok_or_else(|| MqttQueueError::InvalidBrokerUrl(format!("{input}: missing host")))?;
        let port = url.port().unwrap_or(1883);

        return Ok((host.to_string(), port));
    }

    let mut parts = input.split(':');
    let host = parts
        .next()
        .filter(|value| !value.is_empty())
        .ok_or_else(|| MqttQueueError::InvalidBrokerUrl(format!("{input}: missing host")))?;
    let port = match parts.next() {
        None => 1883,
        Some(port) => port.parse().map_err(|_| {
            MqttQueueError::InvalidBrokerUrl(format!("{input}: invalid port '{port}'"))
        })?,
    };
    if parts.next().is_some() {
        return Err(MqttQueueError::InvalidBrokerUrl(format!(
            "{input}: too many ':' separators"
        )));
    }

    Ok((host.to_string(), port))
}

/// Errors for MQTT queue operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MqttQueueError {
    /// Subscription failed
    #[error("subscription error: {0}")]
    Subscribe(String),
    /// Invalid MQTT broker URL
    #[error("invalid MQTT broker URL: {0}")]
    InvalidBrokerUrl(String),
    /// Publish failed
    #[error("publish error: {0}")]
    Publish(String),
    /// Serialization failed
    #[error("serialize error: {0}")]
    Serialize(String),
    /// Broker connection failed
    #[error("connection error: {0}")]
    Connection(String),
    /// Acknowledgements did not arrive in time
    #[error("timed out waiting for {expected} publish acknowledgements")]
    Timeout {
        /// Acknowledgements expected
        expected: usize,
    },
}
