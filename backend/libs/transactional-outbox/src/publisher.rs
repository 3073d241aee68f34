//! Delivery side of the relay.

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use tracing::debug;

use crate::{OutboxError, OutboxResult};

/// Default bound on how long a single Kafka delivery may take.
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Hands serialized envelopes to a message bus.
///
/// Implementations must tolerate being called repeatedly with the same idempotency key;
/// the relay promises at-least-once delivery, not exactly-once.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, payload: &[u8], topic: &str, idempotency_key: &str)
        -> OutboxResult<()>;
}

/// Kafka-backed publisher.
///
/// - Envelope id is used as the record key and the `message_id` header so consumers can
///   drop duplicates
/// - Payloads are JSON, announced with a `content_type` header
/// - Topics are optionally namespaced with a prefix (`"<prefix>.<topic>"`)
pub struct KafkaPublisher {
    producer: FutureProducer,
    topic_prefix: Option<String>,
    delivery_timeout: Duration,
}

impl KafkaPublisher {
    /// Wrap an existing producer.
    ///
    /// The producer should have `enable.idempotence = true` and `acks = all`;
    /// [`KafkaPublisher::from_brokers`] configures both.
    pub fn new(
        producer: FutureProducer,
        topic_prefix: Option<String>,
        delivery_timeout: Duration,
    ) -> Self {
        Self {
            producer,
            topic_prefix: topic_prefix.filter(|p| !p.is_empty()),
            delivery_timeout,
        }
    }

    /// Build an idempotent producer for the given comma-separated broker list.
    pub fn from_brokers(
        brokers: &str,
        topic_prefix: Option<String>,
        delivery_timeout: Duration,
    ) -> OutboxResult<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("enable.idempotence", "true")
            .set("acks", "all")
            .set("max.in.flight.requests.per.connection", "5")
            .set("message.timeout.ms", delivery_timeout.as_millis().to_string())
            .create()
            .map_err(|e| OutboxError::PublishFailed(format!("Kafka producer setup failed: {e}")))?;

        Ok(Self::new(producer, topic_prefix, delivery_timeout))
    }

    fn resolve_topic(&self, topic: &str) -> String {
        match &self.topic_prefix {
            Some(prefix) => format!("{prefix}.{topic}"),
            None => topic.to_string(),
        }
    }
}

#[async_trait]
impl Publisher for KafkaPublisher {
    async fn publish(
        &self,
        payload: &[u8],
        topic: &str,
        idempotency_key: &str,
    ) -> OutboxResult<()> {
        let topic = self.resolve_topic(topic);

        let headers = OwnedHeaders::new()
            .insert(Header {
                key: "message_id",
                value: Some(idempotency_key.as_bytes()),
            })
            .insert(Header {
                key: "content_type",
                value: Some("application/json".as_bytes()),
            });

        let record = FutureRecord::to(&topic)
            .key(idempotency_key)
            .payload(payload)
            .headers(headers);

        self.producer
            .send(record, self.delivery_timeout)
            .await
            .map_err(|(err, _)| OutboxError::PublishFailed(format!("Kafka publish failed: {err}")))?;

        debug!(
            message_id = idempotency_key,
            topic = %topic,
            "Message delivered to Kafka"
        );

        Ok(())
    }
}
