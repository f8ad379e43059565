//! Kafka-backed event source.
//!
//! Offsets are committed automatically by librdkafka; the ingestion loop never
//! manages them. Delivery is therefore at-least-once, which the idempotent
//! upsert absorbs.

use async_trait::async_trait;
use bytes::Bytes;
use ordercache_core::StreamError;
use ordercache_storage::EventSource;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::{ClientConfig, Message};

use crate::error::{ApiError, ApiResult};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Kafka consumer configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KafkaConfig {
    /// Bootstrap brokers.
    pub brokers: Vec<String>,
    /// Topic carrying serialized orders.
    pub topic: String,
    /// Consumer group.
    pub group_id: String,
    /// Where to start when the group has no committed offset.
    pub auto_offset_reset: String,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: vec!["localhost:9092".to_string()],
            topic: "orders".to_string(),
            group_id: "orders-group".to_string(),
            auto_offset_reset: "earliest".to_string(),
        }
    }
}

impl KafkaConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            brokers: std::env::var("KAFKA_BROKER")
                .ok()
                .map(|s| parse_brokers(&s))
                .filter(|b| !b.is_empty())
                .unwrap_or(defaults.brokers),
            topic: std::env::var("KAFKA_TOPIC").unwrap_or(defaults.topic),
            group_id: std::env::var("KAFKA_GROUP_ID").unwrap_or(defaults.group_id),
            auto_offset_reset: std::env::var("ORDERCACHE_KAFKA_AUTO_OFFSET_RESET")
                .unwrap_or(defaults.auto_offset_reset),
        }
    }

    fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", self.brokers.join(","))
            .set("group.id", &self.group_id)
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set("enable.partition.eof", "false");
        config
    }
}

fn parse_brokers(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

// ============================================================================
// EVENT SOURCE
// ============================================================================

/// [`EventSource`] over an rdkafka `StreamConsumer` subscribed to one topic.
pub struct KafkaEventSource {
    consumer: StreamConsumer,
    topic: String,
}

impl KafkaEventSource {
    /// Create the consumer and subscribe to the configured topic.
    pub fn connect(config: &KafkaConfig) -> ApiResult<Self> {
        let consumer: StreamConsumer = config.client_config().create().map_err(|e| {
            ApiError::service_unavailable(format!("Failed to create Kafka consumer: {}", e))
        })?;

        consumer.subscribe(&[config.topic.as_str()]).map_err(|e| {
            ApiError::service_unavailable(format!(
                "Failed to subscribe to topic {}: {}",
                config.topic, e
            ))
        })?;

        tracing::info!(
            brokers = %config.brokers.join(","),
            topic = %config.topic,
            group_id = %config.group_id,
            "Kafka consumer subscribed"
        );

        Ok(Self {
            consumer,
            topic: config.topic.clone(),
        })
    }
}

fn receive_error(err: KafkaError) -> StreamError {
    StreamError::Receive {
        reason: err.to_string(),
    }
}

#[async_trait]
impl EventSource for KafkaEventSource {
    async fn next(&mut self) -> Result<Option<Bytes>, StreamError> {
        let message = self.consumer.recv().await.map_err(receive_error)?;
        // Tombstones carry no payload; hand them on as empty bytes so they are
        // rejected and counted like any other invalid message.
        let payload = message
            .payload()
            .map(Bytes::copy_from_slice)
            .unwrap_or_default();
        Ok(Some(payload))
    }

    async fn close(&mut self) {
        self.consumer.unsubscribe();
        tracing::info!(topic = %self.topic, "Kafka subscription released");
    }
}
