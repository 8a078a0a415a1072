//! Kafka event sink.

use crate::config::KafkaConfig;
use crate::error::EventError;
use crate::health::HealthStatus;
use crate::sink::{EventSink, OutboundMessage};

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Kafka-backed [`EventSink`]; the routing key is used as the topic.
pub struct KafkaSink {
    producer: FutureProducer,
    config: KafkaConfig,
}

impl KafkaSink {
    /// Create a new sink with the given configuration.
    ///
    /// The broker connection is established lazily on first send.
    pub fn new(config: KafkaConfig) -> Result<Self, EventError> {
        let mut client_config = ClientConfig::new();

        client_config
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("client.id", &config.client_id)
            .set("security.protocol", config.security_protocol.as_str())
            .set("message.timeout.ms", config.message_timeout_ms.to_string())
            .set("acks", "all");

        if let Some(sasl) = &config.sasl {
            client_config
                .set("sasl.mechanism", sasl.mechanism.as_str())
                .set("sasl.username", &sasl.username)
                .set("sasl.password", &sasl.password);
        }

        let producer: FutureProducer =
            client_config
                .create()
                .map_err(|e| EventError::ConnectionFailed {
                    broker: config.bootstrap_servers.clone(),
                    cause: e.to_string(),
                })?;

        info!(
            bootstrap_servers = %config.bootstrap_servers,
            client_id = %config.client_id,
            "Kafka sink created"
        );

        Ok(Self { producer, config })
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.config.message_timeout_ms)
    }
}

#[async_trait]
impl EventSink for KafkaSink {
    #[instrument(skip(self, message), fields(routing_key = %message.routing_key, key = %message.key))]
    async fn send(&self, message: OutboundMessage) -> Result<(), EventError> {
        debug!(payload_size = message.payload.len(), "Publishing message");

        let record = FutureRecord::to(message.routing_key.as_str())
            .key(message.key.as_str())
            .payload(message.payload.as_slice());

        let (partition, offset) = self
            .producer
            .send(record, self.timeout())
            .await
            .map_err(|(err, _)| EventError::PublishFailed {
                routing_key: message.routing_key.clone(),
                cause: err.to_string(),
            })?;

        debug!(partition, offset, "Message published successfully");

        Ok(())
    }

    async fn health_check(&self) -> Result<HealthStatus, EventError> {
        let metadata = self
            .producer
            .client()
            .fetch_metadata(None, self.timeout())
            .map_err(
                |e: rdkafka::error::KafkaError| EventError::ConnectionFailed {
                    broker: self.config.bootstrap_servers.clone(),
                    cause: e.to_string(),
                },
            )?;

        let brokers = metadata.brokers().len();
        Ok(HealthStatus {
            connected: brokers > 0,
            brokers,
        })
    }
}

impl std::fmt::Debug for KafkaSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaSink")
            .field("config", &self.config)
            .finish()
    }
}
