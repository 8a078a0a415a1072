//! Error types for the moldap-events crate.

use thiserror::Error;

/// Errors that can occur while publishing events.
#[derive(Debug, Error)]
pub enum EventError {
    // Configuration errors (permanent, no retry)
    /// Required configuration variable is missing.
    #[error("Configuration missing: {var}")]
    ConfigMissing { var: String },

    /// Configuration value is invalid.
    #[error("Configuration invalid for {var}: {reason}")]
    ConfigInvalid { var: String, reason: String },

    // Connection errors (transient, retry with backoff)
    /// Failed to connect to the broker.
    #[error("Connection to broker {broker} failed: {cause}")]
    ConnectionFailed { broker: String, cause: String },

    // Publishing errors
    /// Failed to publish a message.
    #[error("Failed to publish to {routing_key}: {cause}")]
    PublishFailed { routing_key: String, cause: String },

    /// The receiving side of an in-process channel has gone away.
    #[error("Event channel closed")]
    ChannelClosed,

    /// Internal Kafka client error.
    #[cfg(feature = "kafka")]
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),
}

impl EventError {
    /// Returns true if this error is transient and can be retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EventError::ConnectionFailed { .. } | EventError::PublishFailed { .. }
        )
    }
}
