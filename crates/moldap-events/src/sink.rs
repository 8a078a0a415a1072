//! Outbound message sinks.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::EventError;
use crate::health::HealthStatus;

/// A single message bound for the outbound channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Routing key (topic) the message is published under.
    pub routing_key: String,
    /// Partitioning key.
    pub key: String,
    /// Serialized payload.
    pub payload: Vec<u8>,
}

impl OutboundMessage {
    pub fn new(
        routing_key: impl Into<String>,
        key: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            routing_key: routing_key.into(),
            key: key.into(),
            payload: payload.into(),
        }
    }
}

/// Destination for outbound messages.
///
/// Delivery is at-least-once: a successful `send` means the message was
/// handed to the transport, and callers may send the same message again.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Publish one message.
    async fn send(&self, message: OutboundMessage) -> Result<(), EventError>;

    /// Report whether the sink can currently deliver.
    async fn health_check(&self) -> Result<HealthStatus, EventError>;
}

/// Sink backed by an in-process bounded channel.
///
/// Used when no broker is configured and by tests that need to observe
/// what was published.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<OutboundMessage>,
}

impl ChannelSink {
    /// Create a sink and the receiver that drains it.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn send(&self, message: OutboundMessage) -> Result<(), EventError> {
        debug!(
            routing_key = %message.routing_key,
            key = %message.key,
            payload_size = message.payload.len(),
            "Queueing message on local channel"
        );
        self.tx
            .send(message)
            .await
            .map_err(|_| EventError::ChannelClosed)
    }

    async fn health_check(&self) -> Result<HealthStatus, EventError> {
        Ok(HealthStatus::local(!self.tx.is_closed()))
    }
}
