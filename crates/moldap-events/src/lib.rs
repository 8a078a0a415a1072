//! # moldap-events
//!
//! Outbound event channel for directory change notifications.
//!
//! Every changed directory entity is announced as one message carrying its
//! identifier under a fixed routing key. Delivery is at-least-once and
//! unordered; consumers are expected to be idempotent per identifier.
//!
//! ## Cargo Features
//!
//! - `kafka`: Enable the Kafka sink (requires librdkafka)
//!
//! ## Example
//!
//! ```rust,ignore
//! use moldap_events::{EventSink, KafkaConfig, KafkaSink, OutboundMessage};
//!
//! let sink = KafkaSink::new(KafkaConfig::from_reader(|key| std::env::var(key))?)?;
//! sink.send(OutboundMessage::new("ldap.uuid", id.to_string(), payload)).await?;
//! ```

pub mod config;
pub mod error;
pub mod health;
pub mod sink;

#[cfg(feature = "kafka")]
pub mod producer;

pub use config::{KafkaConfig, SaslMechanism, SecurityProtocol};
pub use error::EventError;
pub use health::HealthStatus;
pub use sink::{ChannelSink, EventSink, OutboundMessage};

#[cfg(feature = "kafka")]
pub use producer::KafkaSink;
