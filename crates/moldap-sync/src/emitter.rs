//! Event emitter: one outbound message per changed entity.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures_util::future::try_join_all;
use moldap_events::{EventSink, OutboundMessage};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::SyncResult;

/// Default routing key for entity change notifications.
pub const DEFAULT_ROUTING_KEY: &str = "ldap.uuid";

/// Publishes entity identifiers under a fixed routing key.
pub struct EventEmitter {
    sink: Arc<dyn EventSink>,
    routing_key: String,
}

impl EventEmitter {
    pub fn new(sink: Arc<dyn EventSink>, routing_key: impl Into<String>) -> Self {
        Self {
            sink,
            routing_key: routing_key.into(),
        }
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    /// Build the message for one identifier. The payload is the identifier
    /// as a JSON string.
    pub fn message_for(&self, id: &Uuid) -> SyncResult<OutboundMessage> {
        Ok(OutboundMessage::new(
            self.routing_key.as_str(),
            id.to_string(),
            serde_json::to_vec(id)?,
        ))
    }

    /// Publish one message per identifier and return how many were sent.
    ///
    /// Empty input sends nothing. Messages are sent concurrently with no
    /// ordering between identifiers.
    #[instrument(skip(self, ids), fields(count = ids.len()))]
    pub async fn publish_all(&self, ids: &BTreeSet<Uuid>) -> SyncResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let messages = ids
            .iter()
            .map(|id| self.message_for(id))
            .collect::<SyncResult<Vec<_>>>()?;

        try_join_all(messages.into_iter().map(|message| self.sink.send(message))).await?;

        debug!(routing_key = %self.routing_key, "Published change events");
        Ok(ids.len())
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("routing_key", &self.routing_key)
            .finish()
    }
}
