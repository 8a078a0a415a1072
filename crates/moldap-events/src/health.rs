//! Health check types.

use serde::{Deserialize, Serialize};

/// Health status of an event sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Whether the sink can currently deliver messages.
    pub connected: bool,
    /// Number of brokers discovered (zero for in-process sinks).
    pub brokers: usize,
}

impl HealthStatus {
    /// Status of an in-process sink.
    #[must_use]
    pub fn local(connected: bool) -> Self {
        Self {
            connected,
            brokers: 0,
        }
    }

    /// Check if the sink is healthy.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.connected
    }
}
