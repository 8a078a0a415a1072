//! Sync error types.

use moldap_events::EventError;
use moldap_ldap::LdapError;
use thiserror::Error;

/// Errors that can occur while polling and persisting watermarks.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration error.
    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Directory error.
    #[error("Directory error: {0}")]
    Directory(#[from] LdapError),

    /// Event publishing error.
    #[error("Event error: {0}")]
    Event(#[from] EventError),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Scope has no watermark row, or is not configured on this manager.
    #[error("Unknown scope: {scope}")]
    UnknownScope { scope: String },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SyncError {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an unknown scope error.
    pub fn unknown_scope(scope: impl Into<String>) -> Self {
        Self::UnknownScope {
            scope: scope.into(),
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Database(_) => true,
            SyncError::Directory(e) => e.is_transient(),
            SyncError::Event(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;
