//! Directory client error types
//!
//! Error definitions with transient/permanent classification for retry logic.

use thiserror::Error;

/// Error that can occur while talking to the directory.
#[derive(Debug, Error)]
pub enum LdapError {
    // Connection errors (usually transient)
    /// Failed to establish connection to the directory server.
    #[error("connection failed: {message}")]
    ConnectionFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Invalid bind credentials.
    #[error("authentication failed: invalid credentials")]
    AuthenticationFailed,

    /// The connector was disposed and can no longer be used.
    #[error("connector has been disposed")]
    Disposed,

    // Configuration errors (permanent)
    /// Connector configuration is invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    // Operation errors
    /// A search or read failed.
    #[error("operation failed: {message}")]
    OperationFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A Generalized Time value could not be decoded.
    #[error("invalid timestamp '{value}': {reason}")]
    InvalidTimestamp { value: String, reason: String },
}

impl LdapError {
    /// Check if this error is transient and the operation should be retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LdapError::ConnectionFailed { .. } | LdapError::OperationFailed { .. }
        )
    }

    /// Create a connection failed error.
    pub fn connection_failed(message: impl Into<String>) -> Self {
        LdapError::ConnectionFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection failed error with source.
    pub fn connection_failed_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        LdapError::ConnectionFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an operation failed error.
    pub fn operation_failed(message: impl Into<String>) -> Self {
        LdapError::OperationFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create an operation failed error with source.
    pub fn operation_failed_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        LdapError::OperationFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an invalid timestamp error.
    pub fn invalid_timestamp(value: impl Into<String>, reason: impl Into<String>) -> Self {
        LdapError::InvalidTimestamp {
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for directory operations.
pub type LdapResult<T> = Result<T, LdapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(LdapError::connection_failed("refused").is_transient());
        assert!(LdapError::operation_failed("busy").is_transient());
        assert!(!LdapError::AuthenticationFailed.is_transient());
        assert!(!LdapError::Disposed.is_transient());
        assert!(!LdapError::invalid_timestamp("x", "too short").is_transient());
    }

    #[test]
    fn test_error_display() {
        let err = LdapError::invalid_timestamp("2021", "too short");
        assert_eq!(err.to_string(), "invalid timestamp '2021': too short");

        let err = LdapError::InvalidConfiguration {
            message: "host is required".to_string(),
        };
        assert_eq!(err.to_string(), "invalid configuration: host is required");
    }
}
