//! Error types for event delivery
//!
//! Delivery failures are never fatal: a failed batch is restored to the
//! queue, a failed bulk item is counted and skipped.

use thiserror::Error;

/// Delivery error types
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Transport-level failure (connect, timeout, reset)
    #[error("HTTP error: {0}")]
    Http(String),

    /// Sink answered with a non-success status
    #[error("Unexpected status code {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid sink configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl DeliveryError {
    /// Check if this error is retryable
    ///
    /// Transport errors and 5xx responses are transient.
    /// 4xx responses, serialization and configuration errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            DeliveryError::Http(_) => true,
            DeliveryError::UnexpectedStatus { status, .. } => !(400..500).contains(status),
            DeliveryError::Serialization(_) | DeliveryError::InvalidConfig(_) => false,
        }
    }

    /// Create an HTTP transport error
    pub fn http(details: impl Into<String>) -> Self {
        DeliveryError::Http(details.into())
    }

    /// Create an unexpected status error
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        DeliveryError::UnexpectedStatus {
            status,
            body: sanitize_error_message(&body.into()),
        }
    }

    /// Create an invalid config error
    pub fn invalid_config(details: impl Into<String>) -> Self {
        DeliveryError::InvalidConfig(details.into())
    }
}

/// Strip control characters and truncate response bodies before they reach logs
fn sanitize_error_message(msg: &str) -> String {
    msg.chars()
        .filter(|c| !c.is_control() || *c == ' ')
        .take(200)
        .collect()
}

/// Convenience result type for delivery operations
pub type DeliveryResult<T> = Result<T, DeliveryError>;
