//! Error types for the event tracker

use delivery::DeliveryError;
use thiserror::Error;

/// Result type alias for tracker operations
pub type TrackerResult<T> = std::result::Result<T, TrackerError>;

/// Tracker error types
#[derive(Debug, Error)]
pub enum TrackerError {
    /// Building the event sink failed
    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    /// Request sent through the observed client failed
    #[error("HTTP error: {0}")]
    Http(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Flush task already running
    #[error("Tracker already started")]
    AlreadyStarted,
}

impl TrackerError {
    /// Create an Http error
    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }

    /// Create an InvalidConfig error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            TrackerError::http("Connection failed").to_string(),
            "HTTP error: Connection failed"
        );
        assert_eq!(
            TrackerError::from(DeliveryError::invalid_config("URL cannot be empty")).to_string(),
            "Delivery error: Invalid configuration: URL cannot be empty"
        );
    }
}
