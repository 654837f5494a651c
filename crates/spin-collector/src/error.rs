//! Error types for the spin collector

use delivery::DeliveryError;
use thiserror::Error;

/// Result type alias for collector operations
pub type CollectorResult<T> = std::result::Result<T, CollectorError>;

/// Collector error types
#[derive(Debug, Error)]
pub enum CollectorError {
    /// Key-value store I/O error
    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Remote delivery error
    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    /// Scrape source error
    #[error("Scrape error: {0}")]
    Scrape(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Collector lifecycle misuse
    #[error("Collector already running")]
    AlreadyRunning,
}

impl CollectorError {
    /// Create a Scrape error
    pub fn scrape(msg: impl Into<String>) -> Self {
        Self::Scrape(msg.into())
    }

    /// Create an InvalidConfig error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Check if this error is transient
    ///
    /// A failed scrape or storage write may succeed on the next poll;
    /// malformed data and bad configuration will not.
    pub fn is_retryable(&self) -> bool {
        match self {
            CollectorError::Storage(_) | CollectorError::Scrape(_) => true,
            CollectorError::Delivery(e) => e.is_retryable(),
            _ => false,
        }
    }
}
