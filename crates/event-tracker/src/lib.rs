//! Instrumentation event tracker
//!
//! Records clicks, errors, network exchanges and custom events, keeps a
//! short user action history for error context, and batches events to a
//! remote endpoint through the delivery pump.

pub mod error;
pub mod tracker;
pub mod transport;

// Re-export commonly used types
pub use error::{TrackerError, TrackerResult};
pub use tracker::{generate_session_id, ErrorContext, EventTracker, UserAction, EVENT_QUEUE};
pub use transport::{Exchange, ExchangeOutcome, ObservedClient, RequestObserver};
