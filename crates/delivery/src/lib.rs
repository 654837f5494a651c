//! Event delivery core
//!
//! Pending queue, HTTP sink and delivery pump shared by the spin collector
//! and the event tracker.

pub mod error;
pub mod metrics;
pub mod pump;
pub mod queue;
pub mod sink;

// Re-export commonly used types
pub use error::{DeliveryError, DeliveryResult};
pub use pump::{
    run_periodic_flush, BatchEnvelope, BulkReport, DeliveryPump, DeliveryStats, FlushMode,
    FlushOutcome,
};
pub use queue::{PendingQueue, DEFAULT_MAX_PENDING};
pub use sink::{EventSink, HttpSink, InMemorySink};
