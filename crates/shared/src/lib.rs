//! Shared library for the spin-relay workspace
//!
//! This crate provides common functionality used across all crates:
//! - Event definitions (spins and tracked events)
//! - Error handling types
//! - Configuration management
//! - Logging infrastructure

pub mod config;
pub mod error;
pub mod events;

// Re-export commonly used types
pub use config::{CollectorConfig, Config, DeliveryConfig, SinkConfig, TrackerConfig};
pub use error::{Error, Result};
pub use events::{Color, EventLevel, Spin, TrackedEvent, MAX_NUMBER, RED_NUMBERS};

/// Log filter used when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str =
    "shared=debug,delivery=debug,spin_collector=debug,event_tracker=debug,info";

/// Initialize tracing subscriber for structured logging
///
/// `LOG_FORMAT=json` switches to one JSON object per line.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let registry = tracing_subscriber::registry().with(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
    );

    let json = std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}
