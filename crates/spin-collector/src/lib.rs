//! Roulette spin collector
//!
//! Polls a scrape source for the latest outcome, keeps a deduplicated
//! newest-first list of spins mirrored to a key-value store, and forwards
//! accepted spins to the remote API through the delivery pump.

pub mod collector;
pub mod error;
pub mod mirror;
pub mod scrape;
pub mod source;
pub mod stats;
pub mod store;

// Re-export commonly used types
pub use collector::{Collector, SPIN_QUEUE};
pub use error::{CollectorError, CollectorResult};
pub use mirror::PersistenceMirror;
pub use scrape::{extract_number, FileScraper, HttpScraper, NullScraper, Scraper, ScriptedScraper};
pub use source::{PollOutcome, RetainedList, SpinSource};
pub use stats::{summarize, Summary, DEFAULT_TOP_K};
pub use store::{FileStore, KeyValueStore, MemoryStore};
