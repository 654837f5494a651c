//! Configuration management using environment variables
//!
//! Every setting has a default matching the behaviour of the browser
//! collector and tracker, so an empty environment yields a working
//! configuration against a local API on port 5000.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default spin ingestion endpoint
pub const DEFAULT_SPIN_API_URL: &str = "http://localhost:5000/api/spins";

/// Default tracker ingestion endpoint
pub const DEFAULT_TRACKER_ENDPOINT: &str = "http://localhost:5000/api/events";

/// Default key the retained spin list is mirrored under
pub const DEFAULT_STORAGE_KEY: &str = "rouletteData";

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Remote API configuration
    pub sink: SinkConfig,

    /// Spin collector configuration
    pub collector: CollectorConfig,

    /// Delivery pump configuration
    pub delivery: DeliveryConfig,

    /// Event tracker configuration
    pub tracker: TrackerConfig,
}

/// Remote API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SinkConfig {
    /// Endpoint accepting POSTed spins
    pub api_url: String,

    /// Endpoint answering health checks
    pub health_url: String,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_SPIN_API_URL.to_string(),
            health_url: "http://localhost:5000/api/health".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Spin collector configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CollectorConfig {
    /// Page to fetch the history widget from (takes precedence over `scrape_file`)
    pub scrape_url: Option<String>,

    /// File holding a dumped history widget
    pub scrape_file: Option<PathBuf>,

    /// Marker the history widget starts at; text before it is ignored
    pub scrape_anchor: Option<String>,

    /// Interval between polls of the scrape source
    pub poll_interval: Duration,

    /// Maximum number of spins kept in the retained list
    pub max_retained: usize,

    /// Window within which a repeated number counts as a re-observation
    pub dedup_window: Duration,

    /// Forward accepted spins to the remote API
    pub auto_send: bool,

    /// Casino name attached to every spin
    pub casino_name: String,

    /// Table name attached to every spin
    pub table_name: String,

    /// Directory backing the key-value store
    pub storage_dir: PathBuf,

    /// Key the retained list is stored under
    pub storage_key: String,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            scrape_url: None,
            scrape_file: None,
            scrape_anchor: None,
            poll_interval: Duration::from_secs(30),
            max_retained: 100,
            dedup_window: Duration::from_secs(10),
            auto_send: true,
            casino_name: "live_casino".to_string(),
            table_name: "auto_roulette_1".to_string(),
            storage_dir: PathBuf::from(".spin-collector"),
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
        }
    }
}

/// Delivery pump configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Interval between periodic flushes
    pub flush_interval: Duration,

    /// Queue length that triggers an immediate flush
    pub flush_threshold: usize,

    /// Hard cap on pending events; overflow drops the oldest
    pub max_pending: usize,

    /// Delay between requests of a bulk per-item resend
    pub bulk_delay: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(5),
            flush_threshold: 1,
            max_pending: 10_000,
            bulk_delay: Duration::from_millis(100),
        }
    }
}

/// Event tracker configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    /// Endpoint accepting event batches
    pub endpoint: String,

    /// Queue length that triggers an immediate flush
    pub max_queue_size: usize,

    /// Interval between periodic flushes
    pub flush_interval: Duration,

    /// Number of user actions kept for error context
    pub max_user_actions: usize,

    /// User the events are attributed to
    pub user_id: String,

    /// Session to resume; a new one is generated when absent
    pub session_id: Option<String>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_TRACKER_ENDPOINT.to_string(),
            max_queue_size: 100,
            flush_interval: Duration::from_secs(5),
            max_user_actions: 50,
            user_id: "anonymous".to_string(),
            session_id: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        Self::from_vars(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable lookup
    ///
    /// Missing variables fall back to their defaults; present but unparsable
    /// variables are rejected.
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let sink_defaults = SinkConfig::default();
        let collector_defaults = CollectorConfig::default();
        let delivery_defaults = DeliveryConfig::default();
        let tracker_defaults = TrackerConfig::default();

        let api_url = lookup("SPIN_API_URL").unwrap_or(sink_defaults.api_url);
        let health_url = match lookup("SPIN_HEALTH_URL") {
            Some(url) => url,
            None => health_url_for(&api_url)?,
        };

        let config = Self {
            sink: SinkConfig {
                api_url,
                health_url,
                timeout_secs: parse_var(&lookup, "SINK_TIMEOUT_SECS", sink_defaults.timeout_secs)?,
            },
            collector: CollectorConfig {
                scrape_url: lookup("SCRAPE_URL"),
                scrape_file: lookup("SCRAPE_FILE").map(PathBuf::from),
                scrape_anchor: lookup("SCRAPE_ANCHOR"),
                poll_interval: Duration::from_secs(parse_var(
                    &lookup,
                    "POLL_INTERVAL_SECS",
                    collector_defaults.poll_interval.as_secs(),
                )?),
                max_retained: parse_var(&lookup, "MAX_RETAINED", collector_defaults.max_retained)?,
                dedup_window: Duration::from_secs(parse_var(
                    &lookup,
                    "DEDUP_WINDOW_SECS",
                    collector_defaults.dedup_window.as_secs(),
                )?),
                auto_send: parse_var(&lookup, "AUTO_SEND", collector_defaults.auto_send)?,
                casino_name: lookup("CASINO_NAME").unwrap_or(collector_defaults.casino_name),
                table_name: lookup("TABLE_NAME").unwrap_or(collector_defaults.table_name),
                storage_dir: lookup("STORAGE_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(collector_defaults.storage_dir),
                storage_key: lookup("STORAGE_KEY").unwrap_or(collector_defaults.storage_key),
            },
            delivery: DeliveryConfig {
                flush_interval: Duration::from_secs(parse_var(
                    &lookup,
                    "FLUSH_INTERVAL_SECS",
                    delivery_defaults.flush_interval.as_secs(),
                )?),
                flush_threshold: parse_var(
                    &lookup,
                    "FLUSH_THRESHOLD",
                    delivery_defaults.flush_threshold,
                )?,
                max_pending: parse_var(&lookup, "MAX_PENDING", delivery_defaults.max_pending)?,
                bulk_delay: Duration::from_millis(parse_var(
                    &lookup,
                    "BULK_DELAY_MS",
                    delivery_defaults.bulk_delay.as_millis() as u64,
                )?),
            },
            tracker: TrackerConfig {
                endpoint: lookup("TRACKER_ENDPOINT").unwrap_or(tracker_defaults.endpoint),
                max_queue_size: parse_var(
                    &lookup,
                    "TRACKER_MAX_QUEUE",
                    tracker_defaults.max_queue_size,
                )?,
                flush_interval: Duration::from_secs(parse_var(
                    &lookup,
                    "TRACKER_FLUSH_INTERVAL_SECS",
                    tracker_defaults.flush_interval.as_secs(),
                )?),
                max_user_actions: tracker_defaults.max_user_actions,
                user_id: lookup("TRACKER_USER_ID").unwrap_or(tracker_defaults.user_id),
                session_id: lookup("TRACKER_SESSION_ID"),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject zero intervals and capacities
    pub fn validate(&self) -> Result<()> {
        if self.sink.timeout_secs == 0 {
            return Err(Error::config("SINK_TIMEOUT_SECS must be greater than zero"));
        }
        if self.collector.poll_interval.is_zero() {
            return Err(Error::config("POLL_INTERVAL_SECS must be greater than zero"));
        }
        if self.collector.max_retained == 0 {
            return Err(Error::config("MAX_RETAINED must be greater than zero"));
        }
        if self.collector.storage_key.is_empty() {
            return Err(Error::config("STORAGE_KEY cannot be empty"));
        }
        if self.delivery.flush_interval.is_zero() {
            return Err(Error::config("FLUSH_INTERVAL_SECS must be greater than zero"));
        }
        if self.delivery.flush_threshold == 0 {
            return Err(Error::config("FLUSH_THRESHOLD must be greater than zero"));
        }
        if self.delivery.max_pending < self.delivery.flush_threshold {
            return Err(Error::config(format!(
                "MAX_PENDING ({}) must not be lower than FLUSH_THRESHOLD ({})",
                self.delivery.max_pending, self.delivery.flush_threshold
            )));
        }
        if self.tracker.max_queue_size == 0 {
            return Err(Error::config("TRACKER_MAX_QUEUE must be greater than zero"));
        }
        if self.tracker.flush_interval.is_zero() {
            return Err(Error::config(
                "TRACKER_FLUSH_INTERVAL_SECS must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Derive the health endpoint from the ingestion endpoint
///
/// The last path segment is replaced with `health`:
/// `http://host/api/spins` becomes `http://host/api/health`.
pub fn health_url_for(api_url: &str) -> Result<String> {
    let mut url = url::Url::parse(api_url)
        .map_err(|e| Error::config(format!("Invalid SPIN_API_URL '{}': {}", api_url, e)))?;

    url.path_segments_mut()
        .map_err(|_| Error::config(format!("SPIN_API_URL '{}' cannot have a path", api_url)))?
        .pop_if_empty()
        .pop()
        .push("health");

    Ok(url.to_string())
}

fn parse_var<F, T>(lookup: &F, name: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::config(format!("Invalid {}: {}", name, e))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_from_empty_environment() {
        let config = Config::from_vars(vars(&[])).unwrap();

        assert_eq!(config.sink.api_url, DEFAULT_SPIN_API_URL);
        assert_eq!(config.sink.health_url, "http://localhost:5000/api/health");
        assert_eq!(config.collector.poll_interval, Duration::from_secs(30));
        assert_eq!(config.collector.max_retained, 100);
        assert_eq!(config.collector.dedup_window, Duration::from_secs(10));
        assert_eq!(config.collector.storage_key, "rouletteData");
        assert!(config.collector.auto_send);
        assert_eq!(config.delivery.flush_interval, Duration::from_secs(5));
        assert_eq!(config.delivery.bulk_delay, Duration::from_millis(100));
        assert_eq!(config.tracker.max_queue_size, 100);
        assert_eq!(config.tracker.user_id, "anonymous");
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_vars(vars(&[
            ("SPIN_API_URL", "https://stats.example.com/v1/spins"),
            ("POLL_INTERVAL_SECS", "15"),
            ("MAX_RETAINED", "500"),
            ("AUTO_SEND", "false"),
            ("TABLE_NAME", "speed_roulette"),
        ]))
        .unwrap();

        assert_eq!(config.sink.health_url, "https://stats.example.com/v1/health");
        assert_eq!(config.collector.poll_interval, Duration::from_secs(15));
        assert_eq!(config.collector.max_retained, 500);
        assert!(!config.collector.auto_send);
        assert_eq!(config.collector.table_name, "speed_roulette");
    }

    #[test]
    fn test_explicit_health_url_wins() {
        let config = Config::from_vars(vars(&[(
            "SPIN_HEALTH_URL",
            "http://localhost:5000/status",
        )]))
        .unwrap();
        assert_eq!(config.sink.health_url, "http://localhost:5000/status");
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let err = Config::from_vars(vars(&[("MAX_RETAINED", "lots")])).unwrap_err();
        assert!(err.to_string().contains("MAX_RETAINED"));
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        assert!(Config::from_vars(vars(&[("POLL_INTERVAL_SECS", "0")])).is_err());
        assert!(Config::from_vars(vars(&[("FLUSH_THRESHOLD", "0")])).is_err());
    }

    #[test]
    fn test_pending_cap_below_threshold_is_rejected() {
        let result = Config::from_vars(vars(&[
            ("FLUSH_THRESHOLD", "50"),
            ("MAX_PENDING", "10"),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn test_health_url_for() {
        assert_eq!(
            health_url_for("http://localhost:5000/api/spins").unwrap(),
            "http://localhost:5000/api/health"
        );
        assert_eq!(
            health_url_for("http://localhost:5000/api/spins/").unwrap(),
            "http://localhost:5000/api/health"
        );
        assert!(health_url_for("not a url").is_err());
    }
}
