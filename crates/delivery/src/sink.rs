//! Delivery sinks
//!
//! A sink accepts JSON bodies over HTTP. The pump decides what a body looks
//! like (a batch envelope or a single event); the sink only transports it.

use async_trait::async_trait;
use reqwest::{header, Client};
use shared::SinkConfig;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{DeliveryError, DeliveryResult};

/// Default timeout in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Maximum URL length
const MAX_URL_LENGTH: usize = 2048;

/// Event sink trait for testability
#[async_trait]
pub trait EventSink: Send + Sync {
    /// POST a JSON body and wait for the sink to accept it
    async fn post(&self, body: &serde_json::Value) -> DeliveryResult<()>;

    /// POST a JSON body without waiting for the outcome
    ///
    /// Used on shutdown. Whatever happens to the request is not observed.
    fn post_detached(&self, body: serde_json::Value);

    /// Check whether the sink is reachable and healthy
    async fn health(&self) -> bool;
}

/// Validate URL format
fn validate_url(url: &str) -> DeliveryResult<()> {
    if url.is_empty() {
        return Err(DeliveryError::invalid_config("URL cannot be empty"));
    }

    if url.len() > MAX_URL_LENGTH {
        return Err(DeliveryError::invalid_config(format!(
            "URL too long: {} characters (max: {})",
            url.len(),
            MAX_URL_LENGTH
        )));
    }

    let parsed = url::Url::parse(url)
        .map_err(|e| DeliveryError::invalid_config(format!("Invalid URL format: {}", e)))?;

    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(DeliveryError::invalid_config(format!(
            "Unsupported URL scheme: {} (only http/https allowed)",
            parsed.scheme()
        )));
    }

    Ok(())
}

/// Reqwest-based sink posting to a fixed endpoint
#[derive(Clone)]
pub struct HttpSink {
    client: Client,
    endpoint: String,
    health_url: Option<String>,
    timeout: Duration,
}

impl HttpSink {
    /// Create a sink for `endpoint` with connection pooling
    pub fn new(endpoint: &str) -> DeliveryResult<Self> {
        validate_url(endpoint)?;

        let client = Client::builder()
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("spin-relay/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                DeliveryError::invalid_config(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            health_url: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        })
    }

    /// Create a sink from the remote API configuration
    pub fn from_config(config: &SinkConfig) -> DeliveryResult<Self> {
        Ok(Self::new(&config.api_url)?
            .with_health_url(&config.health_url)?
            .with_timeout(Duration::from_secs(config.timeout_secs)))
    }

    /// Answer health checks from `health_url` with a GET
    pub fn with_health_url(mut self, health_url: &str) -> DeliveryResult<Self> {
        validate_url(health_url)?;
        self.health_url = Some(health_url.to_string());
        Ok(self)
    }

    /// Override the per-request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Endpoint bodies are posted to
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl EventSink for HttpSink {
    async fn post(&self, body: &serde_json::Value) -> DeliveryResult<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .header(header::CONTENT_TYPE, "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DeliveryError::http(format!(
                        "Request timeout after {}s",
                        self.timeout.as_secs()
                    ))
                } else if e.is_connect() {
                    DeliveryError::http("Connection failed")
                } else {
                    DeliveryError::http(format!("HTTP request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(DeliveryError::status(status.as_u16(), text));
        }

        tracing::debug!(
            endpoint = %self.endpoint,
            status = status.as_u16(),
            "Sink accepted body"
        );

        Ok(())
    }

    fn post_detached(&self, body: serde_json::Value) {
        let request = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .header(header::CONTENT_TYPE, "application/json")
            .json(&body);

        tokio::spawn(async move {
            // Outcome intentionally unobserved
            let _ = request.send().await;
        });
    }

    async fn health(&self) -> bool {
        let Some(url) = &self.health_url else {
            return false;
        };

        match self.client.get(url).timeout(self.timeout).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::info!(url = %url, "API is reachable");
                true
            }
            Ok(response) => {
                tracing::warn!(
                    url = %url,
                    status = response.status().as_u16(),
                    "API health check returned an error status"
                );
                false
            }
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "API is unreachable");
                false
            }
        }
    }
}

/// Scripted sink for tests
///
/// Records every body it receives. Failures are scripted per call number
/// (1-indexed, counting both accepted and rejected calls) or globally.
#[derive(Clone, Default)]
pub struct InMemorySink {
    received: Arc<Mutex<Vec<serde_json::Value>>>,
    detached: Arc<Mutex<Vec<serde_json::Value>>>,
    failing_calls: Arc<Mutex<VecDeque<usize>>>,
    fail_all: Arc<Mutex<bool>>,
    calls: Arc<Mutex<usize>>,
    healthy: Arc<Mutex<bool>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        let sink = Self::default();
        *sink.healthy.lock().unwrap() = true;
        sink
    }

    /// Reject every call until `set_failing(false)`
    pub fn set_failing(&self, failing: bool) {
        *self.fail_all.lock().unwrap() = failing;
    }

    /// Reject the given call numbers (1-indexed)
    pub fn fail_calls(self, calls: &[usize]) -> Self {
        self.failing_calls.lock().unwrap().extend(calls.iter().copied());
        self
    }

    /// Report the given health state
    pub fn set_healthy(&self, healthy: bool) {
        *self.healthy.lock().unwrap() = healthy;
    }

    /// Bodies accepted by `post`
    pub fn received(&self) -> Vec<serde_json::Value> {
        self.received.lock().unwrap().clone()
    }

    /// Bodies handed to `post_detached`
    pub fn detached(&self) -> Vec<serde_json::Value> {
        self.detached.lock().unwrap().clone()
    }

    /// Number of `post` calls, accepted or not
    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl EventSink for InMemorySink {
    async fn post(&self, body: &serde_json::Value) -> DeliveryResult<()> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            *calls
        };

        let scripted = self.failing_calls.lock().unwrap().contains(&call);
        if scripted || *self.fail_all.lock().unwrap() {
            return Err(DeliveryError::status(503, "scripted failure"));
        }

        self.received.lock().unwrap().push(body.clone());
        Ok(())
    }

    fn post_detached(&self, body: serde_json::Value) {
        self.detached.lock().unwrap().push(body);
    }

    async fn health(&self) -> bool {
        *self.healthy.lock().unwrap()
    }
}
