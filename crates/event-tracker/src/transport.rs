//! Observed HTTP transport
//!
//! `ObservedClient` wraps a reqwest client and reports every exchange to the
//! observers registered on it. Only requests sent through the wrapper are
//! seen; other clients in the process are unaffected.

use async_trait::async_trait;
use reqwest::{Client, Method, Response};
use serde_json::json;
use shared::EventLevel;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{TrackerError, TrackerResult};
use crate::tracker::EventTracker;

/// How a request ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeOutcome {
    /// A response arrived (any status)
    Response { status: u16 },
    /// No response: connection, timeout or protocol failure
    Failed { error: String },
}

/// One observed request/response exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub method: String,
    pub url: String,
    pub duration: Duration,
    pub outcome: ExchangeOutcome,
}

/// Receives every exchange made through an [`ObservedClient`]
#[async_trait]
pub trait RequestObserver: Send + Sync {
    async fn observe(&self, exchange: &Exchange);
}

/// HTTP client reporting its traffic to registered observers
pub struct ObservedClient {
    client: Client,
    observers: Vec<Arc<dyn RequestObserver>>,
}

impl ObservedClient {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            observers: Vec::new(),
        }
    }

    /// Register an observer; observers are notified in registration order
    pub fn register(&mut self, observer: Arc<dyn RequestObserver>) {
        self.observers.push(observer);
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Send a GET request
    pub async fn get(&self, url: &str) -> TrackerResult<Response> {
        self.send(Method::GET, url, None).await
    }

    /// Send a POST request with a JSON body
    pub async fn post_json(&self, url: &str, body: &serde_json::Value) -> TrackerResult<Response> {
        self.send(Method::POST, url, Some(body)).await
    }

    /// Send a request and report the exchange
    pub async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> TrackerResult<Response> {
        let mut request = self.client.request(method.clone(), url);
        if let Some(body) = body {
            request = request.json(body);
        }

        let started = Instant::now();
        let result = request.send().await;
        let duration = started.elapsed();

        let outcome = match &result {
            Ok(response) => ExchangeOutcome::Response {
                status: response.status().as_u16(),
            },
            Err(e) => ExchangeOutcome::Failed {
                error: e.to_string(),
            },
        };

        let exchange = Exchange {
            method: method.to_string(),
            url: url.to_string(),
            duration,
            outcome,
        };
        for observer in &self.observers {
            observer.observe(&exchange).await;
        }

        result.map_err(|e| TrackerError::http(format!("Request to {} failed: {}", url, e)))
    }
}

#[async_trait]
impl RequestObserver for EventTracker {
    async fn observe(&self, exchange: &Exchange) {
        let duration_ms = exchange.duration.as_secs_f64() * 1000.0;

        match &exchange.outcome {
            ExchangeOutcome::Response { status } => {
                self.track(
                    "network_request",
                    json!({
                        "url": exchange.url,
                        "method": exchange.method,
                        "status": status,
                        "duration": duration_ms,
                        "ok": (200..300).contains(status),
                    }),
                    EventLevel::Info,
                )
                .await;
            }
            ExchangeOutcome::Failed { error } => {
                self.track(
                    "network_error",
                    json!({
                        "url": exchange.url,
                        "method": exchange.method,
                        "duration": duration_ms,
                        "error": error,
                    }),
                    EventLevel::Error,
                )
                .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;
    use mockall::predicate::function;

    mock! {
        pub Observer {}

        #[async_trait]
        impl RequestObserver for Observer {
            async fn observe(&self, exchange: &Exchange);
        }
    }

    #[tokio::test]
    async fn test_failed_request_is_observed_and_returned() {
        let mut observer = MockObserver::new();
        observer
            .expect_observe()
            .with(function(|exchange: &Exchange| {
                exchange.method == "GET"
                    && matches!(exchange.outcome, ExchangeOutcome::Failed { .. })
            }))
            .times(1)
            .returning(|_| ());

        let mut client = ObservedClient::new(Client::new());
        client.register(Arc::new(observer));

        // Nothing listens on port 1
        let result = client.get("http://127.0.0.1:1/api/spins").await;
        assert!(matches!(result, Err(TrackerError::Http(_))));
    }

    #[tokio::test]
    async fn test_without_observers_requests_still_fail_normally() {
        let client = ObservedClient::new(Client::new());
        assert_eq!(client.observer_count(), 0);
        assert!(client.post_json("http://127.0.0.1:1/", &json!({})).await.is_err());
    }
}
