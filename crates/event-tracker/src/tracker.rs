//! Event tracker
//!
//! Records instrumentation events into a pending queue and ships them to the
//! events endpoint as `{"events": [...]}` batches. A batch goes out when the
//! periodic flush fires, when the queue reaches `max_queue_size`, or right
//! away after an error-level event.

use chrono::{DateTime, Utc};
use delivery::{
    run_periodic_flush, BatchEnvelope, DeliveryPump, EventSink, FlushMode, FlushOutcome,
    HttpSink, PendingQueue,
};
use serde::Serialize;
use serde_json::{json, Value};
use shared::{EventLevel, TrackedEvent, TrackerConfig};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{TrackerError, TrackerResult};

/// Name the pending event queue reports under in logs and metrics
pub const EVENT_QUEUE: &str = "events";

/// User actions attached to every error event
const ERROR_ACTION_COUNT: usize = 10;

/// User actions included in the error context
const CONTEXT_ACTION_COUNT: usize = 20;

/// Generate a fresh session identifier
pub fn generate_session_id() -> String {
    format!("session_{}", Uuid::new_v4().simple())
}

/// Entry in the user action history
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserAction {
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub details: Value,
}

/// Snapshot handed to error reporting
#[derive(Debug, Clone, Serialize)]
pub struct ErrorContext {
    pub user_actions: Vec<UserAction>,
    pub session_id: String,
    pub user_id: String,
    pub time_on_page_ms: u64,
}

/// Batches tracked events to a remote endpoint
pub struct EventTracker {
    pump: Arc<DeliveryPump<TrackedEvent>>,
    session_id: String,
    user_id: String,
    max_queue_size: usize,
    flush_interval: Duration,
    max_user_actions: usize,
    user_actions: Mutex<VecDeque<UserAction>>,
    started_at: Instant,
    flush_task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl EventTracker {
    /// Create a tracker delivering to `sink`
    pub fn new(config: &TrackerConfig, sink: Arc<dyn EventSink>) -> Self {
        let queue = Arc::new(PendingQueue::new(EVENT_QUEUE));
        let session_id = config
            .session_id
            .clone()
            .unwrap_or_else(generate_session_id);

        Self {
            pump: Arc::new(DeliveryPump::with_envelope(
                queue,
                sink,
                BatchEnvelope::Keyed("events"),
            )),
            session_id,
            user_id: config.user_id.clone(),
            max_queue_size: config.max_queue_size,
            flush_interval: config.flush_interval,
            max_user_actions: config.max_user_actions,
            user_actions: Mutex::new(VecDeque::new()),
            started_at: Instant::now(),
            flush_task: Mutex::new(None),
        }
    }

    /// Create a tracker posting to the configured endpoint over HTTP
    pub fn connect(config: &TrackerConfig) -> TrackerResult<Self> {
        let sink = HttpSink::new(&config.endpoint)?;
        Ok(Self::new(config, Arc::new(sink)))
    }

    /// Start the periodic flush and record `tracker_initialized`
    pub async fn start(&self) -> TrackerResult<()> {
        {
            let mut task = self.lock_flush_task();
            if task.is_some() {
                return Err(TrackerError::AlreadyStarted);
            }

            let cancel_token = CancellationToken::new();
            let handle = tokio::spawn(run_periodic_flush(
                self.pump.clone(),
                self.flush_interval,
                cancel_token.clone(),
            ));
            *task = Some((cancel_token, handle));
        }

        tracing::info!(
            session_id = %self.session_id,
            user_id = %self.user_id,
            "Event tracker initialized"
        );

        self.track(
            "tracker_initialized",
            json!({ "version": env!("CARGO_PKG_VERSION") }),
            EventLevel::Info,
        )
        .await;

        Ok(())
    }

    /// Record an event
    ///
    /// Error-level events and a full queue trigger an immediate flush.
    pub async fn track(&self, event_type: &str, details: Value, level: EventLevel) -> TrackedEvent {
        let event = TrackedEvent::new(
            event_type,
            level,
            &self.session_id,
            &self.user_id,
            details,
            self.time_on_page_ms(),
        );

        self.pump.queue().append(event.clone());
        self.remember(&event);

        tracing::debug!(event_type = %event.event_type, level = %level, "Event tracked");

        if level == EventLevel::Error || self.pump.queue().len() >= self.max_queue_size {
            self.pump.flush(FlushMode::Normal).await;
        }

        event
    }

    /// Record an error event carrying the most recent user actions
    pub async fn track_error(&self, event_type: &str, details: Value) -> TrackedEvent {
        let recent = self.user_actions(ERROR_ACTION_COUNT);
        let details = with_field(details, "userActions", json!(recent));
        self.track(event_type, details, EventLevel::Error).await
    }

    /// Record a `button_click` event
    pub async fn track_button_click(&self, button_id: &str, extra: Value) -> TrackedEvent {
        let details = with_field(extra, "buttonId", json!(button_id));
        self.track("button_click", details, EventLevel::Info).await
    }

    /// Record a `form_submit` event
    ///
    /// Only field names are recorded, never their values.
    pub async fn track_form_submit(
        &self,
        form_id: &str,
        form_data: &serde_json::Map<String, Value>,
    ) -> TrackedEvent {
        let fields: Vec<&String> = form_data.keys().collect();
        self.track(
            "form_submit",
            json!({ "formId": form_id, "fields": fields }),
            EventLevel::Info,
        )
        .await
    }

    /// Record an application-defined event
    pub async fn track_custom(&self, event_name: &str, data: Value) -> TrackedEvent {
        self.track(event_name, data, EventLevel::Info).await
    }

    /// The `count` most recent user actions, oldest first
    pub fn user_actions(&self, count: usize) -> Vec<UserAction> {
        let actions = self.lock_user_actions();
        let skip = actions.len().saturating_sub(count);
        actions.iter().skip(skip).cloned().collect()
    }

    /// Context for attaching to an externally reported error
    pub fn error_context(&self) -> ErrorContext {
        ErrorContext {
            user_actions: self.user_actions(CONTEXT_ACTION_COUNT),
            session_id: self.session_id.clone(),
            user_id: self.user_id.clone(),
            time_on_page_ms: self.time_on_page_ms(),
        }
    }

    /// Flush pending events now
    pub async fn flush(&self) -> FlushOutcome {
        self.pump.flush(FlushMode::Normal).await
    }

    /// Stop the periodic flush and hand what is left to the sink once
    pub async fn destroy(&self) -> FlushOutcome {
        let task = self.lock_flush_task().take();
        if let Some((cancel_token, handle)) = task {
            cancel_token.cancel();
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Tracker flush task panicked");
            }
        }

        let outcome = self.pump.flush(FlushMode::Final).await;
        let stats = self.pump.stats();
        tracing::info!(
            session_id = %self.session_id,
            sent = stats.sent,
            failed = stats.failed,
            "Event tracker destroyed"
        );
        outcome
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Copy of the events awaiting delivery, oldest first
    pub fn pending(&self) -> Vec<TrackedEvent> {
        self.pump.queue().snapshot()
    }

    fn remember(&self, event: &TrackedEvent) {
        let mut actions = self.lock_user_actions();
        actions.push_back(UserAction {
            event_type: event.event_type.clone(),
            timestamp: event.timestamp,
            details: event.details.clone(),
        });
        while actions.len() > self.max_user_actions {
            actions.pop_front();
        }
    }

    fn time_on_page_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    fn lock_user_actions(&self) -> MutexGuard<'_, VecDeque<UserAction>> {
        self.user_actions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_flush_task(&self) -> MutexGuard<'_, Option<(CancellationToken, JoinHandle<()>)>> {
        self.flush_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for EventTracker {
    fn drop(&mut self) {
        if let Some((cancel_token, _)) = self.lock_flush_task().take() {
            cancel_token.cancel();
        }
    }
}

/// Insert `key` into an object, wrapping non-object details under `value`
fn with_field(details: Value, key: &str, field: Value) -> Value {
    let mut map = match details {
        Value::Object(map) => map,
        Value::Null => serde_json::Map::new(),
        other => {
            let mut map = serde_json::Map::new();
            map.insert("value".to_string(), other);
            map
        }
    };
    map.insert(key.to_string(), field);
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use delivery::InMemorySink;

    fn tracker_with(sink: &InMemorySink, max_queue_size: usize) -> EventTracker {
        let config = TrackerConfig {
            max_queue_size,
            flush_interval: Duration::from_secs(3600),
            ..TrackerConfig::default()
        };
        EventTracker::new(&config, Arc::new(sink.clone()))
    }

    #[test]
    fn test_generated_session_id_format() {
        let id = generate_session_id();
        assert!(id.starts_with("session_"));
        assert_ne!(id, generate_session_id());
    }

    #[test]
    fn test_configured_session_id_is_kept() {
        let config = TrackerConfig {
            session_id: Some("session_resumed".to_string()),
            ..TrackerConfig::default()
        };
        let tracker = EventTracker::new(&config, Arc::new(InMemorySink::new()));
        assert_eq!(tracker.session_id(), "session_resumed");
        assert_eq!(tracker.user_id(), "anonymous");
    }

    #[test]
    fn test_with_field() {
        assert_eq!(with_field(json!({"a": 1}), "b", json!(2)), json!({"a": 1, "b": 2}));
        assert_eq!(with_field(Value::Null, "b", json!(2)), json!({"b": 2}));
        assert_eq!(with_field(json!("x"), "b", json!(2)), json!({"value": "x", "b": 2}));
    }

    #[tokio::test]
    async fn test_info_events_wait_for_flush() {
        let sink = InMemorySink::new();
        let tracker = tracker_with(&sink, 100);

        tracker.track_custom("spin_viewed", json!({"table": 1})).await;

        assert_eq!(sink.call_count(), 0);
        assert_eq!(tracker.pending().len(), 1);
    }

    #[tokio::test]
    async fn test_full_queue_flushes() {
        let sink = InMemorySink::new();
        let tracker = tracker_with(&sink, 3);

        for i in 0..3 {
            tracker.track_custom("tick", json!({ "i": i })).await;
        }

        assert_eq!(sink.call_count(), 1);
        assert_eq!(sink.received()[0]["events"].as_array().unwrap().len(), 3);
        assert!(tracker.pending().is_empty());
    }

    #[tokio::test]
    async fn test_error_event_flushes_immediately_with_actions() {
        let sink = InMemorySink::new();
        let tracker = tracker_with(&sink, 100);

        for i in 0..12 {
            tracker.track_button_click(&format!("btn-{}", i), json!({})).await;
        }
        tracker
            .track_error("js_error", json!({"message": "boom"}))
            .await;

        assert_eq!(sink.call_count(), 1);
        let events = sink.received()[0]["events"].as_array().unwrap().clone();
        assert_eq!(events.len(), 13);

        let error = &events[12];
        assert_eq!(error["level"], json!("error"));
        assert_eq!(error["details"]["message"], json!("boom"));
        let actions = error["details"]["userActions"].as_array().unwrap();
        assert_eq!(actions.len(), 10);
        assert_eq!(actions[0]["details"]["buttonId"], json!("btn-2"));
        assert_eq!(actions[9]["details"]["buttonId"], json!("btn-11"));
    }

    #[tokio::test]
    async fn test_failed_error_flush_keeps_events() {
        let sink = InMemorySink::new();
        sink.set_failing(true);
        let tracker = tracker_with(&sink, 100);

        tracker.track_custom("a", json!({})).await;
        tracker.track_error("js_error", json!({})).await;

        let pending: Vec<String> = tracker.pending().into_iter().map(|e| e.event_type).collect();
        assert_eq!(pending, vec!["a".to_string(), "js_error".to_string()]);
    }

    #[tokio::test]
    async fn test_user_action_history_is_bounded() {
        let sink = InMemorySink::new();
        let tracker = tracker_with(&sink, 1000);

        for i in 0..60 {
            tracker.track_custom("tick", json!({ "i": i })).await;
        }

        let actions = tracker.user_actions(100);
        assert_eq!(actions.len(), 50);
        assert_eq!(actions[0].details["i"], json!(10));
        assert_eq!(tracker.error_context().user_actions.len(), 20);
    }

    #[tokio::test]
    async fn test_form_submit_records_field_names_only() {
        let sink = InMemorySink::new();
        let tracker = tracker_with(&sink, 100);

        let mut form = serde_json::Map::new();
        form.insert("email".to_string(), json!("player@example.com"));
        form.insert("amount".to_string(), json!(50));

        let event = tracker.track_form_submit("deposit", &form).await;

        assert_eq!(event.details["formId"], json!("deposit"));
        let fields = event.details["fields"].as_array().unwrap();
        assert_eq!(fields.len(), 2);
        assert!(fields.contains(&json!("email")));
        assert!(!event.details.to_string().contains("player@example.com"));
    }

    #[tokio::test]
    async fn test_start_then_destroy() {
        let sink = InMemorySink::new();
        let tracker = tracker_with(&sink, 100);

        tracker.start().await.unwrap();
        assert!(matches!(tracker.start().await, Err(TrackerError::AlreadyStarted)));

        tracker.track_custom("page_visibility", json!({"state": "hidden"})).await;
        // tracker_initialized from the first start plus the custom event
        assert_eq!(tracker.destroy().await, FlushOutcome::Detached(2));

        let body = &sink.detached()[0];
        assert_eq!(body["events"][0]["type"], json!("tracker_initialized"));
        assert_eq!(tracker.destroy().await, FlushOutcome::Empty);
    }

    #[tokio::test]
    async fn test_error_context_carries_identity() {
        let sink = InMemorySink::new();
        let tracker = tracker_with(&sink, 100);
        tracker.track_custom("click", json!({})).await;

        let context = tracker.error_context();
        assert_eq!(context.session_id, tracker.session_id());
        assert_eq!(context.user_id, "anonymous");
        assert_eq!(context.user_actions[0].event_type, "click");
    }
}
