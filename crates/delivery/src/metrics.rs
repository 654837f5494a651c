//! Delivery metrics
//!
//! Thin wrappers over the `metrics` facade. Nothing is recorded unless the
//! embedding binary installs a recorder.
//!
//! Label cardinality is bounded: the only label is the queue name, which is
//! a static string chosen by the producer.

/// Record an event appended to a pending queue
pub fn record_appended(queue: &'static str) {
    metrics::counter!("delivery_events_appended_total", "queue" => queue).increment(1);
}

/// Record events dropped by the pending queue cap
pub fn record_dropped(queue: &'static str, count: usize) {
    metrics::counter!("delivery_events_dropped_total", "queue" => queue).increment(count as u64);
}

/// Record events delivered to the sink
pub fn record_delivered(queue: &'static str, count: usize) {
    metrics::counter!("delivery_events_delivered_total", "queue" => queue)
        .increment(count as u64);
}

/// Record a failed delivery attempt
pub fn record_failure(queue: &'static str) {
    metrics::counter!("delivery_failures_total", "queue" => queue).increment(1);
}

/// Update the pending queue depth
pub fn set_queue_depth(queue: &'static str, depth: usize) {
    metrics::gauge!("delivery_queue_depth", "queue" => queue).set(depth as f64);
}
