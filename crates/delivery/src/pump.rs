//! Delivery pump
//!
//! Drains a [`PendingQueue`] and hands the batch to an [`EventSink`].
//!
//! - **Normal flush**: one awaited POST. A rejected batch goes back to the
//!   front of the queue and is retried by the next flush.
//! - **Final flush**: one detached POST on shutdown. Nothing is retried after
//!   this point.
//! - **Per-item delivery**: one POST per event with a fixed delay between
//!   requests. Individual failures are tallied and skipped.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use crate::error::DeliveryResult;
use crate::metrics;
use crate::queue::PendingQueue;
use crate::sink::EventSink;

/// How a flush delivers its batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    /// Await the sink; restore the batch on failure
    Normal,
    /// Fire and forget; failures are lost
    Final,
}

/// What a flush did with the drained batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Queue was empty
    Empty,
    /// Sink accepted this many events
    Delivered(usize),
    /// Sink rejected the batch; this many events went back to the queue
    Requeued(usize),
    /// This many events were handed off without confirmation
    Detached(usize),
}

/// Shape of the body a batch is posted as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchEnvelope {
    /// `[event, ...]`
    Array,
    /// `{"<key>": [event, ...]}`
    Keyed(&'static str),
}

impl BatchEnvelope {
    fn wrap(&self, events: Vec<serde_json::Value>) -> serde_json::Value {
        match self {
            BatchEnvelope::Array => serde_json::Value::Array(events),
            BatchEnvelope::Keyed(key) => {
                let mut map = serde_json::Map::new();
                map.insert((*key).to_string(), serde_json::Value::Array(events));
                serde_json::Value::Object(map)
            }
        }
    }
}

/// Tally of a per-item delivery run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BulkReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Running delivery counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryStats {
    /// Events the sink accepted
    pub sent: u64,
    /// Events the sink rejected (counted per attempt)
    pub failed: u64,
}

/// Drains a pending queue into a sink
pub struct DeliveryPump<T> {
    queue: Arc<PendingQueue<T>>,
    sink: Arc<dyn EventSink>,
    envelope: BatchEnvelope,
    sent: AtomicU64,
    failed: AtomicU64,
}

impl<T> DeliveryPump<T>
where
    T: Serialize + Send + Sync,
{
    /// Create a pump posting bare JSON arrays
    pub fn new(queue: Arc<PendingQueue<T>>, sink: Arc<dyn EventSink>) -> Self {
        Self::with_envelope(queue, sink, BatchEnvelope::Array)
    }

    /// Create a pump posting batches in `envelope`
    pub fn with_envelope(
        queue: Arc<PendingQueue<T>>,
        sink: Arc<dyn EventSink>,
        envelope: BatchEnvelope,
    ) -> Self {
        Self {
            queue,
            sink,
            envelope,
            sent: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Queue this pump drains
    pub fn queue(&self) -> &Arc<PendingQueue<T>> {
        &self.queue
    }

    /// Sink this pump delivers to
    pub fn sink(&self) -> &Arc<dyn EventSink> {
        &self.sink
    }

    /// Drain the queue and deliver the batch
    pub async fn flush(&self, mode: FlushMode) -> FlushOutcome {
        let batch = self.queue.drain_all();
        if batch.is_empty() {
            return FlushOutcome::Empty;
        }

        let count = batch.len();
        let body = match self.encode_batch(&batch) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(
                    queue = self.queue.name(),
                    count = count,
                    error = %e,
                    "Failed to encode batch, restoring to queue"
                );
                self.queue.restore(batch);
                return FlushOutcome::Requeued(count);
            }
        };

        match mode {
            FlushMode::Final => {
                tracing::info!(
                    queue = self.queue.name(),
                    count = count,
                    "Final flush, delivering without confirmation"
                );
                self.sink.post_detached(body);
                FlushOutcome::Detached(count)
            }
            FlushMode::Normal => match self.sink.post(&body).await {
                Ok(()) => {
                    self.sent.fetch_add(count as u64, Ordering::Relaxed);
                    metrics::record_delivered(self.queue.name(), count);
                    tracing::debug!(queue = self.queue.name(), count = count, "Batch delivered");
                    FlushOutcome::Delivered(count)
                }
                Err(e) => {
                    self.failed.fetch_add(count as u64, Ordering::Relaxed);
                    metrics::record_failure(self.queue.name());
                    tracing::warn!(
                        queue = self.queue.name(),
                        count = count,
                        retryable = e.is_retryable(),
                        error = %e,
                        "Batch delivery failed, restoring to queue"
                    );
                    self.queue.restore(batch);
                    FlushOutcome::Requeued(count)
                }
            },
        }
    }

    /// Deliver a single event, bypassing the queue
    pub async fn deliver_one(&self, item: &T) -> DeliveryResult<()> {
        let body = serde_json::to_value(item)?;
        match self.sink.post(&body).await {
            Ok(()) => {
                self.sent.fetch_add(1, Ordering::Relaxed);
                metrics::record_delivered(self.queue.name(), 1);
                Ok(())
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                metrics::record_failure(self.queue.name());
                Err(e)
            }
        }
    }

    /// Deliver events one at a time with `delay` between requests
    ///
    /// Never aborts early: every item is attempted exactly once.
    pub async fn deliver_each(&self, items: &[T], delay: Duration) -> BulkReport {
        let mut report = BulkReport::default();

        for (index, item) in items.iter().enumerate() {
            report.attempted += 1;

            match self.deliver_one(item).await {
                Ok(()) => report.succeeded += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(
                        queue = self.queue.name(),
                        index = index,
                        error = %e,
                        "Bulk delivery item failed, continuing"
                    );
                }
            }

            if index + 1 < items.len() && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        tracing::info!(
            queue = self.queue.name(),
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failed,
            "Bulk delivery finished"
        );

        report
    }

    /// Current delivery counters
    pub fn stats(&self) -> DeliveryStats {
        DeliveryStats {
            sent: self.sent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    /// Zero the delivery counters
    pub fn reset_stats(&self) {
        self.sent.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
    }

    fn encode_batch(&self, batch: &[T]) -> DeliveryResult<serde_json::Value> {
        let events = batch
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self.envelope.wrap(events))
    }
}

/// Flush `pump` every `period` until `cancel_token` fires
///
/// The first tick is skipped; callers flush eagerly themselves if needed.
pub async fn run_periodic_flush<T>(
    pump: Arc<DeliveryPump<T>>,
    period: Duration,
    cancel_token: CancellationToken,
) where
    T: Serialize + Send + Sync,
{
    let mut interval = interval(period);

    // Skip the first tick (which fires immediately)
    interval.tick().await;

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                tracing::info!(queue = pump.queue().name(), "Flush task stopping due to shutdown");
                break;
            }
            _ = interval.tick() => {
                pump.flush(FlushMode::Normal).await;
            }
        }
    }
}
