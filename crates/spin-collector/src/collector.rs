//! Collector instance
//!
//! Owns the spin source, the pending queue and the delivery pump, plus the
//! two background tasks driving them:
//!
//! - **Poll task**: polls the scraper every `poll_interval` and flushes as
//!   soon as the queue reaches `flush_threshold`
//! - **Flush task**: flushes whatever is pending every `flush_interval`
//!
//! Both tasks share one cancellation token. `stop` cancels them, waits for
//! them to finish and then hands the remaining queue to the sink once.

use delivery::{
    run_periodic_flush, BulkReport, DeliveryPump, DeliveryStats, EventSink, FlushMode,
    FlushOutcome, PendingQueue,
};
use shared::{Config, Spin};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use crate::error::{CollectorError, CollectorResult};
use crate::mirror::PersistenceMirror;
use crate::scrape::Scraper;
use crate::source::{PollOutcome, SpinSource};
use crate::stats::{summarize, Summary};
use crate::store::KeyValueStore;

/// Name the pending spin queue reports under in logs and metrics
pub const SPIN_QUEUE: &str = "spins";

struct RunningTasks {
    cancel_token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

/// A running (or stopped) spin collector
pub struct Collector {
    source: Arc<SpinSource>,
    pump: Arc<DeliveryPump<Spin>>,
    poll_interval: Duration,
    flush_interval: Duration,
    flush_threshold: usize,
    bulk_delay: Duration,
    running: Mutex<Option<RunningTasks>>,
}

impl Collector {
    /// Build a collector, restoring the retained list from `store`
    pub fn new(
        config: &Config,
        scraper: Arc<dyn Scraper>,
        store: Arc<dyn KeyValueStore>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let collector = &config.collector;
        let queue = Arc::new(PendingQueue::with_capacity_limit(
            SPIN_QUEUE,
            config.delivery.max_pending,
        ));

        let mut source = SpinSource::new(
            scraper,
            PersistenceMirror::new(store, &collector.storage_key),
            collector.max_retained,
            collector.dedup_window,
        )
        .with_origin(&collector.casino_name, &collector.table_name);

        if collector.auto_send {
            source = source.with_outbox(queue.clone());
        }

        tracing::info!(
            casino = %collector.casino_name,
            table = %collector.table_name,
            retained = source.len(),
            auto_send = collector.auto_send,
            "Collector created"
        );

        Self {
            source: Arc::new(source),
            pump: Arc::new(DeliveryPump::new(queue, sink)),
            poll_interval: collector.poll_interval,
            flush_interval: config.delivery.flush_interval,
            flush_threshold: config.delivery.flush_threshold,
            bulk_delay: config.delivery.bulk_delay,
            running: Mutex::new(None),
        }
    }

    /// Check the API, poll once and start the background tasks
    pub async fn start(&self) -> CollectorResult<()> {
        if self.is_running() {
            return Err(CollectorError::AlreadyRunning);
        }

        if !self.api_status().await {
            tracing::warn!("API unavailable, spins will queue until it recovers");
        }

        poll_once(&self.source, &self.pump, self.flush_threshold).await;

        let mut running = self.lock_running();
        if running.is_some() {
            return Err(CollectorError::AlreadyRunning);
        }

        let cancel_token = CancellationToken::new();
        let handles = vec![
            tokio::spawn(run_poll_loop(
                self.source.clone(),
                self.pump.clone(),
                self.poll_interval,
                self.flush_threshold,
                cancel_token.clone(),
            )),
            tokio::spawn(run_periodic_flush(
                self.pump.clone(),
                self.flush_interval,
                cancel_token.clone(),
            )),
        ];

        *running = Some(RunningTasks {
            cancel_token,
            handles,
        });

        tracing::info!(
            poll_interval_secs = self.poll_interval.as_secs(),
            flush_interval_secs = self.flush_interval.as_secs(),
            "Collector started"
        );

        Ok(())
    }

    /// Cancel the background tasks and hand the pending queue to the sink
    pub async fn stop(&self) -> DeliveryStats {
        let tasks = self.lock_running().take();

        match tasks {
            Some(tasks) => {
                tasks.cancel_token.cancel();
                for handle in tasks.handles {
                    if let Err(e) = handle.await {
                        tracing::error!(error = %e, "Collector task panicked");
                    }
                }
            }
            None => tracing::debug!("Collector was not running"),
        }

        self.pump.flush(FlushMode::Final).await;

        let stats = self.pump.stats();
        tracing::info!(
            retained = self.source.len(),
            sent = stats.sent,
            failed = stats.failed,
            "Collector stopped"
        );
        stats
    }

    pub fn is_running(&self) -> bool {
        self.lock_running().is_some()
    }

    /// Poll the scraper once outside the schedule
    pub async fn poll_now(&self) -> PollOutcome {
        poll_once(&self.source, &self.pump, self.flush_threshold).await
    }

    /// Flush the pending queue outside the schedule
    pub async fn flush_now(&self) -> FlushOutcome {
        self.pump.flush(FlushMode::Normal).await
    }

    /// Drop retained spins, pending spins, counters and the persisted copy
    pub fn clear(&self) {
        self.source.clear();
        self.pump.queue().clear();
        self.pump.reset_stats();
        tracing::info!("Collector data cleared");
    }

    /// Retained spins as pretty-printed JSON, newest first
    pub fn export_snapshot(&self) -> CollectorResult<String> {
        Ok(serde_json::to_string_pretty(&self.source.snapshot())?)
    }

    /// Summarize the retained spins
    pub fn summarize(&self, top_k: usize) -> Summary {
        summarize(&self.source.snapshot(), top_k)
    }

    /// Post every retained spin individually, pausing `bulk_delay` between requests
    pub async fn resend_all(&self) -> BulkReport {
        let spins = self.source.snapshot();
        tracing::info!(count = spins.len(), "Resending all retained spins");
        self.pump.deliver_each(&spins, self.bulk_delay).await
    }

    /// Whether the API answers its health check
    pub async fn api_status(&self) -> bool {
        self.pump.sink().health().await
    }

    pub fn delivery_stats(&self) -> DeliveryStats {
        self.pump.stats()
    }

    /// Copy of the retained spins, newest first
    pub fn retained(&self) -> Vec<Spin> {
        self.source.snapshot()
    }

    /// Copy of the spins awaiting delivery, oldest first
    pub fn pending(&self) -> Vec<Spin> {
        self.pump.queue().snapshot()
    }

    fn lock_running(&self) -> MutexGuard<'_, Option<RunningTasks>> {
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for Collector {
    fn drop(&mut self) {
        if let Some(tasks) = self.lock_running().take() {
            tasks.cancel_token.cancel();
        }
    }
}

async fn poll_once(
    source: &SpinSource,
    pump: &DeliveryPump<Spin>,
    flush_threshold: usize,
) -> PollOutcome {
    let outcome = source.poll().await;

    if matches!(outcome, PollOutcome::Accepted(_)) && pump.queue().len() >= flush_threshold {
        pump.flush(FlushMode::Normal).await;
    }

    outcome
}

/// Poll `source` every `period` until `cancel_token` fires
async fn run_poll_loop(
    source: Arc<SpinSource>,
    pump: Arc<DeliveryPump<Spin>>,
    period: Duration,
    flush_threshold: usize,
    cancel_token: CancellationToken,
) {
    let mut interval = interval(period);

    // Skip the first tick; start() already polled eagerly
    interval.tick().await;

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                tracing::info!("Poll task stopping due to shutdown");
                break;
            }
            _ = interval.tick() => {
                poll_once(&source, &pump, flush_threshold).await;
            }
        }
    }
}
