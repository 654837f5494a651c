//! Pending event queue
//!
//! Ordered buffer of events awaiting delivery. Every operation takes the lock
//! once and never across an `.await`, so append, drain and restore are atomic
//! with respect to each other.
//!
//! # Overflow
//!
//! The queue is capped. When the sink stays unreachable the queue would
//! otherwise grow without bound; past `max_pending` the oldest events are
//! dropped and counted.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::metrics;

/// Default cap on pending events
pub const DEFAULT_MAX_PENDING: usize = 10_000;

/// FIFO of events awaiting delivery
#[derive(Debug)]
pub struct PendingQueue<T> {
    name: &'static str,
    events: Mutex<VecDeque<T>>,
    max_pending: usize,
    dropped: AtomicU64,
}

impl<T> PendingQueue<T> {
    /// Create a queue with the default cap
    ///
    /// # Arguments
    ///
    /// * `name` - Queue name used in logs and metric labels
    pub fn new(name: &'static str) -> Self {
        Self::with_capacity_limit(name, DEFAULT_MAX_PENDING)
    }

    /// Create a queue holding at most `max_pending` events
    pub fn with_capacity_limit(name: &'static str, max_pending: usize) -> Self {
        Self {
            name,
            events: Mutex::new(VecDeque::new()),
            max_pending: max_pending.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    /// Queue name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Add an event at the tail
    pub fn append(&self, event: T) {
        let depth = {
            let mut events = self.lock();
            events.push_back(event);
            let overflow = events.len().saturating_sub(self.max_pending);
            events.drain(..overflow);
            self.note_dropped(overflow);
            events.len()
        };

        metrics::record_appended(self.name);
        metrics::set_queue_depth(self.name, depth);
    }

    /// Capture and clear the whole queue
    ///
    /// An event is returned by at most one drain.
    pub fn drain_all(&self) -> Vec<T> {
        let batch: Vec<T> = {
            let mut events = self.lock();
            std::mem::take(&mut *events).into()
        };

        metrics::set_queue_depth(self.name, 0);
        batch
    }

    /// Put a batch back at the front, preserving its order
    ///
    /// Events appended since the batch was drained end up after it.
    pub fn restore(&self, batch: Vec<T>) {
        if batch.is_empty() {
            return;
        }

        let depth = {
            let mut events = self.lock();
            for event in batch.into_iter().rev() {
                events.push_front(event);
            }
            let overflow = events.len().saturating_sub(self.max_pending);
            events.drain(..overflow);
            self.note_dropped(overflow);
            events.len()
        };

        metrics::set_queue_depth(self.name, depth);
    }

    /// Discard every pending event
    pub fn clear(&self) {
        self.lock().clear();
        metrics::set_queue_depth(self.name, 0);
    }

    /// Number of pending events
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True when nothing is pending
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Total events dropped by the cap since creation
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn note_dropped(&self, count: usize) {
        if count == 0 {
            return;
        }
        self.dropped.fetch_add(count as u64, Ordering::Relaxed);
        metrics::record_dropped(self.name, count);
        tracing::warn!(
            queue = self.name,
            dropped = count,
            max_pending = self.max_pending,
            "Pending queue full, dropped oldest events"
        );
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        // A panic while holding the lock cannot leave the deque half-updated
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T: Clone> PendingQueue<T> {
    /// Copy of the pending events, oldest first
    pub fn snapshot(&self) -> Vec<T> {
        self.lock().iter().cloned().collect()
    }
}
