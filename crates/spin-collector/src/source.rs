//! Deduplicating spin source
//!
//! Each poll asks the scraper for the latest outcome and turns it into at
//! most one new [`Spin`]. A number is only accepted when it is a valid
//! pocket and has not been seen within the dedup window; the history widget
//! keeps showing the same number until the wheel spins again.

use chrono::{DateTime, Utc};
use delivery::PendingQueue;
use shared::{Spin, MAX_NUMBER};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::mirror::PersistenceMirror;
use crate::scrape::Scraper;

/// What a single poll did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nothing shown, or the scrape failed
    Absent,
    /// Scraper reported a number that is not a pocket
    OutOfRange(i64),
    /// Number already seen within the dedup window
    Duplicate(u8),
    /// New spin retained (and queued when forwarding is on)
    Accepted(Spin),
}

/// Newest-first list of observed spins, bounded by `max_retained`
#[derive(Debug, Clone)]
pub struct RetainedList {
    spins: Vec<Spin>,
    max_retained: usize,
}

impl RetainedList {
    pub fn new(max_retained: usize) -> Self {
        Self {
            spins: Vec::new(),
            max_retained,
        }
    }

    /// Rebuild from persisted spins, dropping anything past the bound
    pub fn from_spins(mut spins: Vec<Spin>, max_retained: usize) -> Self {
        spins.truncate(max_retained);
        Self {
            spins,
            max_retained,
        }
    }

    /// Insert at the front, evicting the oldest spins over the bound
    pub fn push_front(&mut self, spin: Spin) {
        self.spins.insert(0, spin);
        self.spins.truncate(self.max_retained);
    }

    /// Whether `number` was observed within `window` of `now`
    pub fn seen_within(&self, number: u8, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        self.spins
            .iter()
            .any(|spin| spin.number == number && (now - spin.timestamp).abs() < window)
    }

    pub fn as_slice(&self) -> &[Spin] {
        &self.spins
    }

    pub fn len(&self) -> usize {
        self.spins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spins.is_empty()
    }

    pub fn clear(&mut self) {
        self.spins.clear();
    }
}

/// Polls a scraper and feeds accepted spins to the retained list, the
/// persistence mirror and (optionally) the pending queue
pub struct SpinSource {
    scraper: Arc<dyn Scraper>,
    retained: Mutex<RetainedList>,
    mirror: PersistenceMirror,
    outbox: Option<Arc<PendingQueue<Spin>>>,
    dedup_window: chrono::Duration,
    casino: String,
    table: String,
}

impl SpinSource {
    /// Create a source seeded from the persistence mirror
    pub fn new(
        scraper: Arc<dyn Scraper>,
        mirror: PersistenceMirror,
        max_retained: usize,
        dedup_window: Duration,
    ) -> Self {
        let retained = RetainedList::from_spins(mirror.load(), max_retained);

        Self {
            scraper,
            retained: Mutex::new(retained),
            mirror,
            outbox: None,
            dedup_window: chrono::Duration::from_std(dedup_window)
                .unwrap_or(chrono::Duration::MAX),
            casino: String::new(),
            table: String::new(),
        }
    }

    /// Tag accepted spins with `casino` and `table`
    pub fn with_origin(mut self, casino: &str, table: &str) -> Self {
        self.casino = casino.to_string();
        self.table = table.to_string();
        self
    }

    /// Append accepted spins to `queue`
    pub fn with_outbox(mut self, queue: Arc<PendingQueue<Spin>>) -> Self {
        self.outbox = Some(queue);
        self
    }

    /// Poll once, stamping an accepted spin with the current time
    pub async fn poll(&self) -> PollOutcome {
        self.poll_at(Utc::now()).await
    }

    /// Poll once, treating `now` as the observation time
    pub async fn poll_at(&self, now: DateTime<Utc>) -> PollOutcome {
        let raw = match self.scraper.scrape().await {
            Ok(Some(raw)) => raw,
            Ok(None) => return PollOutcome::Absent,
            Err(e) => {
                tracing::debug!(error = %e, "Scrape failed, treating as absent");
                return PollOutcome::Absent;
            }
        };

        let Some(spin) = u8::try_from(raw)
            .ok()
            .filter(|n| *n <= MAX_NUMBER)
            .and_then(|n| Spin::new(n, now, &self.casino, &self.table))
        else {
            tracing::debug!(value = raw, "Scraped value is not a pocket, ignoring");
            return PollOutcome::OutOfRange(raw);
        };

        // Check and insert under one lock so concurrent polls cannot both accept
        {
            let mut retained = self.lock_retained();
            if retained.seen_within(spin.number, now, self.dedup_window) {
                return PollOutcome::Duplicate(spin.number);
            }

            retained.push_front(spin.clone());
            self.mirror.save(retained.as_slice());
        }

        if let Some(queue) = &self.outbox {
            queue.append(spin.clone());
        }

        tracing::info!(
            number = spin.number,
            color = %spin.color,
            table = %spin.table,
            "New spin recorded"
        );

        PollOutcome::Accepted(spin)
    }

    /// Copy of the retained list, newest first
    pub fn snapshot(&self) -> Vec<Spin> {
        self.lock_retained().as_slice().to_vec()
    }

    /// Number of retained spins
    pub fn len(&self) -> usize {
        self.lock_retained().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_retained().is_empty()
    }

    /// Drop every retained spin and the mirrored copy
    pub fn clear(&self) {
        self.lock_retained().clear();
        self.mirror.clear();
    }

    fn lock_retained(&self) -> MutexGuard<'_, RetainedList> {
        self.retained
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CollectorResult;
    use crate::scrape::ScriptedScraper;
    use crate::store::{KeyValueStore, MemoryStore};
    use async_trait::async_trait;
    use mockall::mock;

    mock! {
        pub PageScraper {}

        #[async_trait]
        impl Scraper for PageScraper {
            async fn scrape(&self) -> CollectorResult<Option<i64>>;
        }
    }

    fn source_with(scraper: ScriptedScraper, max_retained: usize) -> SpinSource {
        let mirror = PersistenceMirror::new(Arc::new(MemoryStore::new()), "rouletteData");
        SpinSource::new(
            Arc::new(scraper),
            mirror,
            max_retained,
            Duration::from_secs(10),
        )
        .with_origin("live_casino", "auto_roulette_1")
    }

    fn numbers(spins: &[Spin]) -> Vec<u8> {
        spins.iter().map(|s| s.number).collect()
    }

    #[test]
    fn test_retained_list_bound_and_order() {
        let mut list = RetainedList::new(3);
        for n in 1..=5 {
            list.push_front(Spin::new(n, Utc::now(), "c", "t").unwrap());
        }
        assert_eq!(numbers(list.as_slice()), vec![5, 4, 3]);
    }

    #[test]
    fn test_retained_list_from_spins_truncates() {
        let spins: Vec<Spin> = (1..=4)
            .map(|n| Spin::new(n, Utc::now(), "c", "t").unwrap())
            .collect();
        let list = RetainedList::from_spins(spins, 2);
        assert_eq!(numbers(list.as_slice()), vec![1, 2]);
    }

    #[test]
    fn test_seen_within_window_edges() {
        let t0 = Utc::now();
        let window = chrono::Duration::seconds(10);
        let mut list = RetainedList::new(10);
        list.push_front(Spin::new(5, t0, "c", "t").unwrap());

        assert!(list.seen_within(5, t0 + chrono::Duration::seconds(9), window));
        assert!(!list.seen_within(5, t0 + chrono::Duration::seconds(10), window));
        assert!(!list.seen_within(6, t0, window));
    }

    #[tokio::test]
    async fn test_absent_and_error_are_noops() {
        let scraper = ScriptedScraper::new([None]);
        scraper.push_error("timeout");
        let source = source_with(scraper, 10);

        assert_eq!(source.poll().await, PollOutcome::Absent);
        assert_eq!(source.poll().await, PollOutcome::Absent);
        assert!(source.is_empty());
    }

    #[tokio::test]
    async fn test_out_of_range_rejected() {
        let source = source_with(ScriptedScraper::new([Some(37), Some(-1)]), 10);

        assert_eq!(source.poll().await, PollOutcome::OutOfRange(37));
        assert_eq!(source.poll().await, PollOutcome::OutOfRange(-1));
        assert!(source.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_within_window_then_accepted_after() {
        let source = source_with(ScriptedScraper::new([Some(5), Some(5), Some(5)]), 10);
        let t0 = Utc::now();

        assert!(matches!(source.poll_at(t0).await, PollOutcome::Accepted(_)));
        assert_eq!(
            source.poll_at(t0 + chrono::Duration::seconds(3)).await,
            PollOutcome::Duplicate(5)
        );
        assert!(matches!(
            source.poll_at(t0 + chrono::Duration::seconds(11)).await,
            PollOutcome::Accepted(_)
        ));
        assert_eq!(source.len(), 2);
    }

    #[tokio::test]
    async fn test_accepted_spin_is_tagged() {
        let source = source_with(ScriptedScraper::new([Some(0)]), 10);
        let PollOutcome::Accepted(spin) = source.poll().await else {
            panic!("expected an accepted spin");
        };

        assert_eq!(spin.color, shared::Color::Green);
        assert_eq!(spin.casino, "live_casino");
        assert_eq!(spin.table, "auto_roulette_1");
    }

    #[tokio::test]
    async fn test_accepted_spin_is_mirrored_and_queued() {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(PendingQueue::new("spins"));
        let source = SpinSource::new(
            Arc::new(ScriptedScraper::new([Some(14)])),
            PersistenceMirror::new(store.clone(), "rouletteData"),
            10,
            Duration::from_secs(10),
        )
        .with_outbox(queue.clone());

        source.poll().await;

        assert_eq!(queue.len(), 1);
        let raw = store.get("rouletteData").unwrap().unwrap();
        let persisted: Vec<Spin> = serde_json::from_str(&raw).unwrap();
        assert_eq!(numbers(&persisted), vec![14]);
    }

    #[tokio::test]
    async fn test_rejected_poll_has_no_side_effects() {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(PendingQueue::new("spins"));
        let source = SpinSource::new(
            Arc::new(ScriptedScraper::new([Some(40)])),
            PersistenceMirror::new(store.clone(), "rouletteData"),
            10,
            Duration::from_secs(10),
        )
        .with_outbox(queue.clone());

        source.poll().await;

        assert!(queue.is_empty());
        assert_eq!(store.get("rouletteData").unwrap(), None);
    }

    #[tokio::test]
    async fn test_persistence_failure_keeps_memory_authoritative() {
        let store = Arc::new(MemoryStore::new());
        store.set_failing(true);
        let source = SpinSource::new(
            Arc::new(ScriptedScraper::new([Some(22)])),
            PersistenceMirror::new(store, "rouletteData"),
            10,
            Duration::from_secs(10),
        );

        assert!(matches!(source.poll().await, PollOutcome::Accepted(_)));
        assert_eq!(numbers(&source.snapshot()), vec![22]);
    }

    #[tokio::test]
    async fn test_resumes_from_mirror() {
        let store = Arc::new(MemoryStore::new());
        let mirror = PersistenceMirror::new(store, "rouletteData");
        mirror.save(&[Spin::new(9, Utc::now(), "c", "t").unwrap()]);

        let source = SpinSource::new(
            Arc::new(ScriptedScraper::new([Some(9)])),
            mirror,
            10,
            Duration::from_secs(10),
        );

        assert_eq!(source.len(), 1);
        // The persisted 9 is still inside the window
        assert_eq!(source.poll().await, PollOutcome::Duplicate(9));
    }

    #[tokio::test]
    async fn test_bound_holds_across_many_polls() {
        let values: Vec<Option<i64>> = (0..=36).map(Some).collect();
        let source = source_with(ScriptedScraper::new(values), 5);

        for _ in 0..=36 {
            source.poll().await;
        }

        assert_eq!(numbers(&source.snapshot()), vec![36, 35, 34, 33, 32]);
    }

    #[tokio::test]
    async fn test_mock_scraper_called_once_per_poll() {
        let mut scraper = MockPageScraper::new();
        scraper.expect_scrape().times(2).returning(|| Ok(Some(3)));

        let source = SpinSource::new(
            Arc::new(scraper),
            PersistenceMirror::new(Arc::new(MemoryStore::new()), "rouletteData"),
            10,
            Duration::from_secs(10),
        );

        source.poll().await;
        source.poll().await;
        assert_eq!(source.len(), 1);
    }
}
