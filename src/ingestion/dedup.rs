use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::db::Repository;
use crate::models::CopySignal;

/// Cursor name used for the tracked wallet's trade feed.
pub const FEED_CURSOR: &str = "source_trades";

#[derive(Debug, Default)]
struct SeenSet {
    ids: HashSet<String>,
    order: VecDeque<String>,
    in_flight: HashSet<String>,
}

impl SeenSet {
    fn insert(&mut self, id: String, capacity: usize) {
        if self.ids.insert(id.clone()) {
            self.order.push_back(id);
        }
        while self.order.len() > capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.ids.remove(&evicted);
            }
        }
    }
}

/// Exactly-once gate in front of the simulators.
///
/// Recent ids live in a bounded in-memory set; older ids fall through to the
/// repository, so a signal persisted as processed is recognized after a
/// restart or after eviction.
pub struct Deduplicator {
    repository: Arc<dyn Repository>,
    capacity: usize,
    state: Mutex<SeenSet>,
}

impl Deduplicator {
    pub fn new(repository: Arc<dyn Repository>, capacity: usize) -> Self {
        Self {
            repository,
            capacity: capacity.max(1),
            state: Mutex::new(SeenSet::default()),
        }
    }

    /// Warm the in-memory set from recently processed signals.
    pub async fn load_recent(&self) -> anyhow::Result<usize> {
        let ids = self
            .repository
            .get_recent_signal_ids(self.capacity as i64)
            .await?;
        let mut state = self.state.lock().await;
        let count = ids.len();
        // Repository returns newest first; insert oldest first so eviction order holds.
        for id in ids.into_iter().rev() {
            state.insert(id, self.capacity);
        }
        tracing::info!(count, "Deduplicator warmed from repository");
        Ok(count)
    }

    pub async fn is_duplicate(&self, signal_id: &str) -> bool {
        {
            let state = self.state.lock().await;
            if state.ids.contains(signal_id) || state.in_flight.contains(signal_id) {
                return true;
            }
        }
        self.persisted(signal_id).await
    }

    /// Reserve a signal for processing. Returns false when the signal was
    /// already processed or another task holds the claim.
    pub async fn claim(&self, signal_id: &str) -> bool {
        let mut state = self.state.lock().await;
        if state.ids.contains(signal_id) || state.in_flight.contains(signal_id) {
            return false;
        }
        if self.persisted(signal_id).await {
            state.insert(signal_id.to_string(), self.capacity);
            return false;
        }
        state.in_flight.insert(signal_id.to_string());
        true
    }

    /// Drop a claim without marking the signal processed.
    pub async fn release(&self, signal_id: &str) {
        self.state.lock().await.in_flight.remove(signal_id);
    }

    /// Record the signal as processed and advance the feed cursor.
    ///
    /// The in-memory set is updated even if persistence fails, so the running
    /// process never handles the signal twice.
    pub async fn mark_processed(&self, signal: &CopySignal) -> anyhow::Result<()> {
        {
            let mut state = self.state.lock().await;
            state.in_flight.remove(&signal.signal_id);
            state.insert(signal.signal_id.clone(), self.capacity);
        }
        self.repository
            .mark_processed(&signal.signal_id, FEED_CURSOR, signal.timestamp)
            .await
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.ids.len()
    }

    async fn persisted(&self, signal_id: &str) -> bool {
        match self.repository.is_signal_processed(signal_id).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(error = %e, signal_id, "Processed-signal lookup failed, assuming new");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryRepository;
    use crate::models::{Action, OutcomeSide, SignalMeta};
    use chrono::Utc;
    use rust_decimal::Decimal;

    fn signal(id: &str) -> CopySignal {
        CopySignal {
            signal_id: id.into(),
            timestamp: Utc::now(),
            source: "test".into(),
            market_id: "m".into(),
            market_name: "Bitcoin Up or Down".into(),
            market_slug: String::new(),
            side: OutcomeSide::Yes,
            action: Action::Buy,
            quantity: Decimal::ONE,
            price: Decimal::new(5, 1),
            value: Decimal::new(5, 1),
            meta: SignalMeta::default(),
        }
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let dedup = Deduplicator::new(Arc::new(MemoryRepository::new()), 10);
        assert!(dedup.claim("a").await);
        assert!(!dedup.claim("a").await);
        dedup.release("a").await;
        assert!(dedup.claim("a").await);
    }

    #[tokio::test]
    async fn test_processed_signal_is_duplicate() {
        let repo = Arc::new(MemoryRepository::new());
        let dedup = Deduplicator::new(repo.clone(), 10);
        let s = signal("abc");
        repo.save_signal(&s, None).await.unwrap();
        assert!(dedup.claim("abc").await);
        dedup.mark_processed(&s).await.unwrap();
        assert!(dedup.is_duplicate("abc").await);
        assert!(!dedup.claim("abc").await);
    }

    #[tokio::test]
    async fn test_eviction_falls_back_to_repository() {
        let repo = Arc::new(MemoryRepository::new());
        let dedup = Deduplicator::new(repo.clone(), 2);
        for id in ["a", "b", "c"] {
            let s = signal(id);
            repo.save_signal(&s, None).await.unwrap();
            dedup.claim(id).await;
            dedup.mark_processed(&s).await.unwrap();
        }
        assert_eq!(dedup.len().await, 2);
        // "a" was evicted from memory but the repository still knows it.
        assert!(dedup.is_duplicate("a").await);
    }

    #[tokio::test]
    async fn test_restart_recognizes_processed_signals() {
        let repo = Arc::new(MemoryRepository::new());
        let s = signal("persisted");
        repo.save_signal(&s, None).await.unwrap();
        repo.mark_processed("persisted", FEED_CURSOR, s.timestamp).await.unwrap();

        let fresh = Deduplicator::new(repo, 10);
        assert_eq!(fresh.load_recent().await.unwrap(), 1);
        assert!(fresh.is_duplicate("persisted").await);
    }
}
