use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use super::canonicalizer::canonicalize;
use super::dedup::FEED_CURSOR;
use crate::db::Repository;
use crate::models::{CopySignal, TradeQuery};
use crate::venues::{AdapterError, VenueAdapter};

const FEED_BATCH: usize = 100;
/// Re-read window behind the cursor; fills that share a timestamp with the
/// last processed one are caught again and dropped by the deduplicator.
const LOOKBACK_SECS: i64 = 60;

/// Pulls the tracked wallet's fills from the source venue and turns them
/// into canonical signals, oldest first within one batch.
///
/// The query is anchored on the persisted cursor only, which moves when a
/// signal is marked processed. A batch that fails halfway is therefore
/// fetched again in full on the next poll. Because of the lookback window a
/// later batch can also carry signals older than ones already processed;
/// those are duplicates and the deduplicator drops them, so ordering is
/// strict per batch but not across the whole run.
pub struct TradePoller {
    source: Arc<dyn VenueAdapter>,
    repository: Arc<dyn Repository>,
    wallet: String,
    /// Anchor used until the first signal is processed.
    started_at: DateTime<Utc>,
}

impl TradePoller {
    pub fn new(source: Arc<dyn VenueAdapter>, repository: Arc<dyn Repository>, wallet: impl Into<String>) -> Self {
        Self {
            source,
            repository,
            wallet: wallet.into(),
            started_at: Utc::now(),
        }
    }

    /// One poll cycle. Trades that fail canonicalization are logged and
    /// dropped; a feed failure is returned so the caller can back off.
    pub async fn poll(&self) -> Result<Vec<CopySignal>, AdapterError> {
        let cursor = match self.repository.get_cursor(FEED_CURSOR).await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read feed cursor");
                None
            }
        };
        // Without any cursor only trades since startup are mirrored.
        let anchor = cursor.unwrap_or(self.started_at);
        let query = TradeQuery {
            wallet: Some(self.wallet.clone()),
            market_id: None,
            since: Some(anchor - Duration::seconds(LOOKBACK_SECS)),
            limit: FEED_BATCH,
        };

        let trades = self.source.get_trades(&query).await?;
        let mut signals: Vec<CopySignal> = trades
            .iter()
            .filter_map(|trade| match canonicalize(trade, &self.wallet) {
                Ok(signal) => Some(signal),
                Err(e) => {
                    tracing::warn!(error = %e, trade_id = %trade.trade_id, "Dropping malformed trade");
                    None
                }
            })
            .collect();
        signals.sort_by(|a, b| (a.timestamp, &a.signal_id).cmp(&(b.timestamp, &b.signal_id)));

        tracing::debug!(count = signals.len(), since = %query.since.unwrap_or(anchor), "Feed polled");
        Ok(signals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryRepository;
    use crate::models::{Action, Trade, Venue};
    use crate::venues::RecordedVenue;
    use rust_decimal::Decimal;

    fn trade(id: &str, wallet: &str, outcome: &str, secs_ago: i64) -> Trade {
        Trade {
            trade_id: id.into(),
            fill_index: 0,
            tx_hash: None,
            venue: Venue::Polymarket,
            timestamp: Utc::now() - Duration::seconds(secs_ago),
            market_id: "0xcond".into(),
            market_title: "Bitcoin Up or Down".into(),
            market_slug: String::new(),
            asset_id: None,
            raw_outcome: outcome.into(),
            action: Action::Buy,
            quantity: Decimal::from(10),
            price: Decimal::new(5, 1),
            wallet: Some(wallet.into()),
        }
    }

    #[tokio::test]
    async fn test_poll_returns_wallet_signals_oldest_first() {
        let source = RecordedVenue::from_parts(
            Venue::Polymarket,
            Vec::new(),
            Vec::new(),
            vec![
                trade("b", "0xabc", "Down", 5),
                trade("a", "0xABC", "Up", 20),
                trade("other", "0xdef", "Up", 10),
                trade("bad", "0xabc", "Sideways", 8),
            ],
        );
        let repo = Arc::new(MemoryRepository::new());
        let poller = TradePoller::new(Arc::new(source), repo, "0xabc");

        let signals = poller.poll().await.unwrap();
        assert_eq!(signals.len(), 2);
        assert_eq!(signals[0].meta.trade_id, "a");
        assert_eq!(signals[1].meta.trade_id, "b");
    }

    #[tokio::test]
    async fn test_poll_skips_history_before_lookback() {
        let source = RecordedVenue::from_parts(
            Venue::Polymarket,
            Vec::new(),
            Vec::new(),
            vec![trade("old", "0xabc", "Up", 3_600), trade("new", "0xabc", "Up", 1)],
        );
        let poller = TradePoller::new(Arc::new(source), Arc::new(MemoryRepository::new()), "0xabc");
        let signals = poller.poll().await.unwrap();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].meta.trade_id, "new");
    }

    #[tokio::test]
    async fn test_unprocessed_signals_are_fetched_again() {
        let source = RecordedVenue::from_parts(
            Venue::Polymarket,
            Vec::new(),
            Vec::new(),
            vec![trade("older", "0xabc", "Up", 200), trade("newer", "0xabc", "Up", 1)],
        );
        let repo = Arc::new(MemoryRepository::new());
        repo.update_cursor(FEED_CURSOR, Utc::now() - Duration::seconds(300))
            .await
            .unwrap();
        let poller = TradePoller::new(Arc::new(source), repo, "0xabc");

        let ids = |signals: Vec<CopySignal>| -> Vec<String> {
            signals.into_iter().map(|s| s.meta.trade_id).collect()
        };
        let first = ids(poller.poll().await.unwrap());
        assert_eq!(first, vec!["older", "newer"]);

        // Nothing was marked processed, so the same batch comes back.
        let second = ids(poller.poll().await.unwrap());
        assert_eq!(second, first);
    }
}
