use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use super::{AdapterError, VenueAdapter};
use crate::mapping::classifier::extract_target_features;
use crate::models::{MarketFilter, MarketSnapshot, Orderbook, Trade, TradeQuery, Venue, VenuePosition};

/// On-disk layout of a market-data recording.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Recording {
    pub venue: Option<Venue>,
    #[serde(default)]
    pub markets: Vec<MarketSnapshot>,
    #[serde(default)]
    pub orderbooks: Vec<Orderbook>,
    #[serde(default)]
    pub trades: Vec<Trade>,
}

/// File-backed venue used in SIM mode and by the replay harness. Books are
/// time-indexed so a lookup "as of" a timestamp returns what the venue
/// showed at that moment. Never touches the network.
#[derive(Debug, Clone)]
pub struct RecordedVenue {
    venue: Venue,
    markets: Vec<MarketSnapshot>,
    /// Snapshots per market, ascending by timestamp.
    books: HashMap<String, Vec<Orderbook>>,
    trades: Vec<Trade>,
}

impl RecordedVenue {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
        let recording: Recording = serde_json::from_str(&raw)?;
        let venue = recording.venue.unwrap_or(Venue::Kalshi);
        tracing::info!(
            path = %path.display(),
            venue = %venue,
            markets = recording.markets.len(),
            orderbooks = recording.orderbooks.len(),
            "Loaded recorded market data"
        );
        Ok(Self::from_parts(venue, recording.markets, recording.orderbooks, recording.trades))
    }

    pub fn from_parts(
        venue: Venue,
        markets: Vec<MarketSnapshot>,
        orderbooks: Vec<Orderbook>,
        mut trades: Vec<Trade>,
    ) -> Self {
        let mut books: HashMap<String, Vec<Orderbook>> = HashMap::new();
        for mut book in orderbooks {
            book.normalize();
            books.entry(book.market_id.clone()).or_default().push(book);
        }
        for snapshots in books.values_mut() {
            snapshots.sort_by_key(|b| b.timestamp);
        }
        trades.sort_by(|a, b| (a.timestamp, a.fill_index).cmp(&(b.timestamp, b.fill_index)));

        Self {
            venue,
            markets,
            books,
            trades,
        }
    }

    /// An empty recording: every lookup misses.
    pub fn empty(venue: Venue) -> Self {
        Self::from_parts(venue, Vec::new(), Vec::new(), Vec::new())
    }

    pub fn market_count(&self) -> usize {
        self.markets.len()
    }
}

#[async_trait]
impl VenueAdapter for RecordedVenue {
    fn venue(&self) -> Venue {
        self.venue
    }

    async fn get_markets(&self, filter: &MarketFilter) -> Result<Vec<MarketSnapshot>, AdapterError> {
        let mut markets: Vec<MarketSnapshot> = self
            .markets
            .iter()
            .filter(|m| !filter.active_only || !m.closed)
            .filter(|m| match filter.underlying {
                Some(u) => {
                    let haystack = format!("{} {}", m.ticker.as_deref().unwrap_or_default(), m.title).to_uppercase();
                    haystack.contains(u.as_str())
                }
                None => true,
            })
            .cloned()
            .collect();
        if let Some(near) = filter.closes_near {
            // Stable sort: equally distant markets keep file order.
            markets.sort_by_cached_key(|m| {
                extract_target_features(m)
                    .expiry
                    .map_or(i64::MAX, |expiry| (expiry - near).num_seconds().abs())
            });
        }
        if filter.limit > 0 {
            markets.truncate(filter.limit);
        }
        Ok(markets)
    }

    async fn get_market(&self, market_id: &str) -> Result<Option<MarketSnapshot>, AdapterError> {
        Ok(self.markets.iter().find(|m| m.market_id == market_id).cloned())
    }

    async fn get_orderbook(&self, market_id: &str) -> Result<Option<Orderbook>, AdapterError> {
        Ok(self.books.get(market_id).and_then(|b| b.last()).cloned())
    }

    async fn get_orderbook_at(
        &self,
        market_id: &str,
        as_of: DateTime<Utc>,
    ) -> Result<Option<Orderbook>, AdapterError> {
        let Some(snapshots) = self.books.get(market_id) else {
            return Ok(None);
        };
        let idx = snapshots.partition_point(|b| b.timestamp <= as_of);
        Ok(idx.checked_sub(1).map(|i| snapshots[i].clone()))
    }

    async fn get_trades(&self, query: &TradeQuery) -> Result<Vec<Trade>, AdapterError> {
        let mut trades: Vec<Trade> = self
            .trades
            .iter()
            .filter(|t| query.market_id.as_ref().map_or(true, |m| &t.market_id == m))
            .filter(|t| match (&query.wallet, &t.wallet) {
                (Some(q), Some(w)) => q.eq_ignore_ascii_case(w),
                _ => true,
            })
            .filter(|t| query.since.map_or(true, |since| t.timestamp > since))
            .cloned()
            .collect();
        if query.limit > 0 {
            trades.truncate(query.limit);
        }
        Ok(trades)
    }

    async fn get_positions(&self, _wallet: Option<&str>) -> Result<Vec<VenuePosition>, AdapterError> {
        Ok(Vec::new())
    }

    async fn health_check(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BookLevel, OutcomeSide};
    use chrono::{Duration, TimeZone};
    use rust_decimal::Decimal;

    fn book(ts: DateTime<Utc>, ask: i64) -> Orderbook {
        let mut ob = Orderbook::empty("KXBTC15M-26JAN071900-00", Venue::Kalshi, ts);
        ob.yes_asks = vec![BookLevel::new(Decimal::new(ask, 2), Decimal::from(100))];
        ob
    }

    #[tokio::test]
    async fn test_orderbook_as_of_picks_latest_not_after() {
        let t0 = Utc.with_ymd_and_hms(2026, 1, 7, 23, 45, 0).unwrap();
        let venue = RecordedVenue::from_parts(
            Venue::Kalshi,
            Vec::new(),
            vec![book(t0 + Duration::seconds(10), 55), book(t0, 50)],
            Vec::new(),
        );
        let id = "KXBTC15M-26JAN071900-00";

        let before = venue.get_orderbook_at(id, t0 - Duration::seconds(1)).await.unwrap();
        assert!(before.is_none());

        let at_start = venue.get_orderbook_at(id, t0 + Duration::seconds(5)).await.unwrap().unwrap();
        assert_eq!(at_start.best_ask(OutcomeSide::Yes), Some(Decimal::new(50, 2)));

        let later = venue.get_orderbook_at(id, t0 + Duration::seconds(10)).await.unwrap().unwrap();
        assert_eq!(later.best_ask(OutcomeSide::Yes), Some(Decimal::new(55, 2)));

        let latest = venue.get_orderbook(id).await.unwrap().unwrap();
        assert_eq!(latest.timestamp, t0 + Duration::seconds(10));
    }

    fn market(ticker: &str) -> MarketSnapshot {
        MarketSnapshot {
            market_id: ticker.into(),
            venue: Venue::Kalshi,
            ticker: Some(ticker.into()),
            title: "BTC price up in next 15 mins?".into(),
            expiry: None,
            strike: None,
            active: true,
            closed: false,
            winner: None,
            yes_price: None,
            volume: None,
        }
    }

    #[tokio::test]
    async fn test_markets_ranked_by_close_before_limit() {
        let venue = RecordedVenue::from_parts(
            Venue::Kalshi,
            vec![
                market("KXBTC15M-26JAN050100-00"),
                market("KXBTC15M-26JAN061900-00"),
                market("KXBTC15M-26JAN071900-00"),
                market("KXBTC15M-26JAN071845-00"),
            ],
            Vec::new(),
            Vec::new(),
        );
        // 19:00 ET on Jan 7.
        let near = Utc.with_ymd_and_hms(2026, 1, 8, 0, 0, 0).unwrap();
        let filter = MarketFilter {
            closes_near: Some(near),
            limit: 2,
            ..MarketFilter::default()
        };

        let ids: Vec<String> = venue
            .get_markets(&filter)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.market_id)
            .collect();
        assert_eq!(ids, vec!["KXBTC15M-26JAN071900-00", "KXBTC15M-26JAN071845-00"]);

        let unranked = MarketFilter {
            limit: 2,
            ..MarketFilter::default()
        };
        let first = venue.get_markets(&unranked).await.unwrap();
        assert_eq!(first[0].market_id, "KXBTC15M-26JAN050100-00");
    }

    #[tokio::test]
    async fn test_recorded_venue_refuses_orders() {
        let venue = RecordedVenue::empty(Venue::Kalshi);
        assert!(!venue.orders_enabled());
        assert!(venue.cancel_order("x").await.is_err());
        assert!(venue.get_market("missing").await.unwrap().is_none());
    }
}
