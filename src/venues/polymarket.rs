use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use std::collections::HashMap;

use super::types::{parse_timestamp, ClobBook, GammaMarket, PolyPosition, PolyTrade};
use super::{check_status, with_retry, AdapterError, RetryPolicy, VenueAdapter};
use crate::config::AppConfig;
use crate::models::{
    Action, BookLevel, MarketFilter, MarketSnapshot, Orderbook, OutcomeSide, Trade, TradeQuery, Venue,
    VenuePosition,
};

/// Read-only Polymarket adapter: Data API for the tracked wallet's trades
/// and positions, Gamma for market metadata, CLOB for books. Order
/// placement always refuses.
#[derive(Debug, Clone)]
pub struct PolymarketAdapter {
    http: Client,
    data_url: String,
    gamma_url: String,
    clob_url: String,
    retry: RetryPolicy,
}

impl PolymarketAdapter {
    pub fn new(http: Client, config: &AppConfig) -> Self {
        Self {
            http,
            data_url: config.polymarket_data_url.trim_end_matches('/').to_string(),
            gamma_url: config.polymarket_gamma_url.trim_end_matches('/').to_string(),
            clob_url: config.polymarket_clob_url.trim_end_matches('/').to_string(),
            retry: RetryPolicy::from_config(config),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, op: &str, url: &str) -> Result<T, AdapterError> {
        with_retry(self.retry, op, move || async move {
            let resp = check_status(self.http.get(url).send().await?).await?;
            Ok(resp.json::<T>().await?)
        })
        .await
    }

    fn to_snapshot(market: GammaMarket) -> MarketSnapshot {
        let winner = market
            .winning_outcome()
            .and_then(|label| OutcomeSide::from_api_str(&label));
        let yes_price = market.parse_outcome_prices().first().copied();
        MarketSnapshot {
            expiry: market.end_date.as_deref().and_then(|s| {
                DateTime::parse_from_rfc3339(s).ok().map(|d| d.with_timezone(&Utc))
            }),
            volume: market.volume.as_deref().and_then(|v| v.parse().ok()),
            active: market.active.unwrap_or(false),
            closed: market.closed.unwrap_or(false),
            ticker: market.slug.clone(),
            title: market.question,
            market_id: market.condition_id,
            venue: Venue::Polymarket,
            strike: None,
            winner,
            yes_price,
        }
    }

    /// Number each fill within its transaction so repeated polls of the same
    /// page assign the same index.
    fn to_trades(raw: Vec<PolyTrade>, wallet: Option<&str>) -> Vec<Trade> {
        let mut trades: Vec<Trade> = raw
            .into_iter()
            .filter_map(|t| {
                let timestamp = t.timestamp.as_ref().and_then(parse_timestamp)?;
                let action = Action::from_api_str(t.side.as_deref()?)?;
                let tx_hash = t.transaction_hash.filter(|h| !h.is_empty());
                let asset = t.asset.clone();
                Some(Trade {
                    trade_id: tx_hash.clone().unwrap_or_else(|| {
                        format!("{}_{}", timestamp.timestamp(), asset.as_deref().unwrap_or_default())
                    }),
                    fill_index: 0,
                    tx_hash,
                    venue: Venue::Polymarket,
                    timestamp,
                    market_id: t.condition_id?,
                    market_title: t.title.unwrap_or_default(),
                    market_slug: t.slug.unwrap_or_default(),
                    asset_id: asset,
                    raw_outcome: t.outcome.unwrap_or_default(),
                    action,
                    quantity: t.size?,
                    price: t.price?,
                    wallet: t.proxy_wallet.or_else(|| wallet.map(str::to_string)),
                })
            })
            .collect();

        trades.sort_by(|a, b| {
            (a.timestamp, &a.trade_id, &a.asset_id, a.price, a.quantity)
                .cmp(&(b.timestamp, &b.trade_id, &b.asset_id, b.price, b.quantity))
        });
        let mut seen: HashMap<String, u32> = HashMap::new();
        for trade in &mut trades {
            let idx = seen.entry(trade.trade_id.clone()).or_insert(0);
            trade.fill_index = *idx;
            *idx += 1;
        }
        trades
    }
}

#[async_trait]
impl VenueAdapter for PolymarketAdapter {
    fn venue(&self) -> Venue {
        Venue::Polymarket
    }

    async fn get_markets(&self, filter: &MarketFilter) -> Result<Vec<MarketSnapshot>, AdapterError> {
        let limit = if filter.limit == 0 { 100 } else { filter.limit };
        let mut url = format!("{}/markets?limit={limit}", self.gamma_url);
        if filter.active_only {
            url.push_str("&active=true&closed=false");
        }
        let markets: Vec<GammaMarket> = self.get_json("polymarket.get_markets", &url).await?;
        Ok(markets.into_iter().map(Self::to_snapshot).collect())
    }

    async fn get_market(&self, market_id: &str) -> Result<Option<MarketSnapshot>, AdapterError> {
        let url = format!("{}/markets?condition_ids={market_id}", self.gamma_url);
        let markets: Vec<GammaMarket> = self.get_json("polymarket.get_market", &url).await?;
        Ok(markets.into_iter().next().map(Self::to_snapshot))
    }

    /// `market_id` is a CLOB token id. Its book is reported on the YES side.
    async fn get_orderbook(&self, market_id: &str) -> Result<Option<Orderbook>, AdapterError> {
        let url = format!("{}/book?token_id={market_id}", self.clob_url);
        let book: ClobBook = match self.get_json("polymarket.get_orderbook", &url).await {
            Ok(b) => b,
            Err(AdapterError::Status { status: 404, .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        let mut ob = Orderbook::empty(market_id, Venue::Polymarket, Utc::now());
        ob.yes_bids = book.bids.iter().map(|l| BookLevel::new(l.price, l.size)).collect();
        ob.yes_asks = book.asks.iter().map(|l| BookLevel::new(l.price, l.size)).collect();
        ob.normalize();
        Ok(Some(ob))
    }

    async fn get_trades(&self, query: &TradeQuery) -> Result<Vec<Trade>, AdapterError> {
        let limit = if query.limit == 0 { 100 } else { query.limit };
        let mut url = format!("{}/trades?limit={limit}&takerOnly=false", self.data_url);
        if let Some(wallet) = &query.wallet {
            url.push_str(&format!("&user={wallet}"));
        }
        if let Some(market) = &query.market_id {
            url.push_str(&format!("&market={market}"));
        }
        let raw: Vec<PolyTrade> = self.get_json("polymarket.get_trades", &url).await?;
        let mut trades = Self::to_trades(raw, query.wallet.as_deref());
        if let Some(since) = query.since {
            trades.retain(|t| t.timestamp > since);
        }
        Ok(trades)
    }

    async fn get_positions(&self, wallet: Option<&str>) -> Result<Vec<VenuePosition>, AdapterError> {
        let Some(wallet) = wallet else {
            return Ok(Vec::new());
        };
        let url = format!("{}/positions?user={wallet}", self.data_url);
        let raw: Vec<PolyPosition> = self.get_json("polymarket.get_positions", &url).await?;
        Ok(raw
            .into_iter()
            .filter_map(|p| {
                Some(VenuePosition {
                    venue: Venue::Polymarket,
                    market_id: p.condition_id?,
                    side: OutcomeSide::from_api_str(p.outcome.as_deref()?)?,
                    quantity: p.size.unwrap_or(Decimal::ZERO),
                    avg_price: p.avg_price,
                })
            })
            .collect())
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/markets?limit=1", self.gamma_url);
        matches!(
            self.http.get(&url).timeout(self.retry.timeout).send().await,
            Ok(resp) if resp.status().is_success()
        )
    }
}
