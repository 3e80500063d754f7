use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Method};
use rust_decimal::Decimal;

use super::auth::RequestSigner;
use super::types::{
    cents_to_price, KalshiBook, KalshiFillsResponse, KalshiMarket, KalshiMarketResponse, KalshiMarketsResponse,
    KalshiOrderRequest, KalshiOrderResponse, KalshiOrderbookResponse, KalshiPositionsResponse,
};
use super::{check_status, with_retry, AdapterError, RetryPolicy, VenueAdapter};
use crate::config::AppConfig;
use crate::models::{
    Action, BookLevel, LiveOrder, MarketFilter, MarketSnapshot, OrderAck, Orderbook, OutcomeSide, Trade, TradeQuery,
    Venue, VenuePosition,
};

/// Candidate markets must close within this many seconds of the source expiry.
const CLOSE_WINDOW_SECS: i64 = 6 * 3600;

/// Target-venue adapter. Market data is public; portfolio reads need
/// credentials; order placement additionally needs the explicit live flag.
#[derive(Debug, Clone)]
pub struct KalshiAdapter {
    http: Client,
    base_url: String,
    /// URL path prefix included in signatures, e.g. "/trade-api/v2".
    path_prefix: String,
    signer: Option<RequestSigner>,
    live_enabled: bool,
    retry: RetryPolicy,
}

impl KalshiAdapter {
    pub fn new(http: Client, config: &AppConfig) -> anyhow::Result<Self> {
        let signer = match (&config.kalshi_api_key_id, &config.kalshi_api_secret) {
            (Some(key), Some(secret)) => Some(RequestSigner::new(key.clone(), secret)?),
            _ => None,
        };
        let base_url = config.kalshi_base_url.trim_end_matches('/').to_string();
        let path_prefix = url_path(&base_url).to_string();
        let live_enabled = config.kalshi_live_enabled && signer.is_some();
        if config.kalshi_live_enabled && signer.is_none() {
            tracing::error!("KALSHI_LIVE_ENABLED is set but credentials are missing; orders stay disabled");
        }

        Ok(Self {
            http,
            base_url,
            path_prefix,
            signer,
            live_enabled,
            retry: RetryPolicy::from_config(config),
        })
    }

    pub fn has_credentials(&self) -> bool {
        self.signer.is_some()
    }

    async fn request<T: serde::de::DeserializeOwned>(
        &self,
        op: &str,
        method: Method,
        path: &str,
        signed: bool,
        body: Option<&serde_json::Value>,
    ) -> Result<T, AdapterError> {
        let url = format!("{}{path}", self.base_url);
        // Signatures cover the path only, without the query string.
        let sign_path = format!("{}{}", self.path_prefix, path.split('?').next().unwrap_or(path));

        with_retry(self.retry, op, || {
            let method = method.clone();
            let url = url.clone();
            let sign_path = sign_path.clone();
            async move {
                let mut req = self.http.request(method.clone(), &url);
                if signed {
                    let signer = self
                        .signer
                        .as_ref()
                        .ok_or(AdapterError::MissingCredentials(Venue::Kalshi))?;
                    for (name, value) in signer.headers(method.as_str(), &sign_path)? {
                        req = req.header(name, value);
                    }
                }
                if let Some(body) = body {
                    req = req.json(body);
                }
                let resp = check_status(req.send().await?).await?;
                Ok(resp.json::<T>().await?)
            }
        })
        .await
    }

    fn to_snapshot(market: KalshiMarket) -> MarketSnapshot {
        let status = market.status.as_deref().unwrap_or_default();
        let closed = matches!(status, "settled" | "closed" | "finalized" | "determined");
        let winner = match market.result.as_deref() {
            Some("yes") => Some(OutcomeSide::Yes),
            Some("no") => Some(OutcomeSide::No),
            _ => None,
        };
        let yes_price = match (market.yes_bid, market.yes_ask) {
            (Some(b), Some(a)) if b > 0 && a > 0 => Some(cents_to_price(b + a) / Decimal::TWO),
            (_, Some(a)) if a > 0 => Some(cents_to_price(a)),
            _ => None,
        };
        MarketSnapshot {
            ticker: Some(market.ticker.clone()),
            market_id: market.ticker,
            venue: Venue::Kalshi,
            title: market.title,
            expiry: market.close_time,
            strike: market.floor_strike,
            active: matches!(status, "open" | "active"),
            closed,
            winner,
            yes_price,
            volume: market.volume.map(Decimal::from),
        }
    }

    /// Kalshi publishes resting bids for both outcomes. A YES ask at p is a
    /// NO bid at 1 - p, so the asks are derived from the opposite side.
    fn to_orderbook(ticker: &str, book: KalshiBook) -> Orderbook {
        let levels = |raw: &Option<Vec<(i64, i64)>>| -> Vec<BookLevel> {
            raw.as_deref()
                .unwrap_or_default()
                .iter()
                .map(|&(price, qty)| BookLevel::new(cents_to_price(price), Decimal::from(qty)))
                .collect()
        };
        let complement = |bids: &[BookLevel]| -> Vec<BookLevel> {
            bids.iter()
                .map(|l| BookLevel::new(Decimal::ONE - l.price, l.size))
                .collect()
        };

        let mut ob = Orderbook::empty(ticker, Venue::Kalshi, Utc::now());
        ob.yes_bids = levels(&book.yes);
        ob.no_bids = levels(&book.no);
        ob.yes_asks = complement(&ob.no_bids);
        ob.no_asks = complement(&ob.yes_bids);
        ob.normalize();
        ob
    }
}

fn url_path(base_url: &str) -> &str {
    let without_scheme = base_url.split_once("://").map_or(base_url, |(_, rest)| rest);
    without_scheme.find('/').map_or("", |idx| &without_scheme[idx..])
}

#[async_trait]
impl VenueAdapter for KalshiAdapter {
    fn venue(&self) -> Venue {
        Venue::Kalshi
    }

    async fn get_markets(&self, filter: &MarketFilter) -> Result<Vec<MarketSnapshot>, AdapterError> {
        let limit = if filter.limit == 0 { 200 } else { filter.limit };
        let mut path = format!("/markets?limit={limit}");
        if filter.active_only {
            path.push_str("&status=open");
        }
        if let Some(underlying) = filter.underlying {
            path.push_str(&format!("&series_ticker=KX{}15M", underlying.as_str()));
        }
        if let Some(near) = filter.closes_near {
            let ts = near.timestamp();
            path.push_str(&format!(
                "&min_close_ts={}&max_close_ts={}",
                ts - CLOSE_WINDOW_SECS,
                ts + CLOSE_WINDOW_SECS
            ));
        }
        let resp: KalshiMarketsResponse = self
            .request("kalshi.get_markets", Method::GET, &path, false, None)
            .await?;
        Ok(resp.markets.into_iter().map(Self::to_snapshot).collect())
    }

    async fn get_market(&self, market_id: &str) -> Result<Option<MarketSnapshot>, AdapterError> {
        let path = format!("/markets/{market_id}");
        match self
            .request::<KalshiMarketResponse>("kalshi.get_market", Method::GET, &path, false, None)
            .await
        {
            Ok(resp) => Ok(Some(Self::to_snapshot(resp.market))),
            Err(AdapterError::Status { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_orderbook(&self, market_id: &str) -> Result<Option<Orderbook>, AdapterError> {
        let path = format!("/markets/{market_id}/orderbook");
        match self
            .request::<KalshiOrderbookResponse>("kalshi.get_orderbook", Method::GET, &path, false, None)
            .await
        {
            Ok(resp) => Ok(Some(Self::to_orderbook(market_id, resp.orderbook))),
            Err(AdapterError::Status { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Own fills only. Without credentials there is nothing to read.
    async fn get_trades(&self, query: &TradeQuery) -> Result<Vec<Trade>, AdapterError> {
        if self.signer.is_none() {
            return Ok(Vec::new());
        }
        let limit = if query.limit == 0 { 100 } else { query.limit };
        let mut path = format!("/portfolio/fills?limit={limit}");
        if let Some(ticker) = &query.market_id {
            path.push_str(&format!("&ticker={ticker}"));
        }
        if let Some(since) = query.since {
            path.push_str(&format!("&min_ts={}", since.timestamp()));
        }
        let resp: KalshiFillsResponse = self
            .request("kalshi.get_trades", Method::GET, &path, true, None)
            .await?;

        Ok(resp
            .fills
            .into_iter()
            .filter_map(|f| {
                let side = OutcomeSide::from_api_str(&f.side)?;
                let cents = match side {
                    OutcomeSide::Yes => f.yes_price,
                    OutcomeSide::No => f.no_price,
                }?;
                Some(Trade {
                    trade_id: f.trade_id,
                    fill_index: 0,
                    tx_hash: None,
                    venue: Venue::Kalshi,
                    timestamp: f.created_time,
                    market_title: f.ticker.clone(),
                    market_slug: f.ticker.clone(),
                    market_id: f.ticker,
                    asset_id: None,
                    raw_outcome: f.side,
                    action: Action::from_api_str(&f.action)?,
                    quantity: Decimal::from(f.count),
                    price: cents_to_price(cents),
                    wallet: None,
                })
            })
            .filter(|t| query.since.map_or(true, |since| t.timestamp > since))
            .collect())
    }

    async fn get_positions(&self, _wallet: Option<&str>) -> Result<Vec<VenuePosition>, AdapterError> {
        if self.signer.is_none() {
            return Ok(Vec::new());
        }
        let resp: KalshiPositionsResponse = self
            .request("kalshi.get_positions", Method::GET, "/portfolio/positions", true, None)
            .await?;
        Ok(resp
            .market_positions
            .into_iter()
            .filter(|p| p.position != 0)
            .map(|p| VenuePosition {
                venue: Venue::Kalshi,
                market_id: p.ticker,
                side: if p.position > 0 { OutcomeSide::Yes } else { OutcomeSide::No },
                quantity: Decimal::from(p.position.abs()),
                avg_price: None,
            })
            .collect())
    }

    fn orders_enabled(&self) -> bool {
        self.live_enabled
    }

    async fn place_order(&self, order: &LiveOrder) -> Result<OrderAck, AdapterError> {
        if !self.live_enabled {
            return Err(AdapterError::OrdersDisabled(Venue::Kalshi));
        }
        let (yes_price, no_price) = match order.side {
            OutcomeSide::Yes => (Some(order.price_cents), None),
            OutcomeSide::No => (None, Some(order.price_cents)),
        };
        let request = KalshiOrderRequest {
            ticker: order.ticker.clone(),
            client_order_id: order.client_order_id.clone(),
            side: order.side.as_str().to_lowercase(),
            action: order.action.as_str().to_lowercase(),
            count: order.count,
            order_type: "limit".into(),
            yes_price,
            no_price,
        };
        let body = serde_json::to_value(&request).map_err(|e| AdapterError::Decode(e.to_string()))?;
        // Order creation is not idempotent on our side, so a single attempt.
        let policy = RetryPolicy { attempts: 1, ..self.retry };
        let adapter = Self { retry: policy, ..self.clone() };
        let resp: KalshiOrderResponse = adapter
            .request("kalshi.place_order", Method::POST, "/portfolio/orders", true, Some(&body))
            .await?;

        tracing::info!(
            ticker = %order.ticker,
            side = %order.side,
            count = order.count,
            price_cents = order.price_cents,
            order_id = %resp.order.order_id,
            "Kalshi order placed"
        );
        Ok(OrderAck {
            order_id: resp.order.order_id,
            status: resp.order.status,
        })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<bool, AdapterError> {
        if !self.live_enabled {
            return Err(AdapterError::OrdersDisabled(Venue::Kalshi));
        }
        let path = format!("/portfolio/orders/{order_id}");
        match self
            .request::<serde_json::Value>("kalshi.cancel_order", Method::DELETE, &path, true, None)
            .await
        {
            Ok(_) => Ok(true),
            Err(AdapterError::Status { status: 404, .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/exchange/status", self.base_url);
        matches!(
            self.http.get(&url).timeout(self.retry.timeout).send().await,
            Ok(resp) if resp.status().is_success()
        )
    }
}
