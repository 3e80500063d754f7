pub mod auth;
pub mod kalshi;
pub mod polymarket;
pub mod recorded;
pub mod types;

pub use kalshi::KalshiAdapter;
pub use polymarket::PolymarketAdapter;
pub use recorded::RecordedVenue;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use crate::config::AppConfig;
use crate::models::{
    LiveOrder, MarketFilter, MarketSnapshot, OrderAck, Orderbook, Trade, TradeQuery, Venue, VenuePosition,
};

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("order placement disabled on {0}")]
    OrdersDisabled(Venue),

    #[error("missing credentials for {0}")]
    MissingCredentials(Venue),

    #[error("request signing failed: {0}")]
    Signing(#[from] auth::SignerError),
}

impl AdapterError {
    /// Transport failures, timeouts, 429 and 5xx are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            AdapterError::Http(e) => e.status().map_or(true, |s| s.as_u16() == 429 || s.is_server_error()),
            AdapterError::Timeout(_) => true,
            AdapterError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Bounded retry with linear backoff and a per-attempt timeout.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub timeout: Duration,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            attempts: config.fetch_retries.max(1),
            timeout: Duration::from_millis(config.fetch_timeout_ms),
            backoff: Duration::from_millis(config.fetch_backoff_ms),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            timeout: Duration::from_secs(10),
            backoff: Duration::from_secs(1),
        }
    }
}

pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, op: &str, mut call: F) -> Result<T, AdapterError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AdapterError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = match tokio::time::timeout(policy.timeout, call()).await {
            Ok(r) => r,
            Err(_) => Err(AdapterError::Timeout(policy.timeout)),
        };
        match result {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt < policy.attempts => {
                tracing::warn!(op, attempt, error = %e, "Venue call failed, retrying");
                tokio::time::sleep(policy.backoff * attempt).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Read-mostly contract every venue implements. Order placement defaults to
/// refusing; only an explicitly enabled target adapter overrides it.
#[async_trait]
pub trait VenueAdapter: Send + Sync {
    fn venue(&self) -> Venue;

    async fn get_markets(&self, filter: &MarketFilter) -> Result<Vec<MarketSnapshot>, AdapterError>;

    async fn get_market(&self, market_id: &str) -> Result<Option<MarketSnapshot>, AdapterError>;

    async fn get_orderbook(&self, market_id: &str) -> Result<Option<Orderbook>, AdapterError>;

    /// Book as of a point in time. Live venues only know "now".
    async fn get_orderbook_at(
        &self,
        market_id: &str,
        _as_of: DateTime<Utc>,
    ) -> Result<Option<Orderbook>, AdapterError> {
        self.get_orderbook(market_id).await
    }

    async fn get_trades(&self, query: &TradeQuery) -> Result<Vec<Trade>, AdapterError>;

    async fn get_positions(&self, wallet: Option<&str>) -> Result<Vec<VenuePosition>, AdapterError>;

    fn orders_enabled(&self) -> bool {
        false
    }

    async fn place_order(&self, _order: &LiveOrder) -> Result<OrderAck, AdapterError> {
        Err(AdapterError::OrdersDisabled(self.venue()))
    }

    async fn cancel_order(&self, _order_id: &str) -> Result<bool, AdapterError> {
        Err(AdapterError::OrdersDisabled(self.venue()))
    }

    async fn health_check(&self) -> bool;
}

pub(crate) async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, AdapterError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(AdapterError::Status {
        status: status.as_u16(),
        body: body.chars().take(200).collect(),
    })
}
