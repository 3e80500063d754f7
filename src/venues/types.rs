use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Polymarket: Data API trades / positions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolyTrade {
    #[serde(default)]
    pub proxy_wallet: Option<String>,
    #[serde(default)]
    pub side: Option<String>,
    #[serde(default)]
    pub asset: Option<String>,
    #[serde(default)]
    pub condition_id: Option<String>,
    #[serde(default)]
    pub size: Option<Decimal>,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub timestamp: Option<serde_json::Value>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub outcome: Option<String>,
    #[serde(default)]
    pub transaction_hash: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolyPosition {
    #[serde(default)]
    pub condition_id: Option<String>,
    #[serde(default)]
    pub outcome: Option<String>,
    #[serde(default)]
    pub size: Option<Decimal>,
    #[serde(default)]
    pub avg_price: Option<Decimal>,
}

// ---------------------------------------------------------------------------
// Polymarket: Gamma markets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GammaMarket {
    #[serde(alias = "conditionId")]
    pub condition_id: String,
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default, alias = "endDate")]
    pub end_date: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub closed: Option<bool>,
    /// Stringified JSON array of labels, e.g. "[\"Up\", \"Down\"]"
    #[serde(default)]
    pub outcomes: Option<String>,
    /// Stringified JSON array of prices, e.g. "[\"1\", \"0\"]"
    #[serde(default, alias = "outcomePrices")]
    pub outcome_prices: Option<String>,
    /// Stringified JSON array of token ids
    #[serde(default, alias = "clobTokenIds")]
    pub clob_token_ids: Option<String>,
    #[serde(default)]
    pub volume: Option<String>,
}

impl GammaMarket {
    fn parse_string_list(raw: Option<&str>) -> Vec<String> {
        raw.and_then(|s| serde_json::from_str::<Vec<String>>(s).ok())
            .unwrap_or_default()
    }

    pub fn parse_outcomes(&self) -> Vec<String> {
        Self::parse_string_list(self.outcomes.as_deref())
    }

    pub fn parse_outcome_prices(&self) -> Vec<Decimal> {
        Self::parse_string_list(self.outcome_prices.as_deref())
            .iter()
            .filter_map(|p| p.parse().ok())
            .collect()
    }

    pub fn parse_token_ids(&self) -> Vec<String> {
        Self::parse_string_list(self.clob_token_ids.as_deref())
    }

    /// Label of the outcome priced at 1 once the market is closed.
    pub fn winning_outcome(&self) -> Option<String> {
        if self.closed != Some(true) {
            return None;
        }
        let outcomes = self.parse_outcomes();
        self.parse_outcome_prices()
            .iter()
            .position(|p| *p == Decimal::ONE)
            .and_then(|idx| outcomes.get(idx).cloned())
    }
}

// ---------------------------------------------------------------------------
// Polymarket: CLOB book
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClobLevel {
    pub price: Decimal,
    pub size: Decimal,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClobBook {
    #[serde(default)]
    pub bids: Vec<ClobLevel>,
    #[serde(default)]
    pub asks: Vec<ClobLevel>,
}

// ---------------------------------------------------------------------------
// Kalshi
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KalshiMarket {
    pub ticker: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub close_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub floor_strike: Option<Decimal>,
    /// Cents.
    #[serde(default)]
    pub yes_bid: Option<i64>,
    #[serde(default)]
    pub yes_ask: Option<i64>,
    #[serde(default)]
    pub volume: Option<i64>,
    /// "yes" / "no" once determined, empty before.
    #[serde(default)]
    pub result: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KalshiMarketsResponse {
    #[serde(default)]
    pub markets: Vec<KalshiMarket>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KalshiMarketResponse {
    pub market: KalshiMarket,
}

/// Kalshi books list resting bids only, as [price_cents, quantity].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KalshiBook {
    #[serde(default)]
    pub yes: Option<Vec<(i64, i64)>>,
    #[serde(default)]
    pub no: Option<Vec<(i64, i64)>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KalshiOrderbookResponse {
    #[serde(default)]
    pub orderbook: KalshiBook,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KalshiFill {
    pub trade_id: String,
    pub ticker: String,
    pub side: String,
    pub action: String,
    pub count: i64,
    #[serde(default)]
    pub yes_price: Option<i64>,
    #[serde(default)]
    pub no_price: Option<i64>,
    pub created_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KalshiFillsResponse {
    #[serde(default)]
    pub fills: Vec<KalshiFill>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KalshiPosition {
    pub ticker: String,
    /// Positive = YES contracts, negative = NO contracts.
    pub position: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KalshiPositionsResponse {
    #[serde(default)]
    pub market_positions: Vec<KalshiPosition>,
}

#[derive(Debug, Clone, Serialize)]
pub struct KalshiOrderRequest {
    pub ticker: String,
    pub client_order_id: String,
    pub side: String,
    pub action: String,
    pub count: u32,
    #[serde(rename = "type")]
    pub order_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub yes_price: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_price: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KalshiOrder {
    pub order_id: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KalshiOrderResponse {
    pub order: KalshiOrder,
}

/// Convert integer cents to a unit price.
pub fn cents_to_price(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

/// Parse a venue timestamp that may be unix seconds, unix milliseconds or
/// RFC 3339.
pub fn parse_timestamp(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::Number(n) => {
            let raw = n.as_i64()?;
            if raw > 10_000_000_000 {
                Utc.timestamp_millis_opt(raw).single()
            } else {
                Utc.timestamp_opt(raw, 0).single()
            }
        }
        serde_json::Value::String(s) => {
            if let Ok(raw) = s.parse::<i64>() {
                return parse_timestamp(&serde_json::Value::from(raw));
            }
            DateTime::parse_from_rfc3339(s).ok().map(|d| d.with_timezone(&Utc))
        }
        _ => None,
    }
}
