use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{Action, OutcomeSide, Venue};

/// Crypto underlying of a short-horizon market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Underlying {
    Btc,
    Eth,
    Sol,
}

impl Underlying {
    pub fn as_str(self) -> &'static str {
        match self {
            Underlying::Btc => "BTC",
            Underlying::Eth => "ETH",
            Underlying::Sol => "SOL",
        }
    }

    /// Match a single lowercase word of a title.
    pub fn from_word(word: &str) -> Option<Self> {
        match word {
            "bitcoin" | "btc" => Some(Underlying::Btc),
            "ethereum" | "eth" | "ether" => Some(Underlying::Eth),
            "solana" | "sol" => Some(Underlying::Sol),
            _ => None,
        }
    }
}

impl fmt::Display for Underlying {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized market view shared by every adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    /// Venue-native identifier (condition id on Polymarket, ticker on Kalshi).
    pub market_id: String,
    pub venue: Venue,
    #[serde(default)]
    pub ticker: Option<String>,
    pub title: String,
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
    #[serde(default)]
    pub strike: Option<Decimal>,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub closed: bool,
    /// Set once the venue has resolved the market.
    #[serde(default)]
    pub winner: Option<OutcomeSide>,
    #[serde(default)]
    pub yes_price: Option<Decimal>,
    #[serde(default)]
    pub volume: Option<Decimal>,
}

/// Filter passed to `VenueAdapter::get_markets`.
#[derive(Debug, Clone, Default)]
pub struct MarketFilter {
    pub underlying: Option<Underlying>,
    pub active_only: bool,
    /// Prefer markets closing closest to this instant when the result is
    /// truncated to `limit`.
    pub closes_near: Option<DateTime<Utc>>,
    pub limit: usize,
}

/// Query for `VenueAdapter::get_trades`.
#[derive(Debug, Clone, Default)]
pub struct TradeQuery {
    pub wallet: Option<String>,
    pub market_id: Option<String>,
    /// Only trades strictly after this instant.
    pub since: Option<DateTime<Utc>>,
    pub limit: usize,
}

/// A raw venue fill, before canonicalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: String,
    #[serde(default)]
    pub fill_index: u32,
    #[serde(default)]
    pub tx_hash: Option<String>,
    pub venue: Venue,
    pub timestamp: DateTime<Utc>,
    pub market_id: String,
    #[serde(default)]
    pub market_title: String,
    #[serde(default)]
    pub market_slug: String,
    #[serde(default)]
    pub asset_id: Option<String>,
    /// Outcome label as the venue reported it ("Up", "No", ...).
    pub raw_outcome: String,
    pub action: Action,
    pub quantity: Decimal,
    pub price: Decimal,
    #[serde(default)]
    pub wallet: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenuePosition {
    pub venue: Venue,
    pub market_id: String,
    pub side: OutcomeSide,
    pub quantity: Decimal,
    pub avg_price: Option<Decimal>,
}

/// Order sent to a venue in LIVE mode. Kalshi prices in integer cents.
#[derive(Debug, Clone, Serialize)]
pub struct LiveOrder {
    pub ticker: String,
    pub side: OutcomeSide,
    pub action: Action,
    pub count: u32,
    pub price_cents: u32,
    pub client_order_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    pub status: String,
}
