pub mod market;
pub mod order;
pub mod orderbook;
pub mod position;
pub mod signal;

pub use market::{LiveOrder, MarketFilter, MarketSnapshot, OrderAck, Trade, TradeQuery, Underlying, VenuePosition};
pub use order::{SimFillRecord, SimOrderRecord};
pub use orderbook::{BookLevel, Orderbook};
pub use position::PositionRow;
pub use signal::{CopySignal, SignalMeta};

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// OutcomeSide
// ---------------------------------------------------------------------------

/// The binary outcome a trade is on. Polymarket "Up" maps to YES and
/// "Down" to NO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OutcomeSide {
    Yes,
    No,
}

impl OutcomeSide {
    pub fn from_api_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "YES" | "UP" | "0" => Some(OutcomeSide::Yes),
            "NO" | "DOWN" | "1" => Some(OutcomeSide::No),
            _ => None,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            OutcomeSide::Yes => OutcomeSide::No,
            OutcomeSide::No => OutcomeSide::Yes,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OutcomeSide::Yes => "YES",
            OutcomeSide::No => "NO",
        }
    }
}

impl fmt::Display for OutcomeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Buy,
    Sell,
}

impl Action {
    pub fn from_api_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "BUY" | "0" => Some(Action::Buy),
            "SELL" | "1" => Some(Action::Sell),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Action::Buy => "BUY",
            Action::Sell => "SELL",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Venue
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    Polymarket,
    Kalshi,
}

impl Venue {
    pub fn as_str(self) -> &'static str {
        match self {
            Venue::Polymarket => "polymarket",
            Venue::Kalshi => "kalshi",
        }
    }

    pub fn from_api_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "polymarket" | "poly" => Some(Venue::Polymarket),
            "kalshi" => Some(Venue::Kalshi),
            _ => None,
        }
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
