use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{Action, OutcomeSide, Venue};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Decimal,
    pub size: Decimal,
}

impl BookLevel {
    pub fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }
}

/// Point-in-time orderbook for a binary market. Bids are sorted best
/// (highest) first, asks best (lowest) first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Orderbook {
    pub market_id: String,
    pub venue: Venue,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub yes_bids: Vec<BookLevel>,
    #[serde(default)]
    pub yes_asks: Vec<BookLevel>,
    #[serde(default)]
    pub no_bids: Vec<BookLevel>,
    #[serde(default)]
    pub no_asks: Vec<BookLevel>,
}

impl Orderbook {
    pub fn empty(market_id: impl Into<String>, venue: Venue, timestamp: DateTime<Utc>) -> Self {
        Self {
            market_id: market_id.into(),
            venue,
            timestamp,
            yes_bids: Vec::new(),
            yes_asks: Vec::new(),
            no_bids: Vec::new(),
            no_asks: Vec::new(),
        }
    }

    /// Re-sort every side into best-first order. Adapters call this after
    /// building a book from venue data.
    pub fn normalize(&mut self) {
        for bids in [&mut self.yes_bids, &mut self.no_bids] {
            bids.retain(|l| l.size > Decimal::ZERO);
            bids.sort_by(|a, b| b.price.cmp(&a.price));
        }
        for asks in [&mut self.yes_asks, &mut self.no_asks] {
            asks.retain(|l| l.size > Decimal::ZERO);
            asks.sort_by(|a, b| a.price.cmp(&b.price));
        }
    }

    pub fn bids(&self, side: OutcomeSide) -> &[BookLevel] {
        match side {
            OutcomeSide::Yes => &self.yes_bids,
            OutcomeSide::No => &self.no_bids,
        }
    }

    pub fn asks(&self, side: OutcomeSide) -> &[BookLevel] {
        match side {
            OutcomeSide::Yes => &self.yes_asks,
            OutcomeSide::No => &self.no_asks,
        }
    }

    /// Levels an order on `side` consumes: asks for a buy, bids for a sell.
    pub fn levels_for(&self, side: OutcomeSide, action: Action) -> &[BookLevel] {
        match action {
            Action::Buy => self.asks(side),
            Action::Sell => self.bids(side),
        }
    }

    pub fn best_bid(&self, side: OutcomeSide) -> Option<Decimal> {
        self.bids(side).first().map(|l| l.price)
    }

    pub fn best_ask(&self, side: OutcomeSide) -> Option<Decimal> {
        self.asks(side).first().map(|l| l.price)
    }

    pub fn mid(&self, side: OutcomeSide) -> Option<Decimal> {
        match (self.best_bid(side), self.best_ask(side)) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::TWO),
            _ => None,
        }
    }

    /// Best ask minus best bid. `None` when either side is empty.
    pub fn spread(&self, side: OutcomeSide) -> Option<Decimal> {
        match (self.best_bid(side), self.best_ask(side)) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }

    /// Total size available at prices at least as good as `limit` for an
    /// order of the given direction.
    pub fn depth_at_or_better(&self, side: OutcomeSide, action: Action, limit: Decimal) -> Decimal {
        self.levels_for(side, action)
            .iter()
            .filter(|l| match action {
                Action::Buy => l.price <= limit,
                Action::Sell => l.price >= limit,
            })
            .map(|l| l.size)
            .sum()
    }

    pub fn total_depth(&self, side: OutcomeSide, action: Action) -> Decimal {
        self.levels_for(side, action).iter().map(|l| l.size).sum()
    }
}
