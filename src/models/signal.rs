use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::{Action, OutcomeSide};

/// Venue metadata carried alongside a signal. Everything here is informational;
/// identity is fixed by `CopySignal::signal_id`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalMeta {
    pub wallet: String,
    pub trade_id: String,
    pub fill_index: u32,
    pub tx_hash: Option<String>,
    pub asset_id: Option<String>,
    pub raw_outcome: String,
}

/// A canonical, immutable copy-trade signal. Produced once by the
/// canonicalizer and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopySignal {
    /// 32 hex characters derived from (trade_id, fill_index, tx_hash).
    pub signal_id: String,
    pub timestamp: DateTime<Utc>,
    /// Label of the tracked source (wallet alias).
    pub source: String,
    pub market_id: String,
    pub market_name: String,
    pub market_slug: String,
    pub side: OutcomeSide,
    pub action: Action,
    pub quantity: Decimal,
    pub price: Decimal,
    /// quantity x price
    pub value: Decimal,
    pub meta: SignalMeta,
}

impl CopySignal {
    /// Short form for log lines.
    pub fn short_id(&self) -> &str {
        &self.signal_id[..8.min(self.signal_id.len())]
    }
}

/// Database row for the `signals` table.
#[derive(Debug, Clone, FromRow)]
pub struct SignalRow {
    pub signal_id: String,
    pub run_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub market_id: String,
    pub market_name: String,
    pub market_slug: String,
    pub side: String,
    pub action: String,
    pub quantity: Decimal,
    pub price: Decimal,
    pub value: Decimal,
    pub meta: sqlx::types::Json<SignalMeta>,
    pub processed: bool,
}

impl SignalRow {
    /// Rebuild the canonical signal. Rows with unknown side/action strings
    /// are skipped by callers.
    pub fn into_signal(self) -> Option<CopySignal> {
        Some(CopySignal {
            signal_id: self.signal_id,
            timestamp: self.timestamp,
            source: self.source,
            market_id: self.market_id,
            market_name: self.market_name,
            market_slug: self.market_slug,
            side: OutcomeSide::from_api_str(&self.side)?,
            action: Action::from_api_str(&self.action)?,
            quantity: self.quantity,
            price: self.price,
            value: self.value,
            meta: self.meta.0,
        })
    }
}
