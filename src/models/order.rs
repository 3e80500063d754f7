use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Database row for the sim_orders table. Written once, with the final status.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SimOrderRecord {
    pub order_id: String,
    pub signal_id: String,
    pub venue: String,
    pub market_id: String,
    pub side: String,
    pub action: String,
    pub requested_qty: Decimal,
    pub limit_price: Decimal,
    pub latency_ms: i64,
    pub status: String,
    pub filled_qty: Decimal,
    pub avg_fill_price: Option<Decimal>,
    pub fee: Decimal,
    pub slippage_bps: Decimal,
    pub reject_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Database row for the sim_fills table (one per consumed book level).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SimFillRecord {
    pub order_id: String,
    pub level: i32,
    pub price: Decimal,
    pub quantity: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Order status constants.
pub mod order_status {
    pub const FILLED: &str = "filled";
    pub const PARTIAL: &str = "partial";
    pub const MISSED: &str = "missed";
    pub const REJECTED: &str = "rejected";
}
