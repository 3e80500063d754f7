use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Database row for the sim_positions table. Always an absolute snapshot
/// of the in-memory ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PositionRow {
    pub venue: String,
    pub market_id: String,
    pub yes_qty: Decimal,
    pub yes_cost: Decimal,
    pub no_qty: Decimal,
    pub no_cost: Decimal,
    pub realized_pnl: Decimal,
    pub settled_outcome: Option<String>,
    pub settled_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}
