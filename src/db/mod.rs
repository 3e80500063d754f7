pub mod mapping_repo;
pub mod memory;
pub mod order_repo;
pub mod position_repo;
pub mod postgres;
pub mod run_repo;
pub mod signal_repo;

pub use memory::MemoryRepository;
pub use postgres::PgRepository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::mapping::MappingResult;
use crate::models::{CopySignal, OutcomeSide, SimFillRecord, SimOrderRecord, Venue};
use crate::simulation::ledger::SimulatedPosition;

/// Logical storage contract. The engine only talks to this trait; one
/// implementation per storage technology.
///
/// `save_*` calls are append-only. `update_position` is an idempotent
/// upsert keyed by (venue, market). Cursors never move backwards.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Open a run record and return its id.
    async fn create_run(&self, mode: &str, config_hash: &str) -> anyhow::Result<String>;

    async fn complete_run(&self, run_id: &str, status: &str, summary: serde_json::Value) -> anyhow::Result<()>;

    /// Returns false if the signal id was already stored.
    async fn save_signal(&self, signal: &CopySignal, run_id: Option<&str>) -> anyhow::Result<bool>;

    /// Stored signals with timestamp >= `since`, ascending.
    async fn get_signals_since(&self, since: DateTime<Utc>, limit: i64) -> anyhow::Result<Vec<CopySignal>>;

    /// Most recently processed signal ids, newest first.
    async fn get_recent_signal_ids(&self, limit: i64) -> anyhow::Result<Vec<String>>;

    async fn is_signal_processed(&self, signal_id: &str) -> anyhow::Result<bool>;

    /// Flag the signal processed and advance `cursor` to `ts` as one unit.
    async fn mark_processed(&self, signal_id: &str, cursor: &str, ts: DateTime<Utc>) -> anyhow::Result<()>;

    async fn save_mapping(&self, signal_id: &str, mapping: &MappingResult) -> anyhow::Result<()>;

    async fn save_sim_order(&self, order: &SimOrderRecord) -> anyhow::Result<()>;

    async fn save_sim_fill(&self, fill: &SimFillRecord) -> anyhow::Result<()>;

    async fn update_position(&self, position: &SimulatedPosition) -> anyhow::Result<()>;

    async fn save_outcome(
        &self,
        venue: Venue,
        market_id: &str,
        outcome: OutcomeSide,
        payout: Decimal,
    ) -> anyhow::Result<()>;

    async fn get_cursor(&self, name: &str) -> anyhow::Result<Option<DateTime<Utc>>>;

    /// Advance a cursor. Values older than the stored one are ignored.
    async fn update_cursor(&self, name: &str, ts: DateTime<Utc>) -> anyhow::Result<()>;

    async fn ping(&self) -> bool;
}

pub async fn init_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;

    // Verify connectivity
    sqlx::query("SELECT 1").execute(&pool).await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}
