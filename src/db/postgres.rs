use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;

use super::{mapping_repo, order_repo, position_repo, run_repo, signal_repo, Repository};
use crate::mapping::MappingResult;
use crate::models::{CopySignal, OutcomeSide, SimFillRecord, SimOrderRecord, Venue};
use crate::simulation::ledger::SimulatedPosition;

/// Postgres-backed repository. Thin delegation to the per-table query
/// modules.
#[derive(Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Repository for PgRepository {
    async fn create_run(&self, mode: &str, config_hash: &str) -> anyhow::Result<String> {
        run_repo::create_run(&self.pool, mode, config_hash).await
    }

    async fn complete_run(&self, run_id: &str, status: &str, summary: serde_json::Value) -> anyhow::Result<()> {
        run_repo::complete_run(&self.pool, run_id, status, summary).await
    }

    async fn save_signal(&self, signal: &CopySignal, run_id: Option<&str>) -> anyhow::Result<bool> {
        signal_repo::insert_signal(&self.pool, signal, run_id).await
    }

    async fn get_signals_since(&self, since: DateTime<Utc>, limit: i64) -> anyhow::Result<Vec<CopySignal>> {
        signal_repo::get_signals_since(&self.pool, since, limit).await
    }

    async fn get_recent_signal_ids(&self, limit: i64) -> anyhow::Result<Vec<String>> {
        signal_repo::get_recent_processed_ids(&self.pool, limit).await
    }

    async fn is_signal_processed(&self, signal_id: &str) -> anyhow::Result<bool> {
        signal_repo::is_processed(&self.pool, signal_id).await
    }

    async fn mark_processed(&self, signal_id: &str, cursor: &str, ts: DateTime<Utc>) -> anyhow::Result<()> {
        signal_repo::mark_processed(&self.pool, signal_id, cursor, ts).await
    }

    async fn save_mapping(&self, signal_id: &str, mapping: &MappingResult) -> anyhow::Result<()> {
        mapping_repo::insert_mapping(&self.pool, signal_id, mapping).await
    }

    async fn save_sim_order(&self, order: &SimOrderRecord) -> anyhow::Result<()> {
        order_repo::insert_sim_order(&self.pool, order).await
    }

    async fn save_sim_fill(&self, fill: &SimFillRecord) -> anyhow::Result<()> {
        order_repo::insert_sim_fill(&self.pool, fill).await
    }

    async fn update_position(&self, position: &SimulatedPosition) -> anyhow::Result<()> {
        position_repo::upsert_position(&self.pool, &position.to_row()).await
    }

    async fn save_outcome(
        &self,
        venue: Venue,
        market_id: &str,
        outcome: OutcomeSide,
        payout: Decimal,
    ) -> anyhow::Result<()> {
        position_repo::insert_outcome(&self.pool, venue.as_str(), market_id, outcome.as_str(), payout).await
    }

    async fn get_cursor(&self, name: &str) -> anyhow::Result<Option<DateTime<Utc>>> {
        signal_repo::get_cursor(&self.pool, name).await
    }

    async fn update_cursor(&self, name: &str, ts: DateTime<Utc>) -> anyhow::Result<()> {
        signal_repo::update_cursor(&self.pool, name, ts).await
    }

    async fn ping(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}
