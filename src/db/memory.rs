use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::Repository;
use crate::mapping::MappingResult;
use crate::models::{CopySignal, OutcomeSide, PositionRow, SimFillRecord, SimOrderRecord, Venue};
use crate::simulation::ledger::SimulatedPosition;

#[derive(Debug, Clone)]
pub struct StoredSignal {
    pub signal: CopySignal,
    pub run_id: Option<String>,
    pub processed_seq: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct StoredRun {
    pub mode: String,
    pub config_hash: String,
    pub status: String,
    pub summary: Option<serde_json::Value>,
}

#[derive(Debug, Default)]
struct State {
    runs: HashMap<String, StoredRun>,
    signals: HashMap<String, StoredSignal>,
    processed_seq: u64,
    mappings: Vec<(String, MappingResult)>,
    orders: Vec<SimOrderRecord>,
    fills: Vec<SimFillRecord>,
    positions: HashMap<(String, String), PositionRow>,
    outcomes: HashMap<(String, String), (OutcomeSide, Decimal)>,
    cursors: HashMap<String, DateTime<Utc>>,
}

/// Process-local repository. Used when no database is configured, by the
/// replay harness, and in tests. Same contract as the Postgres one.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    state: Mutex<State>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn orders(&self) -> Vec<SimOrderRecord> {
        self.state.lock().await.orders.clone()
    }

    pub async fn fills(&self) -> Vec<SimFillRecord> {
        self.state.lock().await.fills.clone()
    }

    pub async fn signal_count(&self) -> usize {
        self.state.lock().await.signals.len()
    }

    pub async fn mapping_count(&self) -> usize {
        self.state.lock().await.mappings.len()
    }

    pub async fn position(&self, venue: Venue, market_id: &str) -> Option<PositionRow> {
        self.state
            .lock()
            .await
            .positions
            .get(&(venue.as_str().to_string(), market_id.to_string()))
            .cloned()
    }

    pub async fn outcome(&self, venue: Venue, market_id: &str) -> Option<(OutcomeSide, Decimal)> {
        self.state
            .lock()
            .await
            .outcomes
            .get(&(venue.as_str().to_string(), market_id.to_string()))
            .copied()
    }

    pub async fn run(&self, run_id: &str) -> Option<StoredRun> {
        self.state.lock().await.runs.get(run_id).cloned()
    }
}

fn advance(cursors: &mut HashMap<String, DateTime<Utc>>, name: &str, ts: DateTime<Utc>) {
    let entry = cursors.entry(name.to_string()).or_insert(ts);
    if ts > *entry {
        *entry = ts;
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn create_run(&self, mode: &str, config_hash: &str) -> anyhow::Result<String> {
        let run_id = Uuid::new_v4().to_string();
        self.state.lock().await.runs.insert(
            run_id.clone(),
            StoredRun {
                mode: mode.to_string(),
                config_hash: config_hash.to_string(),
                status: "running".into(),
                summary: None,
            },
        );
        Ok(run_id)
    }

    async fn complete_run(&self, run_id: &str, status: &str, summary: serde_json::Value) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        let run = state
            .runs
            .get_mut(run_id)
            .ok_or_else(|| anyhow::anyhow!("unknown run {run_id}"))?;
        run.status = status.to_string();
        run.summary = Some(summary);
        Ok(())
    }

    async fn save_signal(&self, signal: &CopySignal, run_id: Option<&str>) -> anyhow::Result<bool> {
        let mut state = self.state.lock().await;
        if state.signals.contains_key(&signal.signal_id) {
            return Ok(false);
        }
        state.signals.insert(
            signal.signal_id.clone(),
            StoredSignal {
                signal: signal.clone(),
                run_id: run_id.map(str::to_string),
                processed_seq: None,
            },
        );
        Ok(true)
    }

    async fn get_signals_since(&self, since: DateTime<Utc>, limit: i64) -> anyhow::Result<Vec<CopySignal>> {
        let state = self.state.lock().await;
        let mut signals: Vec<CopySignal> = state
            .signals
            .values()
            .filter(|s| s.signal.timestamp >= since)
            .map(|s| s.signal.clone())
            .collect();
        signals.sort_by(|a, b| (a.timestamp, &a.signal_id).cmp(&(b.timestamp, &b.signal_id)));
        signals.truncate(limit.max(0) as usize);
        Ok(signals)
    }

    async fn get_recent_signal_ids(&self, limit: i64) -> anyhow::Result<Vec<String>> {
        let state = self.state.lock().await;
        let mut processed: Vec<(u64, &String)> = state
            .signals
            .iter()
            .filter_map(|(id, s)| s.processed_seq.map(|seq| (seq, id)))
            .collect();
        processed.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(processed
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|(_, id)| id.clone())
            .collect())
    }

    async fn is_signal_processed(&self, signal_id: &str) -> anyhow::Result<bool> {
        Ok(self
            .state
            .lock()
            .await
            .signals
            .get(signal_id)
            .is_some_and(|s| s.processed_seq.is_some()))
    }

    async fn mark_processed(&self, signal_id: &str, cursor: &str, ts: DateTime<Utc>) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        state.processed_seq += 1;
        let seq = state.processed_seq;
        let stored = state
            .signals
            .get_mut(signal_id)
            .ok_or_else(|| anyhow::anyhow!("signal {signal_id} was never saved"))?;
        stored.processed_seq = Some(seq);
        advance(&mut state.cursors, cursor, ts);
        Ok(())
    }

    async fn save_mapping(&self, signal_id: &str, mapping: &MappingResult) -> anyhow::Result<()> {
        self.state
            .lock()
            .await
            .mappings
            .push((signal_id.to_string(), mapping.clone()));
        Ok(())
    }

    async fn save_sim_order(&self, order: &SimOrderRecord) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        if !state.orders.iter().any(|o| o.order_id == order.order_id) {
            state.orders.push(order.clone());
        }
        Ok(())
    }

    async fn save_sim_fill(&self, fill: &SimFillRecord) -> anyhow::Result<()> {
        self.state.lock().await.fills.push(fill.clone());
        Ok(())
    }

    async fn update_position(&self, position: &SimulatedPosition) -> anyhow::Result<()> {
        let row = position.to_row();
        self.state
            .lock()
            .await
            .positions
            .insert((row.venue.clone(), row.market_id.clone()), row);
        Ok(())
    }

    async fn save_outcome(
        &self,
        venue: Venue,
        market_id: &str,
        outcome: OutcomeSide,
        payout: Decimal,
    ) -> anyhow::Result<()> {
        self.state
            .lock()
            .await
            .outcomes
            .entry((venue.as_str().to_string(), market_id.to_string()))
            .or_insert((outcome, payout));
        Ok(())
    }

    async fn get_cursor(&self, name: &str) -> anyhow::Result<Option<DateTime<Utc>>> {
        Ok(self.state.lock().await.cursors.get(name).copied())
    }

    async fn update_cursor(&self, name: &str, ts: DateTime<Utc>) -> anyhow::Result<()> {
        advance(&mut self.state.lock().await.cursors, name, ts);
        Ok(())
    }

    async fn ping(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Action, SignalMeta};
    use chrono::{Duration, TimeZone};

    fn signal(id: &str, ts: DateTime<Utc>) -> CopySignal {
        CopySignal {
            signal_id: id.into(),
            timestamp: ts,
            source: "test".into(),
            market_id: "m".into(),
            market_name: String::new(),
            market_slug: String::new(),
            side: OutcomeSide::Yes,
            action: Action::Buy,
            quantity: Decimal::ONE,
            price: Decimal::new(5, 1),
            value: Decimal::new(5, 1),
            meta: SignalMeta::default(),
        }
    }

    #[tokio::test]
    async fn test_cursor_never_moves_backwards() {
        let repo = MemoryRepository::new();
        let t0 = Utc.with_ymd_and_hms(2026, 1, 7, 23, 0, 0).unwrap();
        repo.update_cursor("feed", t0).await.unwrap();
        repo.update_cursor("feed", t0 - Duration::minutes(5)).await.unwrap();
        assert_eq!(repo.get_cursor("feed").await.unwrap(), Some(t0));
    }

    #[tokio::test]
    async fn test_save_signal_is_append_only() {
        let repo = MemoryRepository::new();
        let t0 = Utc::now();
        assert!(repo.save_signal(&signal("a", t0), None).await.unwrap());
        assert!(!repo.save_signal(&signal("a", t0), None).await.unwrap());
        assert_eq!(repo.signal_count().await, 1);
    }

    #[tokio::test]
    async fn test_recent_ids_newest_first() {
        let repo = MemoryRepository::new();
        let t0 = Utc::now();
        for id in ["a", "b", "c"] {
            repo.save_signal(&signal(id, t0), None).await.unwrap();
            repo.mark_processed(id, "feed", t0).await.unwrap();
        }
        assert_eq!(repo.get_recent_signal_ids(2).await.unwrap(), vec!["c", "b"]);
    }

    #[tokio::test]
    async fn test_mark_processed_requires_saved_signal() {
        let repo = MemoryRepository::new();
        assert!(repo.mark_processed("ghost", "feed", Utc::now()).await.is_err());
        assert!(repo.get_cursor("feed").await.unwrap().is_none());
    }
}
