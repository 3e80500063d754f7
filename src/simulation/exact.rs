use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;

use super::fill_model::{FillRequest, FillResult};
use super::ledger::PositionLedger;
use super::{
    log_execution, order_id, persist_execution, Disposition, ExecutionCounters, Settlement, SignalExecution,
    VenueSimulator,
};
use crate::db::Repository;
use crate::learning::ExecutionParams;
use crate::models::{Action, CopySignal, OutcomeSide, Venue};

/// Best-case baseline on the source venue: every signal fills instantly at
/// the source price, scaled by a fixed fraction. No mapping, no book.
pub struct ExactCopySimulator {
    venue: Venue,
    qty_scale: Decimal,
    repository: Arc<dyn Repository>,
    ledger: PositionLedger,
    counters: ExecutionCounters,
}

impl ExactCopySimulator {
    pub fn new(repository: Arc<dyn Repository>, qty_scale: f64) -> Self {
        let venue = Venue::Polymarket;
        Self {
            venue,
            qty_scale: Decimal::try_from(qty_scale).unwrap_or(Decimal::ONE),
            repository,
            ledger: PositionLedger::new(venue),
            counters: ExecutionCounters::default(),
        }
    }

    fn finish(&mut self, signal: &CopySignal, execution: SignalExecution) -> SignalExecution {
        self.counters.record(&execution);
        log_execution(signal, &execution);
        execution
    }
}

#[async_trait]
impl VenueSimulator for ExactCopySimulator {
    fn venue(&self) -> Venue {
        self.venue
    }

    /// The learned parameters do not apply here; the baseline always copies
    /// the fixed fraction.
    async fn process_signal(&mut self, signal: &CopySignal, _params: &ExecutionParams) -> SignalExecution {
        let now = signal.timestamp;
        let mut quantity = (signal.quantity * self.qty_scale).round_dp(6);

        if signal.action == Action::Sell {
            let held = self
                .ledger
                .get(&signal.market_id)
                .map_or(Decimal::ZERO, |p| p.qty(signal.side));
            quantity = quantity.min(held);
        }
        if quantity <= Decimal::ZERO {
            tracing::debug!(signal = signal.short_id(), "Exact copy: nothing to do");
            let skipped = SignalExecution::new(self.venue, &signal.signal_id, Disposition::Skipped, 0);
            return self.finish(signal, skipped);
        }

        let request = FillRequest {
            side: signal.side,
            action: signal.action,
            quantity,
            limit_price: signal.price,
            reference_price: signal.price,
            latency_ms: 0,
        };
        let fill = FillResult::exact(order_id(self.venue, &signal.signal_id, 0), &request, now);

        let booked = match signal.action {
            Action::Buy => self
                .ledger
                .add_fill(&signal.market_id, signal.side, fill.filled_qty, fill.total_cost, now)
                .map(|p| p.clone()),
            Action::Sell => {
                let position = self.ledger.get_or_create(&signal.market_id, now);
                position
                    .reduce_position(signal.side, fill.filled_qty, now)
                    .map(|(_, basis)| {
                        position.realize(fill.net_proceeds() - basis);
                        position.clone()
                    })
            }
        };

        let mut execution = SignalExecution::new(self.venue, &signal.signal_id, Disposition::Filled, 0);
        execution.target_market_id = Some(signal.market_id.clone());
        match booked {
            Ok(position) => execution.position = Some(position),
            Err(e) => {
                tracing::warn!(error = %e, market_id = %signal.market_id, "Exact copy: fill not booked");
                execution.disposition = Disposition::Skipped;
                return self.finish(signal, execution);
            }
        }
        execution.fill = Some(fill);

        persist_execution(self.repository.as_ref(), &signal.market_id, &execution).await;
        self.finish(signal, execution)
    }

    async fn settle_source_market(
        &mut self,
        source_market_id: &str,
        outcome: OutcomeSide,
        now: DateTime<Utc>,
    ) -> Vec<Settlement> {
        match self.ledger.settle(source_market_id, outcome, Decimal::ONE, now) {
            Some(Ok(pnl)) => {
                let Some(position) = self.ledger.get(source_market_id).cloned() else {
                    return Vec::new();
                };
                tracing::info!(
                    venue = %self.venue,
                    market_id = source_market_id,
                    outcome = %outcome,
                    pnl = %pnl,
                    "Position settled"
                );
                vec![Settlement {
                    venue: self.venue,
                    market_id: source_market_id.to_string(),
                    outcome,
                    pnl,
                    position,
                    decision: None,
                }]
            }
            Some(Err(e)) => {
                tracing::debug!(error = %e, "Exact copy: already settled");
                Vec::new()
            }
            None => Vec::new(),
        }
    }

    fn ledger(&self) -> &PositionLedger {
        &self.ledger
    }

    fn counters(&self) -> &ExecutionCounters {
        &self.counters
    }

    fn reset(&mut self) {
        self.ledger.clear();
        self.counters = ExecutionCounters::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryRepository;
    use crate::models::SignalMeta;

    fn d(v: &str) -> Decimal {
        v.parse().unwrap()
    }

    fn params() -> ExecutionParams {
        ExecutionParams {
            min_mapping_confidence: 0.7,
            slippage_buffer_bps: 50,
            qty_scale: 0.5,
        }
    }

    fn signal(id: &str, side: OutcomeSide, action: Action, qty: &str, price: &str) -> CopySignal {
        CopySignal {
            signal_id: id.into(),
            timestamp: Utc::now(),
            source: "test".into(),
            market_id: "0xcond".into(),
            market_name: "Bitcoin Up or Down".into(),
            market_slug: String::new(),
            side,
            action,
            quantity: d(qty),
            price: d(price),
            value: d(qty) * d(price),
            meta: SignalMeta::default(),
        }
    }

    #[tokio::test]
    async fn test_buy_fills_at_source_price_scaled() {
        let repo = Arc::new(MemoryRepository::new());
        let mut sim = ExactCopySimulator::new(repo.clone(), 0.5);
        let exec = sim
            .process_signal(&signal("a", OutcomeSide::Yes, Action::Buy, "100", "0.50"), &params())
            .await;

        assert_eq!(exec.disposition, Disposition::Filled);
        let fill = exec.fill.unwrap();
        assert_eq!(fill.filled_qty, d("50"));
        assert_eq!(fill.avg_fill_price, Some(d("0.50")));
        let pos = sim.ledger().get("0xcond").unwrap();
        assert_eq!(pos.yes.qty, d("50"));
        assert_eq!(pos.yes.cost, d("25"));
        assert_eq!(repo.orders().await.len(), 1);
    }

    #[tokio::test]
    async fn test_sell_without_holding_is_skipped() {
        let mut sim = ExactCopySimulator::new(Arc::new(MemoryRepository::new()), 0.5);
        let exec = sim
            .process_signal(&signal("s", OutcomeSide::Yes, Action::Sell, "10", "0.60"), &params())
            .await;
        assert_eq!(exec.disposition, Disposition::Skipped);
        assert!(exec.fill.is_none());
    }

    #[tokio::test]
    async fn test_sell_realizes_against_average_cost() {
        let mut sim = ExactCopySimulator::new(Arc::new(MemoryRepository::new()), 1.0);
        sim.process_signal(&signal("b", OutcomeSide::Yes, Action::Buy, "100", "0.40"), &params())
            .await;
        let exec = sim
            .process_signal(&signal("s", OutcomeSide::Yes, Action::Sell, "50", "0.60"), &params())
            .await;

        assert_eq!(exec.disposition, Disposition::Filled);
        let pos = sim.ledger().get("0xcond").unwrap();
        assert_eq!(pos.yes.qty, d("50"));
        assert_eq!(pos.yes.cost, d("20"));
        // 50 x 0.60 - 50 x 0.40
        assert_eq!(pos.realized_pnl, d("10"));
    }

    #[tokio::test]
    async fn test_settlement_of_hedged_position() {
        let mut sim = ExactCopySimulator::new(Arc::new(MemoryRepository::new()), 1.0);
        sim.process_signal(&signal("y", OutcomeSide::Yes, Action::Buy, "100", "0.50"), &params())
            .await;
        sim.process_signal(&signal("n", OutcomeSide::No, Action::Buy, "50", "0.50"), &params())
            .await;

        let settled = sim.settle_source_market("0xcond", OutcomeSide::Yes, Utc::now()).await;
        assert_eq!(settled.len(), 1);
        assert_eq!(settled[0].pnl, d("25"));
        assert!(sim.ledger().open_positions().next().is_none());
        // Settling twice is a no-op.
        assert!(sim.settle_source_market("0xcond", OutcomeSide::Yes, Utc::now()).await.is_empty());
    }
}
