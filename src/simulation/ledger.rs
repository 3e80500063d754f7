use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::models::{OutcomeSide, PositionRow, Venue};

#[derive(Debug, Error, PartialEq)]
pub enum LedgerError {
    #[error("position {0} is settled")]
    Settled(String),
}

/// Quantity and total cost held on one outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SideHolding {
    pub qty: Decimal,
    pub cost: Decimal,
}

impl SideHolding {
    pub fn avg_cost(&self) -> Option<Decimal> {
        (self.qty > Decimal::ZERO).then(|| self.cost / self.qty)
    }
}

/// Two-sided holding in one market on one venue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulatedPosition {
    pub venue: Venue,
    pub market_id: String,
    pub yes: SideHolding,
    pub no: SideHolding,
    pub realized_pnl: Decimal,
    pub settled_outcome: Option<OutcomeSide>,
    pub settled_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl SimulatedPosition {
    pub fn new(venue: Venue, market_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            venue,
            market_id: market_id.into(),
            yes: SideHolding::default(),
            no: SideHolding::default(),
            realized_pnl: Decimal::ZERO,
            settled_outcome: None,
            settled_at: None,
            updated_at: now,
        }
    }

    fn holding(&self, side: OutcomeSide) -> &SideHolding {
        match side {
            OutcomeSide::Yes => &self.yes,
            OutcomeSide::No => &self.no,
        }
    }

    fn holding_mut(&mut self, side: OutcomeSide) -> &mut SideHolding {
        match side {
            OutcomeSide::Yes => &mut self.yes,
            OutcomeSide::No => &mut self.no,
        }
    }

    pub fn qty(&self, side: OutcomeSide) -> Decimal {
        self.holding(side).qty
    }

    pub fn is_settled(&self) -> bool {
        self.settled_at.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.yes.qty.is_zero() && self.no.qty.is_zero()
    }

    /// Add `qty` at `cost` (fee included) to one side.
    pub fn add_fill(
        &mut self,
        side: OutcomeSide,
        qty: Decimal,
        cost: Decimal,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        if self.is_settled() {
            return Err(LedgerError::Settled(self.market_id.clone()));
        }
        let h = self.holding_mut(side);
        h.qty += qty;
        h.cost += cost;
        self.updated_at = now;
        Ok(())
    }

    /// Remove up to `qty` from one side at average cost. Returns the
    /// (quantity removed, cost basis removed).
    pub fn reduce_position(
        &mut self,
        side: OutcomeSide,
        qty: Decimal,
        now: DateTime<Utc>,
    ) -> Result<(Decimal, Decimal), LedgerError> {
        if self.is_settled() {
            return Err(LedgerError::Settled(self.market_id.clone()));
        }
        let h = self.holding_mut(side);
        if qty <= Decimal::ZERO || h.qty <= Decimal::ZERO {
            return Ok((Decimal::ZERO, Decimal::ZERO));
        }
        let removed = if qty >= h.qty {
            let all = (h.qty, h.cost);
            *h = SideHolding::default();
            all
        } else {
            let basis = h.cost * qty / h.qty;
            h.qty -= qty;
            h.cost -= basis;
            (qty, basis)
        };
        self.updated_at = now;
        Ok(removed)
    }

    /// Book a realized amount (e.g. sale proceeds minus basis).
    pub fn realize(&mut self, pnl: Decimal) {
        self.realized_pnl += pnl;
    }

    pub fn total_cost(&self) -> Decimal {
        self.yes.cost + self.no.cost
    }

    pub fn is_hedged(&self) -> bool {
        self.yes.qty > Decimal::ZERO && self.no.qty > Decimal::ZERO
    }

    /// Quantity held on both sides.
    pub fn hedged_qty(&self) -> Decimal {
        self.yes.qty.min(self.no.qty)
    }

    /// Guaranteed payout of the hedged quantity ($1 per pair).
    pub fn hedge_locked_value(&self) -> Decimal {
        self.hedged_qty()
    }

    /// Cost attributable to the hedged quantity, proportional per side.
    pub fn hedge_locked_cost(&self) -> Decimal {
        let hedged = self.hedged_qty();
        if hedged.is_zero() {
            return Decimal::ZERO;
        }
        self.yes.cost * hedged / self.yes.qty + self.no.cost * hedged / self.no.qty
    }

    pub fn hedge_locked_edge(&self) -> Decimal {
        self.hedge_locked_value() - self.hedge_locked_cost()
    }

    pub fn unhedged_yes(&self) -> Decimal {
        self.yes.qty - self.hedged_qty()
    }

    pub fn unhedged_no(&self) -> Decimal {
        self.no.qty - self.hedged_qty()
    }

    /// Resolve the market. PnL = winning quantity x payout - total cost.
    /// Holdings stay on record; the position accepts no further changes.
    pub fn settle(
        &mut self,
        outcome: OutcomeSide,
        payout_per_unit: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Decimal, LedgerError> {
        if self.is_settled() {
            return Err(LedgerError::Settled(self.market_id.clone()));
        }
        let pnl = self.holding(outcome).qty * payout_per_unit - self.total_cost();
        self.realized_pnl += pnl;
        self.settled_outcome = Some(outcome);
        self.settled_at = Some(now);
        self.updated_at = now;
        Ok(pnl)
    }

    pub fn to_row(&self) -> PositionRow {
        PositionRow {
            venue: self.venue.as_str().to_string(),
            market_id: self.market_id.clone(),
            yes_qty: self.yes.qty,
            yes_cost: self.yes.cost,
            no_qty: self.no.qty,
            no_cost: self.no.cost,
            realized_pnl: self.realized_pnl,
            settled_outcome: self.settled_outcome.map(|o| o.as_str().to_string()),
            settled_at: self.settled_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LedgerSummary {
    pub open_positions: usize,
    pub settled_positions: usize,
    pub hedged_positions: usize,
    pub total_cost_open: Decimal,
    pub total_realized_pnl: Decimal,
    pub total_locked_edge: Decimal,
}

/// All positions one simulator holds, keyed by market id.
#[derive(Debug, Clone)]
pub struct PositionLedger {
    venue: Venue,
    positions: BTreeMap<String, SimulatedPosition>,
}

impl PositionLedger {
    pub fn new(venue: Venue) -> Self {
        Self {
            venue,
            positions: BTreeMap::new(),
        }
    }

    pub fn get(&self, market_id: &str) -> Option<&SimulatedPosition> {
        self.positions.get(market_id)
    }

    pub fn get_or_create(&mut self, market_id: &str, now: DateTime<Utc>) -> &mut SimulatedPosition {
        let venue = self.venue;
        self.positions
            .entry(market_id.to_string())
            .or_insert_with(|| SimulatedPosition::new(venue, market_id, now))
    }

    pub fn get_mut(&mut self, market_id: &str) -> Option<&mut SimulatedPosition> {
        self.positions.get_mut(market_id)
    }

    pub fn add_fill(
        &mut self,
        market_id: &str,
        side: OutcomeSide,
        qty: Decimal,
        cost: Decimal,
        now: DateTime<Utc>,
    ) -> Result<&SimulatedPosition, LedgerError> {
        let position = self.get_or_create(market_id, now);
        position.add_fill(side, qty, cost, now)?;
        Ok(position)
    }

    pub fn settle(
        &mut self,
        market_id: &str,
        outcome: OutcomeSide,
        payout_per_unit: Decimal,
        now: DateTime<Utc>,
    ) -> Option<Result<Decimal, LedgerError>> {
        self.positions
            .get_mut(market_id)
            .map(|p| p.settle(outcome, payout_per_unit, now))
    }

    pub fn positions(&self) -> impl Iterator<Item = &SimulatedPosition> {
        self.positions.values()
    }

    pub fn open_positions(&self) -> impl Iterator<Item = &SimulatedPosition> {
        self.positions.values().filter(|p| !p.is_settled() && !p.is_empty())
    }

    pub fn open_market_ids(&self) -> Vec<String> {
        self.open_positions().map(|p| p.market_id.clone()).collect()
    }

    pub fn total_realized_pnl(&self) -> Decimal {
        self.positions.values().map(|p| p.realized_pnl).sum()
    }

    /// Locked edge across open hedged positions.
    pub fn total_locked_edge(&self) -> Decimal {
        self.open_positions()
            .filter(|p| p.is_hedged())
            .map(|p| p.hedge_locked_edge())
            .sum()
    }

    pub fn summary(&self) -> LedgerSummary {
        LedgerSummary {
            open_positions: self.open_positions().count(),
            settled_positions: self.positions.values().filter(|p| p.is_settled()).count(),
            hedged_positions: self.open_positions().filter(|p| p.is_hedged()).count(),
            total_cost_open: self.open_positions().map(|p| p.total_cost()).sum(),
            total_realized_pnl: self.total_realized_pnl(),
            total_locked_edge: self.total_locked_edge(),
        }
    }

    pub fn clear(&mut self) {
        self.positions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(v: &str) -> Decimal {
        v.parse().unwrap()
    }

    fn hedged() -> SimulatedPosition {
        let now = Utc::now();
        let mut p = SimulatedPosition::new(Venue::Polymarket, "m", now);
        p.add_fill(OutcomeSide::Yes, d("100"), d("50"), now).unwrap();
        p.add_fill(OutcomeSide::No, d("100"), d("45"), now).unwrap();
        p
    }

    #[test]
    fn test_hedge_accounting() {
        let p = hedged();
        assert!(p.is_hedged());
        assert_eq!(p.hedge_locked_value(), d("100"));
        assert_eq!(p.hedge_locked_cost(), d("95"));
        assert_eq!(p.hedge_locked_edge(), d("5"));
        assert_eq!(p.unhedged_yes(), Decimal::ZERO);
        assert_eq!(p.yes.avg_cost(), Some(d("0.5")));
    }

    #[test]
    fn test_partial_hedge_uses_proportional_cost() {
        let now = Utc::now();
        let mut p = SimulatedPosition::new(Venue::Kalshi, "m", now);
        p.add_fill(OutcomeSide::Yes, d("200"), d("100"), now).unwrap();
        p.add_fill(OutcomeSide::No, d("100"), d("45"), now).unwrap();
        assert_eq!(p.hedged_qty(), d("100"));
        // Half of the YES cost plus all of the NO cost.
        assert_eq!(p.hedge_locked_cost(), d("95"));
        assert_eq!(p.unhedged_yes(), d("100"));
    }

    #[test]
    fn test_settle_yes_and_no() {
        let mut yes_win = hedged();
        assert_eq!(yes_win.settle(OutcomeSide::Yes, Decimal::ONE, Utc::now()), Ok(d("5")));

        let now = Utc::now();
        let mut one_sided = SimulatedPosition::new(Venue::Polymarket, "m", now);
        one_sided.add_fill(OutcomeSide::Yes, d("50"), d("25"), now).unwrap();
        let mut lose = one_sided.clone();
        assert_eq!(one_sided.settle(OutcomeSide::Yes, Decimal::ONE, now), Ok(d("25")));
        assert_eq!(lose.settle(OutcomeSide::No, Decimal::ONE, now), Ok(d("-25")));
    }

    #[test]
    fn test_settle_two_sided_position_counts_both_costs() {
        let now = Utc::now();
        let mut yes_win = SimulatedPosition::new(Venue::Kalshi, "m", now);
        yes_win.add_fill(OutcomeSide::Yes, d("100"), d("50"), now).unwrap();
        yes_win.add_fill(OutcomeSide::No, d("50"), d("25"), now).unwrap();
        let mut no_win = yes_win.clone();

        // 100 paid out against 75 of cost on either side.
        assert_eq!(yes_win.settle(OutcomeSide::Yes, Decimal::ONE, now), Ok(d("25")));
        assert_eq!(no_win.settle(OutcomeSide::No, Decimal::ONE, now), Ok(d("-25")));
        assert_eq!(yes_win.realized_pnl, d("25"));
        assert_eq!(no_win.settled_outcome, Some(OutcomeSide::No));
    }

    #[test]
    fn test_settled_position_is_frozen() {
        let mut p = hedged();
        p.settle(OutcomeSide::No, Decimal::ONE, Utc::now()).unwrap();
        assert!(p.settle(OutcomeSide::Yes, Decimal::ONE, Utc::now()).is_err());
        assert!(p.add_fill(OutcomeSide::Yes, d("1"), d("1"), Utc::now()).is_err());
        assert!(p.reduce_position(OutcomeSide::Yes, d("1"), Utc::now()).is_err());
    }

    #[test]
    fn test_reduce_clamps_and_returns_basis() {
        let mut p = hedged();
        let (qty, basis) = p.reduce_position(OutcomeSide::Yes, d("40"), Utc::now()).unwrap();
        assert_eq!((qty, basis), (d("40"), d("20")));
        assert_eq!(p.yes.qty, d("60"));

        let (qty, basis) = p.reduce_position(OutcomeSide::Yes, d("1000"), Utc::now()).unwrap();
        assert_eq!((qty, basis), (d("60"), d("30")));
        assert_eq!(p.yes, SideHolding::default());
        assert!(!p.is_hedged());
    }

    #[test]
    fn test_ledger_totals() {
        let now = Utc::now();
        let mut ledger = PositionLedger::new(Venue::Polymarket);
        ledger.add_fill("a", OutcomeSide::Yes, d("100"), d("50"), now).unwrap();
        ledger.add_fill("a", OutcomeSide::No, d("100"), d("45"), now).unwrap();
        ledger.add_fill("b", OutcomeSide::Yes, d("10"), d("4"), now).unwrap();
        assert_eq!(ledger.total_locked_edge(), d("5"));

        ledger.settle("b", OutcomeSide::No, Decimal::ONE, now).unwrap().unwrap();
        assert_eq!(ledger.total_realized_pnl(), d("-4"));
        assert_eq!(ledger.open_market_ids(), vec!["a".to_string()]);

        let summary = ledger.summary();
        assert_eq!(summary.open_positions, 1);
        assert_eq!(summary.settled_positions, 1);
        assert_eq!(summary.hedged_positions, 1);
        assert!(ledger.settle("missing", OutcomeSide::Yes, Decimal::ONE, now).is_none());
    }
}
