use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::order::order_status;
use crate::models::{Action, BookLevel, Orderbook, OutcomeSide};

const BPS: Decimal = Decimal::from_parts(10_000, 0, 0, false, 0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FillStatus {
    Filled,
    Partial,
    Missed,
}

impl FillStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FillStatus::Filled => order_status::FILLED,
            FillStatus::Partial => order_status::PARTIAL,
            FillStatus::Missed => order_status::MISSED,
        }
    }
}

/// One consumed book level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialFill {
    pub level: usize,
    pub price: Decimal,
    pub quantity: Decimal,
}

#[derive(Debug, Clone)]
pub struct FillRequest {
    pub side: OutcomeSide,
    pub action: Action,
    pub quantity: Decimal,
    pub limit_price: Decimal,
    /// Price slippage is measured against (normally the source fill price).
    pub reference_price: Decimal,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillResult {
    pub order_id: String,
    pub status: FillStatus,
    pub side: OutcomeSide,
    pub action: Action,
    pub requested_qty: Decimal,
    pub filled_qty: Decimal,
    pub limit_price: Decimal,
    /// Limit after the slippage buffer; `None` for market orders.
    pub effective_limit: Option<Decimal>,
    pub avg_fill_price: Option<Decimal>,
    pub fills: Vec<PartialFill>,
    pub notional: Decimal,
    pub fee: Decimal,
    /// notional + fee
    pub total_cost: Decimal,
    /// Positive = worse than the reference price.
    pub slippage_bps: Decimal,
    pub latency_ms: u64,
    pub reject_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl FillResult {
    pub fn is_filled(&self) -> bool {
        self.status == FillStatus::Filled
    }

    pub fn has_fill(&self) -> bool {
        self.filled_qty > Decimal::ZERO
    }

    /// Sale proceeds net of fee.
    pub fn net_proceeds(&self) -> Decimal {
        self.notional - self.fee
    }

    /// A fill at exactly the requested price, used by the exact-copy venue.
    pub fn exact(order_id: String, request: &FillRequest, timestamp: DateTime<Utc>) -> Self {
        let notional = request.quantity * request.limit_price;
        Self {
            order_id,
            status: FillStatus::Filled,
            side: request.side,
            action: request.action,
            requested_qty: request.quantity,
            filled_qty: request.quantity,
            limit_price: request.limit_price,
            effective_limit: Some(request.limit_price),
            avg_fill_price: Some(request.limit_price),
            fills: vec![PartialFill {
                level: 0,
                price: request.limit_price,
                quantity: request.quantity,
            }],
            notional,
            fee: Decimal::ZERO,
            total_cost: notional,
            slippage_bps: Decimal::ZERO,
            latency_ms: request.latency_ms,
            reject_reason: None,
            created_at: timestamp,
        }
    }

    /// A non-fill with an explanatory reason.
    pub fn missed(order_id: String, request: &FillRequest, reason: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            order_id,
            status: FillStatus::Missed,
            side: request.side,
            action: request.action,
            requested_qty: request.quantity,
            filled_qty: Decimal::ZERO,
            limit_price: request.limit_price,
            effective_limit: None,
            avg_fill_price: None,
            fills: Vec::new(),
            notional: Decimal::ZERO,
            fee: Decimal::ZERO,
            total_cost: Decimal::ZERO,
            slippage_bps: Decimal::ZERO,
            latency_ms: request.latency_ms,
            reject_reason: Some(reason.into()),
            created_at: timestamp,
        }
    }
}

/// Walks an orderbook to price a simulated order.
#[derive(Debug, Clone)]
pub struct FillModel {
    fee_bps: Decimal,
    slippage_buffer_bps: Decimal,
}

impl FillModel {
    pub fn new(fee_bps: Decimal, slippage_buffer_bps: Decimal) -> Self {
        Self {
            fee_bps,
            slippage_buffer_bps,
        }
    }

    pub fn fee_bps(&self) -> Decimal {
        self.fee_bps
    }

    /// Same model with a different buffer (the learner tunes it per signal).
    pub fn with_buffer(&self, slippage_buffer_bps: Decimal) -> Self {
        Self {
            fee_bps: self.fee_bps,
            slippage_buffer_bps,
        }
    }

    /// Limit widened by the buffer in the unfavourable direction.
    pub fn effective_limit(&self, action: Action, limit_price: Decimal) -> Decimal {
        let buffer = self.slippage_buffer_bps / BPS;
        match action {
            Action::Buy => limit_price + buffer,
            Action::Sell => limit_price - buffer,
        }
    }

    /// Consume levels at prices no worse than the buffered limit.
    pub fn simulate_limit_order(
        &self,
        order_id: String,
        book: &Orderbook,
        request: &FillRequest,
        timestamp: DateTime<Utc>,
    ) -> FillResult {
        let limit = self.effective_limit(request.action, request.limit_price);
        self.walk(order_id, book, request, Some(limit), timestamp)
    }

    /// Consume levels without any price bound.
    pub fn simulate_market_order(
        &self,
        order_id: String,
        book: &Orderbook,
        request: &FillRequest,
        timestamp: DateTime<Utc>,
    ) -> FillResult {
        self.walk(order_id, book, request, None, timestamp)
    }

    /// Fraction of the requested size available at or better than `limit`
    /// (unbuffered), capped at 1.
    pub fn estimate_fill_probability(
        &self,
        book: &Orderbook,
        side: OutcomeSide,
        action: Action,
        quantity: Decimal,
        limit: Decimal,
    ) -> Decimal {
        if quantity <= Decimal::ZERO {
            return Decimal::ONE;
        }
        let available = book.depth_at_or_better(side, action, limit);
        (available / quantity).min(Decimal::ONE)
    }

    fn walk(
        &self,
        order_id: String,
        book: &Orderbook,
        request: &FillRequest,
        limit: Option<Decimal>,
        timestamp: DateTime<Utc>,
    ) -> FillResult {
        let levels: &[BookLevel] = book.levels_for(request.side, request.action);
        let mut remaining = request.quantity.max(Decimal::ZERO);
        let mut fills = Vec::new();
        let mut notional = Decimal::ZERO;

        for (idx, level) in levels.iter().enumerate() {
            if remaining <= Decimal::ZERO {
                break;
            }
            let crosses = match (limit, request.action) {
                (Some(l), Action::Buy) => level.price > l,
                (Some(l), Action::Sell) => level.price < l,
                (None, _) => false,
            };
            if crosses {
                break;
            }
            if level.size <= Decimal::ZERO {
                continue;
            }
            let take = remaining.min(level.size);
            notional += take * level.price;
            remaining -= take;
            fills.push(PartialFill {
                level: idx,
                price: level.price,
                quantity: take,
            });
        }

        let filled_qty = request.quantity.max(Decimal::ZERO) - remaining;
        let status = if filled_qty <= Decimal::ZERO {
            FillStatus::Missed
        } else if remaining > Decimal::ZERO {
            FillStatus::Partial
        } else {
            FillStatus::Filled
        };

        let avg_fill_price = (filled_qty > Decimal::ZERO).then(|| notional / filled_qty);
        let fee = notional * self.fee_bps / BPS;
        let slippage_bps = match avg_fill_price {
            Some(avg) if request.reference_price > Decimal::ZERO => match request.action {
                Action::Buy => (avg - request.reference_price) / request.reference_price * BPS,
                Action::Sell => (request.reference_price - avg) / request.reference_price * BPS,
            },
            _ => Decimal::ZERO,
        };

        let reject_reason = match status {
            FillStatus::Missed if levels.is_empty() => Some("no liquidity on book side".to_string()),
            FillStatus::Missed => Some("no liquidity within limit".to_string()),
            _ => None,
        };

        FillResult {
            order_id,
            status,
            side: request.side,
            action: request.action,
            requested_qty: request.quantity,
            filled_qty,
            limit_price: request.limit_price,
            effective_limit: limit,
            avg_fill_price,
            fills,
            notional,
            fee,
            total_cost: notional + fee,
            slippage_bps,
            latency_ms: request.latency_ms,
            reject_reason,
            created_at: timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Venue;

    fn d(v: &str) -> Decimal {
        v.parse().unwrap()
    }

    fn book() -> Orderbook {
        let mut b = Orderbook::empty("KXBTC15M", Venue::Kalshi, Utc::now());
        b.yes_asks = vec![
            BookLevel::new(d("0.50"), d("40")),
            BookLevel::new(d("0.52"), d("40")),
            BookLevel::new(d("0.60"), d("100")),
        ];
        b.yes_bids = vec![BookLevel::new(d("0.48"), d("30")), BookLevel::new(d("0.45"), d("50"))];
        b
    }

    fn buy(qty: &str, limit: &str) -> FillRequest {
        FillRequest {
            side: OutcomeSide::Yes,
            action: Action::Buy,
            quantity: d(qty),
            limit_price: d(limit),
            reference_price: d(limit),
            latency_ms: 2_000,
        }
    }

    #[test]
    fn test_full_fill_across_levels() {
        // Buffer of 300 bps lifts the limit to 0.53.
        let model = FillModel::new(d("70"), d("300"));
        let r = model.simulate_limit_order("o1".into(), &book(), &buy("60", "0.50"), Utc::now());
        assert_eq!(r.status, FillStatus::Filled);
        assert_eq!(r.filled_qty, d("60"));
        assert_eq!(r.fills.len(), 2);
        // 40 @ 0.50 + 20 @ 0.52 = 30.4
        assert_eq!(r.notional, d("30.4"));
        assert_eq!(r.avg_fill_price, Some(r.notional / r.filled_qty));
        assert_eq!(r.fee, d("30.4") * d("70") / d("10000"));
        assert_eq!(r.total_cost, r.notional + r.fee);
        assert!(r.slippage_bps > Decimal::ZERO);
    }

    #[test]
    fn test_partial_fill_stops_at_limit() {
        let model = FillModel::new(d("70"), d("50"));
        // Effective limit 0.505 excludes 0.52.
        let r = model.simulate_limit_order("o2".into(), &book(), &buy("100", "0.50"), Utc::now());
        assert_eq!(r.status, FillStatus::Partial);
        assert_eq!(r.filled_qty, d("40"));
        assert_eq!(r.effective_limit, Some(d("0.505")));
    }

    #[test]
    fn test_missed_when_book_above_limit() {
        let model = FillModel::new(d("70"), d("0"));
        let r = model.simulate_limit_order("o3".into(), &book(), &buy("10", "0.45"), Utc::now());
        assert_eq!(r.status, FillStatus::Missed);
        assert_eq!(r.filled_qty, Decimal::ZERO);
        assert_eq!(r.avg_fill_price, None);
        assert!(r.reject_reason.is_some());
    }

    #[test]
    fn test_market_order_has_no_bound() {
        let model = FillModel::new(d("0"), d("0"));
        let r = model.simulate_market_order("o4".into(), &book(), &buy("150", "0.01"), Utc::now());
        assert_eq!(r.status, FillStatus::Filled);
        assert_eq!(r.fills.len(), 3);
    }

    #[test]
    fn test_filled_never_exceeds_requested_or_liquidity() {
        let model = FillModel::new(d("70"), d("200"));
        for qty in ["1", "39.5", "80", "180", "500"] {
            let r = model.simulate_market_order("o".into(), &book(), &buy(qty, "0.5"), Utc::now());
            assert!(r.filled_qty <= d(qty));
            assert!(r.filled_qty <= book().total_depth(OutcomeSide::Yes, Action::Buy));
            let sum: Decimal = r.fills.iter().map(|f| f.price * f.quantity).sum();
            assert_eq!(sum, r.notional);
        }
    }

    #[test]
    fn test_sell_walks_bids() {
        let model = FillModel::new(d("0"), d("100"));
        let request = FillRequest {
            side: OutcomeSide::Yes,
            action: Action::Sell,
            quantity: d("50"),
            limit_price: d("0.48"),
            reference_price: d("0.48"),
            latency_ms: 0,
        };
        // Effective limit 0.47 excludes 0.45.
        let r = model.simulate_limit_order("o5".into(), &book(), &request, Utc::now());
        assert_eq!(r.filled_qty, d("30"));
        assert_eq!(r.slippage_bps, Decimal::ZERO);
        assert_eq!(r.net_proceeds(), r.notional);
    }

    #[test]
    fn test_fill_probability() {
        let model = FillModel::new(d("0"), d("0"));
        let b = book();
        assert_eq!(model.estimate_fill_probability(&b, OutcomeSide::Yes, Action::Buy, d("20"), d("0.50")), Decimal::ONE);
        assert_eq!(model.estimate_fill_probability(&b, OutcomeSide::Yes, Action::Buy, d("80"), d("0.50")), d("0.5"));
        assert_eq!(model.estimate_fill_probability(&b, OutcomeSide::No, Action::Buy, d("10"), d("0.50")), Decimal::ZERO);
    }

    #[test]
    fn test_empty_book_misses() {
        let model = FillModel::new(d("70"), d("50"));
        let empty = Orderbook::empty("x", Venue::Kalshi, Utc::now());
        let r = model.simulate_limit_order("o6".into(), &empty, &buy("10", "0.5"), Utc::now());
        assert_eq!(r.status, FillStatus::Missed);
        assert_eq!(r.reject_reason.as_deref(), Some("no liquidity on book side"));
    }
}
