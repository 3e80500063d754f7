pub mod exact;
pub mod fill_model;
pub mod ledger;
pub mod realistic;

pub use exact::ExactCopySimulator;
pub use fill_model::{FillModel, FillRequest, FillResult, FillStatus};
pub use ledger::{PositionLedger, SimulatedPosition};
pub use realistic::RealisticSimulator;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::db::Repository;
use crate::learning::{ContextFeatures, ExecutionParams};
use crate::models::order::order_status;
use crate::models::{CopySignal, OutcomeSide, SimFillRecord, SimOrderRecord, Venue};

/// What happened to one signal on one venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Disposition {
    Filled,
    Partial,
    Missed,
    /// Stopped by a pre-fill risk gate.
    Rejected,
    /// No target market above the confidence floor.
    Unmapped,
    /// Nothing to do (a sell with no holding, or a zero-size order).
    Skipped,
}

impl Disposition {
    pub fn as_str(self) -> &'static str {
        match self {
            Disposition::Filled => order_status::FILLED,
            Disposition::Partial => order_status::PARTIAL,
            Disposition::Missed => order_status::MISSED,
            Disposition::Rejected => order_status::REJECTED,
            Disposition::Unmapped => "unmapped",
            Disposition::Skipped => "skipped",
        }
    }
}

impl From<FillStatus> for Disposition {
    fn from(status: FillStatus) -> Self {
        match status {
            FillStatus::Filled => Disposition::Filled,
            FillStatus::Partial => Disposition::Partial,
            FillStatus::Missed => Disposition::Missed,
        }
    }
}

/// Result of `VenueSimulator::process_signal`.
#[derive(Debug, Clone, Serialize)]
pub struct SignalExecution {
    pub venue: Venue,
    pub signal_id: String,
    pub disposition: Disposition,
    pub fill: Option<FillResult>,
    /// Position snapshot after the fill was booked.
    pub position: Option<SimulatedPosition>,
    pub target_market_id: Option<String>,
    pub mapping_confidence: Option<f64>,
    pub latency_ms: u64,
}

impl SignalExecution {
    pub fn new(venue: Venue, signal_id: &str, disposition: Disposition, latency_ms: u64) -> Self {
        Self {
            venue,
            signal_id: signal_id.to_string(),
            disposition,
            fill: None,
            position: None,
            target_market_id: None,
            mapping_confidence: None,
            latency_ms,
        }
    }

    pub fn has_fill(&self) -> bool {
        self.fill.as_ref().is_some_and(|f| f.has_fill())
    }
}

/// Running tallies for one simulator (or one latency bucket).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutionCounters {
    pub signals: u64,
    pub filled: u64,
    pub partial: u64,
    pub missed: u64,
    pub rejected: u64,
    pub unmapped: u64,
    pub skipped: u64,
    /// Notional of everything filled.
    pub volume: Decimal,
    pub slippage_bps_sum: Decimal,
}

impl ExecutionCounters {
    pub fn record(&mut self, execution: &SignalExecution) {
        self.signals += 1;
        match execution.disposition {
            Disposition::Filled => self.filled += 1,
            Disposition::Partial => self.partial += 1,
            Disposition::Missed => self.missed += 1,
            Disposition::Rejected => self.rejected += 1,
            Disposition::Unmapped => self.unmapped += 1,
            Disposition::Skipped => self.skipped += 1,
        }
        if let Some(fill) = execution.fill.as_ref().filter(|f| f.has_fill()) {
            self.volume += fill.notional;
            self.slippage_bps_sum += fill.slippage_bps;
        }
    }

    /// Signals that reached the fill model.
    pub fn attempts(&self) -> u64 {
        self.filled + self.partial + self.missed + self.rejected
    }

    pub fn with_fill(&self) -> u64 {
        self.filled + self.partial
    }

    fn ratio(n: u64, d: u64) -> f64 {
        if d == 0 {
            0.0
        } else {
            n as f64 / d as f64
        }
    }

    pub fn fill_rate(&self) -> f64 {
        Self::ratio(self.filled, self.attempts())
    }

    pub fn partial_rate(&self) -> f64 {
        Self::ratio(self.partial, self.attempts())
    }

    pub fn miss_rate(&self) -> f64 {
        Self::ratio(self.missed + self.rejected, self.attempts())
    }

    /// Share of non-skipped signals that found a target market.
    pub fn mapping_rate(&self) -> f64 {
        Self::ratio(self.attempts(), self.attempts() + self.unmapped)
    }

    /// Mean slippage over orders that got any fill.
    pub fn avg_slippage_bps(&self) -> Decimal {
        match self.with_fill() {
            0 => Decimal::ZERO,
            n => self.slippage_bps_sum / Decimal::from(n),
        }
    }
}

/// One position closed by a market resolution.
#[derive(Debug, Clone)]
pub struct Settlement {
    pub venue: Venue,
    pub market_id: String,
    pub outcome: OutcomeSide,
    pub pnl: Decimal,
    pub position: SimulatedPosition,
    /// Context and parameters of the last order on this market, if known.
    pub decision: Option<(ContextFeatures, ExecutionParams)>,
}

/// Shared contract of the exact-copy and realistic venues.
#[async_trait]
pub trait VenueSimulator: Send {
    fn venue(&self) -> Venue;

    async fn process_signal(&mut self, signal: &CopySignal, params: &ExecutionParams) -> SignalExecution;

    /// Settle whatever this venue holds for a resolved source market.
    async fn settle_source_market(
        &mut self,
        source_market_id: &str,
        outcome: OutcomeSide,
        now: DateTime<Utc>,
    ) -> Vec<Settlement>;

    fn ledger(&self) -> &PositionLedger;

    fn counters(&self) -> &ExecutionCounters;

    /// Drop ledger, caches and counters.
    fn reset(&mut self);
}

/// Deterministic order id: the same signal at the same latency on the same
/// venue always gets the same id.
pub fn order_id(venue: Venue, signal_id: &str, latency_ms: u64) -> String {
    format!("{}:{signal_id}:{latency_ms}", venue.as_str())
}

pub fn order_record(
    signal_id: &str,
    venue: Venue,
    market_id: &str,
    fill: &FillResult,
    disposition: Disposition,
) -> SimOrderRecord {
    SimOrderRecord {
        order_id: fill.order_id.clone(),
        signal_id: signal_id.to_string(),
        venue: venue.as_str().to_string(),
        market_id: market_id.to_string(),
        side: fill.side.as_str().to_string(),
        action: fill.action.as_str().to_string(),
        requested_qty: fill.requested_qty,
        limit_price: fill.limit_price,
        latency_ms: fill.latency_ms.to_i64().unwrap_or(i64::MAX),
        status: disposition.as_str().to_string(),
        filled_qty: fill.filled_qty,
        avg_fill_price: fill.avg_fill_price,
        fee: fill.fee,
        slippage_bps: fill.slippage_bps,
        reject_reason: fill.reject_reason.clone(),
        created_at: fill.created_at,
    }
}

/// Write the order, its level fills and the position snapshot. Failures are
/// logged; the in-memory ledger stays authoritative for the run.
pub(crate) async fn persist_execution(repository: &dyn Repository, market_id: &str, execution: &SignalExecution) {
    let Some(fill) = &execution.fill else {
        return;
    };
    let record = order_record(&execution.signal_id, execution.venue, market_id, fill, execution.disposition);
    if let Err(e) = repository.save_sim_order(&record).await {
        tracing::error!(error = %e, order_id = %record.order_id, "Failed to persist simulated order");
        return;
    }
    for partial in &fill.fills {
        let row = SimFillRecord {
            order_id: fill.order_id.clone(),
            level: partial.level as i32,
            price: partial.price,
            quantity: partial.quantity,
            created_at: fill.created_at,
        };
        if let Err(e) = repository.save_sim_fill(&row).await {
            tracing::error!(error = %e, order_id = %fill.order_id, "Failed to persist simulated fill");
        }
    }
    if let Some(position) = &execution.position {
        if let Err(e) = repository.update_position(position).await {
            tracing::error!(error = %e, market_id, "Failed to persist position");
        }
    }
}

/// One audit line per simulated order.
pub(crate) fn log_execution(signal: &CopySignal, execution: &SignalExecution) {
    let fill = execution.fill.as_ref();
    tracing::info!(
        venue = %execution.venue,
        signal = signal.short_id(),
        action = signal.action.as_str(),
        side = %signal.side,
        qty = %fill.map_or(Decimal::ZERO, |f| f.filled_qty),
        requested = %fill.map_or(Decimal::ZERO, |f| f.requested_qty),
        price = %fill.and_then(|f| f.avg_fill_price).unwrap_or(signal.price),
        slippage_bps = %fill.map_or(Decimal::ZERO, |f| f.slippage_bps.round_dp(1)),
        latency_ms = execution.latency_ms,
        status = execution.disposition.as_str(),
        target = execution.target_market_id.as_deref().unwrap_or("-"),
        "Simulated order"
    );
}
