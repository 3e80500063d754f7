use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::fill_model::{FillModel, FillRequest, FillResult};
use super::ledger::PositionLedger;
use super::{
    log_execution, order_id, persist_execution, Disposition, ExecutionCounters, Settlement, SignalExecution,
    VenueSimulator,
};
use crate::config::AppConfig;
use crate::db::Repository;
use crate::execution::risk::{check_fill_probability, check_slippage, ExecutionLimits};
use crate::learning::{ContextFeatures, ExecutionParams};
use crate::mapping::{MappingResult, MarketMapper};
use crate::models::{Action, CopySignal, MarketFilter, Orderbook, OutcomeSide, Venue};
use crate::venues::VenueAdapter;

const RECENT_WINDOW: usize = 50;
const PRICE_HISTORY: usize = 20;
const CANDIDATE_LIMIT: usize = 200;

/// Where the simulator reads "now" from when it asks for a book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimClock {
    /// Latest book, through the TTL cache. Used against live venues.
    Wall,
    /// Book as of `signal.timestamp + latency`, never served from the TTL
    /// cache. Used with recorded data so latency produces deterministic
    /// price drift.
    Signal,
}

/// Target-venue simulator: map, fetch book, gate, walk, book.
pub struct RealisticSimulator {
    venue: Venue,
    adapter: Arc<dyn VenueAdapter>,
    repository: Arc<dyn Repository>,
    mapper: MarketMapper,
    fill_model: FillModel,
    limits: ExecutionLimits,
    max_qty_scale: f64,
    ledger: PositionLedger,
    clock: SimClock,
    latency_ms: u64,
    book_ttl: Duration,
    book_cache: HashMap<String, (Instant, Orderbook)>,
    counters: ExecutionCounters,
    by_latency: BTreeMap<u64, ExecutionCounters>,
    /// (filled, slippage_bps) of the most recent attempts.
    recent: VecDeque<(bool, f64)>,
    price_history: HashMap<String, VecDeque<f64>>,
    /// Context and parameters of the last order per target market.
    decisions: HashMap<String, (ContextFeatures, ExecutionParams)>,
    /// Context computed for the signal about to be processed.
    last_context: Option<(String, ContextFeatures)>,
}

impl RealisticSimulator {
    pub fn new(
        adapter: Arc<dyn VenueAdapter>,
        repository: Arc<dyn Repository>,
        config: &AppConfig,
        clock: SimClock,
    ) -> Self {
        let venue = adapter.venue();
        Self {
            venue,
            adapter,
            repository,
            mapper: MarketMapper::new(config.source_timezone, config.max_mapping_time_diff_minutes),
            fill_model: FillModel::new(config.fee_bps, Decimal::from(config.slippage_bps_buffer)),
            limits: ExecutionLimits::from_config(config),
            max_qty_scale: config.max_qty_scale,
            ledger: PositionLedger::new(venue),
            clock,
            latency_ms: config.default_latency_ms,
            book_ttl: Duration::from_millis(config.orderbook_ttl_ms),
            book_cache: HashMap::new(),
            counters: ExecutionCounters::default(),
            by_latency: BTreeMap::new(),
            recent: VecDeque::with_capacity(RECENT_WINDOW),
            price_history: HashMap::new(),
            decisions: HashMap::new(),
            last_context: None,
        }
    }

    pub fn latency_ms(&self) -> u64 {
        self.latency_ms
    }

    pub fn set_latency(&mut self, latency_ms: u64) {
        self.latency_ms = latency_ms;
    }

    pub fn by_latency(&self) -> &BTreeMap<u64, ExecutionCounters> {
        &self.by_latency
    }

    pub fn mapper(&self) -> &MarketMapper {
        &self.mapper
    }

    /// Market features for the learner, from cached state only.
    pub fn context_for(&mut self, signal: &CopySignal) -> ContextFeatures {
        let price = signal.price.to_f64().unwrap_or(0.0);
        let history = self.price_history.entry(signal.market_id.clone()).or_default();
        history.push_back(price);
        while history.len() > PRICE_HISTORY {
            history.pop_front();
        }
        let volatility = price_volatility(history);

        let mapping = self.mapper.cached(&signal.market_id);
        let book = mapping
            .and_then(|m| m.target_market_id.as_ref())
            .and_then(|id| self.book_cache.get(id))
            .map(|(_, book)| book);

        let (spread_bps, depth) = match book {
            Some(book) => {
                let spread = match (book.spread(signal.side), book.mid(signal.side)) {
                    (Some(s), Some(m)) if m > Decimal::ZERO => (s / m * Decimal::from(10_000)).to_f64().unwrap_or(0.0),
                    _ => 0.0,
                };
                let depth = book.total_depth(signal.side, signal.action).to_f64().unwrap_or(0.0);
                (spread, depth)
            }
            None => (0.0, 0.0),
        };

        let expiry = mapping.and_then(|m| {
            m.target_features
                .as_ref()
                .and_then(|f| f.expiry)
                .or(m.source_features.expiry)
        });
        let time_to_expiry_minutes = expiry
            .map(|e| (e - signal.timestamp).num_seconds() as f64 / 60.0)
            .unwrap_or(0.0)
            .max(0.0);

        let (recent_fill_rate, recent_slippage_bps) = if self.recent.is_empty() {
            (0.0, 0.0)
        } else {
            let n = self.recent.len() as f64;
            let fills = self.recent.iter().filter(|(f, _)| *f).count() as f64;
            let slip: f64 = self.recent.iter().map(|(_, s)| *s).sum();
            (fills / n, slip / n)
        };

        let context = ContextFeatures {
            spread_bps,
            depth,
            volatility,
            time_to_expiry_minutes,
            recent_fill_rate,
            recent_slippage_bps,
        };
        self.last_context = Some((signal.signal_id.clone(), context));
        context
    }

    /// Map the signal's source market, fetching candidates on a cache miss.
    async fn resolve_mapping(&mut self, signal: &CopySignal) -> MappingResult {
        if let Some(hit) = self.mapper.cached(&signal.market_id) {
            return hit.clone();
        }

        let features = self.mapper.source_features(&signal.market_name, signal.timestamp);
        let filter = MarketFilter {
            underlying: features.underlying,
            active_only: self.clock == SimClock::Wall,
            closes_near: features.expiry.or(Some(signal.timestamp)),
            limit: CANDIDATE_LIMIT,
        };
        let candidates = match self.adapter.get_markets(&filter).await {
            Ok(markets) => markets,
            Err(e) => {
                tracing::warn!(error = %e, venue = %self.venue, "Candidate fetch failed, skipping this cycle");
                Vec::new()
            }
        };
        let mapping = self
            .mapper
            .find_best_match(&signal.market_id, &signal.market_name, signal.timestamp, &candidates);
        if let Err(e) = self.repository.save_mapping(&signal.signal_id, &mapping).await {
            tracing::error!(error = %e, "Failed to persist mapping");
        }
        mapping
    }

    async fn fetch_book(&mut self, market_id: &str, signal_ts: DateTime<Utc>) -> Option<Orderbook> {
        let result = match self.clock {
            SimClock::Signal => {
                let latency = ChronoDuration::milliseconds(self.latency_ms as i64);
                self.adapter.get_orderbook_at(market_id, signal_ts + latency).await
            }
            SimClock::Wall => {
                if let Some((fetched, book)) = self.book_cache.get(market_id) {
                    if fetched.elapsed() <= self.book_ttl {
                        return Some(book.clone());
                    }
                }
                self.adapter.get_orderbook(market_id).await
            }
        };

        match result {
            Ok(Some(book)) => {
                self.book_cache
                    .insert(market_id.to_string(), (Instant::now(), book.clone()));
                Some(book)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, market_id, "Orderbook fetch failed");
                None
            }
        }
    }

    fn record(&mut self, signal: &CopySignal, execution: SignalExecution) -> SignalExecution {
        self.counters.record(&execution);
        self.by_latency
            .entry(execution.latency_ms)
            .or_default()
            .record(&execution);
        if matches!(
            execution.disposition,
            Disposition::Filled | Disposition::Partial | Disposition::Missed | Disposition::Rejected
        ) {
            let slippage = execution
                .fill
                .as_ref()
                .filter(|f| f.has_fill())
                .and_then(|f| f.slippage_bps.to_f64())
                .unwrap_or(0.0);
            self.recent.push_back((execution.has_fill(), slippage));
            while self.recent.len() > RECENT_WINDOW {
                self.recent.pop_front();
            }
        }
        match execution.disposition {
            Disposition::Missed | Disposition::Rejected => tracing::warn!(
                venue = %self.venue,
                signal = signal.short_id(),
                reason = execution
                    .fill
                    .as_ref()
                    .and_then(|f| f.reject_reason.as_deref())
                    .unwrap_or("-"),
                "Order not filled"
            ),
            _ => {}
        }
        log_execution(signal, &execution);
        execution
    }
}

/// Standard deviation of successive relative price changes.
fn price_volatility(history: &VecDeque<f64>) -> f64 {
    let changes: Vec<f64> = history
        .iter()
        .zip(history.iter().skip(1))
        .filter(|(a, _)| **a > 0.0)
        .map(|(a, b)| (b - a) / a)
        .collect();
    if changes.len() < 2 {
        return 0.0;
    }
    let n = changes.len() as f64;
    let mean = changes.iter().sum::<f64>() / n;
    let var = changes.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / (n - 1.0);
    var.sqrt()
}

#[async_trait]
impl VenueSimulator for RealisticSimulator {
    fn venue(&self) -> Venue {
        self.venue
    }

    async fn process_signal(&mut self, signal: &CopySignal, params: &ExecutionParams) -> SignalExecution {
        let latency = self.latency_ms;
        let mapping = self.resolve_mapping(signal).await;

        if !mapping.is_mappable(params.min_mapping_confidence) {
            tracing::debug!(
                signal = signal.short_id(),
                confidence = mapping.confidence,
                floor = params.min_mapping_confidence,
                reason = %mapping.reason,
                "Unmapped signal"
            );
            let mut execution = SignalExecution::new(self.venue, &signal.signal_id, Disposition::Unmapped, latency);
            execution.mapping_confidence = Some(mapping.confidence);
            return self.record(signal, execution);
        }
        let Some(target) = mapping.target_market_id.clone() else {
            let execution = SignalExecution::new(self.venue, &signal.signal_id, Disposition::Unmapped, latency);
            return self.record(signal, execution);
        };

        let mut execution = SignalExecution::new(self.venue, &signal.signal_id, Disposition::Missed, latency);
        execution.target_market_id = Some(target.clone());
        execution.mapping_confidence = Some(mapping.confidence);

        let scale = params.qty_scale.min(self.max_qty_scale).max(0.0);
        let mut quantity = (signal.quantity * Decimal::try_from(scale).unwrap_or(Decimal::ZERO)).round_dp(2);
        if signal.action == Action::Sell {
            let held = self.ledger.get(&target).map_or(Decimal::ZERO, |p| p.qty(signal.side));
            quantity = quantity.min(held);
        }
        if quantity <= Decimal::ZERO {
            execution.disposition = Disposition::Skipped;
            return self.record(signal, execution);
        }

        let request = FillRequest {
            side: signal.side,
            action: signal.action,
            quantity,
            limit_price: signal.price,
            reference_price: signal.price,
            latency_ms: latency,
        };
        let oid = order_id(self.venue, &signal.signal_id, latency);
        let now = signal.timestamp;

        let Some(book) = self.fetch_book(&target, signal.timestamp).await else {
            execution.fill = Some(FillResult::missed(oid, &request, "no orderbook", now));
            persist_execution(self.repository.as_ref(), &target, &execution).await;
            return self.record(signal, execution);
        };

        let model = self.fill_model.with_buffer(Decimal::from(params.slippage_buffer_bps));
        let limit = model.effective_limit(signal.action, signal.price);
        let probability = model.estimate_fill_probability(&book, signal.side, signal.action, quantity, limit);
        if let Err(rejection) = check_fill_probability(probability, &self.limits) {
            execution.disposition = Disposition::Rejected;
            execution.fill = Some(FillResult::missed(oid, &request, rejection.to_string(), now));
            persist_execution(self.repository.as_ref(), &target, &execution).await;
            return self.record(signal, execution);
        }

        // The level walk only quotes; nothing is booked until the slippage
        // gate has passed on the quoted VWAP.
        let fill = model.simulate_limit_order(oid.clone(), &book, &request, now);
        if fill.has_fill() {
            if let Err(rejection) = check_slippage(fill.slippage_bps, &self.limits) {
                execution.disposition = Disposition::Rejected;
                execution.fill = Some(FillResult::missed(oid, &request, rejection.to_string(), now));
                persist_execution(self.repository.as_ref(), &target, &execution).await;
                return self.record(signal, execution);
            }
        }
        execution.disposition = fill.status.into();

        if fill.has_fill() {
            let booked = match signal.action {
                Action::Buy => self
                    .ledger
                    .add_fill(&target, signal.side, fill.filled_qty, fill.total_cost, now)
                    .map(|p| p.clone()),
                Action::Sell => {
                    let position = self.ledger.get_or_create(&target, now);
                    position
                        .reduce_position(signal.side, fill.filled_qty, now)
                        .map(|(_, basis)| {
                            position.realize(fill.net_proceeds() - basis);
                            position.clone()
                        })
                }
            };
            match booked {
                Ok(position) => execution.position = Some(position),
                Err(e) => tracing::warn!(error = %e, market_id = %target, "Fill not booked"),
            }
        }
        if fill.has_fill() {
            let context = match self.last_context.take() {
                Some((id, ctx)) if id == signal.signal_id => ctx,
                _ => ContextFeatures::default(),
            };
            self.decisions.insert(target.clone(), (context, *params));
        }
        execution.fill = Some(fill);

        persist_execution(self.repository.as_ref(), &target, &execution).await;
        self.record(signal, execution)
    }

    async fn settle_source_market(
        &mut self,
        source_market_id: &str,
        outcome: OutcomeSide,
        now: DateTime<Utc>,
    ) -> Vec<Settlement> {
        let Some(target) = self
            .mapper
            .cached(source_market_id)
            .and_then(|m| m.target_market_id.clone())
        else {
            return Vec::new();
        };

        match self.ledger.settle(&target, outcome, Decimal::ONE, now) {
            Some(Ok(pnl)) => {
                let Some(position) = self.ledger.get(&target).cloned() else {
                    return Vec::new();
                };
                tracing::info!(
                    venue = %self.venue,
                    market_id = %target,
                    outcome = %outcome,
                    pnl = %pnl,
                    "Position settled"
                );
                vec![Settlement {
                    venue: self.venue,
                    market_id: target.clone(),
                    outcome,
                    pnl,
                    position,
                    decision: self.decisions.get(&target).copied(),
                }]
            }
            Some(Err(e)) => {
                tracing::debug!(error = %e, "Already settled");
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
        self.mapper.clear();
        self.ledger.clear();
        self.book_cache.clear();
        self.counters = ExecutionCounters::default();
        self.by_latency.clear();
        self.recent.clear();
        self.price_history.clear();
        self.decisions.clear();
        self.last_context = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryRepository;
    use crate::models::{BookLevel, MarketSnapshot, SignalMeta};
    use crate::venues::RecordedVenue;
    use chrono::TimeZone;

    const TICKER: &str = "KXBTC15M-26JAN071900-00";

    fn d(v: &str) -> Decimal {
        v.parse().unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 7, 23, 46, 0).unwrap()
    }

    fn market() -> MarketSnapshot {
        MarketSnapshot {
            market_id: TICKER.into(),
            venue: Venue::Kalshi,
            ticker: Some(TICKER.into()),
            title: "BTC price up in next 15 mins?".into(),
            expiry: None,
            strike: None,
            active: true,
            closed: false,
            winner: None,
            yes_price: None,
            volume: None,
        }
    }

    fn book(offset_secs: i64, ask: &str, size: &str) -> Orderbook {
        let mut ob = Orderbook::empty(TICKER, Venue::Kalshi, t0() + ChronoDuration::seconds(offset_secs));
        ob.yes_asks = vec![BookLevel::new(d(ask), d(size))];
        ob.yes_bids = vec![BookLevel::new(d(ask) - d("0.02"), d(size))];
        ob
    }

    fn signal(id: &str, action: Action, qty: &str) -> CopySignal {
        CopySignal {
            signal_id: id.into(),
            timestamp: t0(),
            source: "test".into(),
            market_id: "0xcond".into(),
            market_name: "Bitcoin Up or Down - January 7, 6:45PM-7:00PM ET".into(),
            market_slug: String::new(),
            side: OutcomeSide::Yes,
            action,
            quantity: d(qty),
            price: d("0.50"),
            value: d(qty) * d("0.50"),
            meta: SignalMeta::default(),
        }
    }

    fn params() -> ExecutionParams {
        ExecutionParams {
            min_mapping_confidence: 0.7,
            slippage_buffer_bps: 100,
            qty_scale: 1.0,
        }
    }

    fn simulator(books: Vec<Orderbook>) -> RealisticSimulator {
        let venue = RecordedVenue::from_parts(Venue::Kalshi, vec![market()], books, Vec::new());
        let config = AppConfig {
            max_qty_scale: 1.0,
            fee_bps: Decimal::ZERO,
            ..AppConfig::default()
        };
        RealisticSimulator::new(
            Arc::new(venue),
            Arc::new(MemoryRepository::new()),
            &config,
            SimClock::Signal,
        )
    }

    #[tokio::test]
    async fn test_fills_against_mapped_book() {
        let mut sim = simulator(vec![book(0, "0.50", "100")]);
        let exec = sim.process_signal(&signal("a", Action::Buy, "40"), &params()).await;

        assert_eq!(exec.disposition, Disposition::Filled);
        assert_eq!(exec.target_market_id.as_deref(), Some(TICKER));
        assert_eq!(sim.ledger().get(TICKER).unwrap().yes.qty, d("40"));
        assert_eq!(sim.counters().filled, 1);
        assert_eq!(sim.by_latency().get(&2_000).map(|c| c.filled), Some(1));
    }

    #[tokio::test]
    async fn test_latency_picks_later_book() {
        // The book 10s after the signal has moved beyond the buffered limit.
        let books = vec![book(0, "0.50", "100"), book(10, "0.60", "100")];
        let mut sim = simulator(books);

        sim.set_latency(2_000);
        let fast = sim.process_signal(&signal("a", Action::Buy, "10"), &params()).await;
        assert_eq!(fast.disposition, Disposition::Filled);

        sim.set_latency(10_000);
        let slow = sim.process_signal(&signal("b", Action::Buy, "10"), &params()).await;
        assert_eq!(slow.disposition, Disposition::Missed);
        assert_eq!(sim.by_latency().len(), 2);
    }

    #[tokio::test]
    async fn test_partial_fill_when_depth_is_short() {
        let mut sim = simulator(vec![book(0, "0.50", "25")]);
        let exec = sim.process_signal(&signal("a", Action::Buy, "40"), &params()).await;
        assert_eq!(exec.disposition, Disposition::Partial);
        assert_eq!(exec.fill.unwrap().filled_qty, d("25"));
    }

    #[tokio::test]
    async fn test_unmapped_below_floor() {
        let mut sim = simulator(vec![book(0, "0.50", "100")]);
        let strict = ExecutionParams {
            min_mapping_confidence: 0.99,
            ..params()
        };
        let exec = sim.process_signal(&signal("a", Action::Buy, "10"), &strict).await;
        assert_eq!(exec.disposition, Disposition::Unmapped);
        assert!(exec.fill.is_none());
        assert_eq!(sim.counters().unmapped, 1);
    }

    #[tokio::test]
    async fn test_slippage_gate_rejects_before_booking() {
        // 0.52 against a 0.50 signal is 400 bps, over the 300 bps cap.
        let mut sim = simulator(vec![book(0, "0.52", "100")]);
        let wide = ExecutionParams {
            slippage_buffer_bps: 500,
            ..params()
        };
        let exec = sim.process_signal(&signal("a", Action::Buy, "10"), &wide).await;

        assert_eq!(exec.disposition, Disposition::Rejected);
        assert!(exec.position.is_none());
        assert!(sim.ledger().get(TICKER).is_none());
        let fill = exec.fill.unwrap();
        assert_eq!(fill.filled_qty, Decimal::ZERO);
        assert!(fill.reject_reason.unwrap().contains("slippage"));
        assert_eq!(sim.counters().rejected, 1);
        assert_eq!(sim.counters().volume, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_missing_book_is_a_miss() {
        let mut sim = simulator(Vec::new());
        let exec = sim.process_signal(&signal("a", Action::Buy, "10"), &params()).await;
        assert_eq!(exec.disposition, Disposition::Missed);
        assert_eq!(
            exec.fill.and_then(|f| f.reject_reason).as_deref(),
            Some("no orderbook")
        );
    }

    #[tokio::test]
    async fn test_sell_without_holding_skipped() {
        let mut sim = simulator(vec![book(0, "0.50", "100")]);
        let exec = sim.process_signal(&signal("s", Action::Sell, "10"), &params()).await;
        assert_eq!(exec.disposition, Disposition::Skipped);
    }

    #[tokio::test]
    async fn test_settlement_through_mapping() {
        let mut sim = simulator(vec![book(0, "0.50", "100")]);
        sim.process_signal(&signal("a", Action::Buy, "40"), &params()).await;

        let settled = sim.settle_source_market("0xcond", OutcomeSide::Yes, t0()).await;
        assert_eq!(settled.len(), 1);
        // 40 x $1 - 40 x 0.50
        assert_eq!(settled[0].pnl, d("20"));
        assert_eq!(settled[0].market_id, TICKER);
    }

    #[test]
    fn test_volatility_of_flat_series_is_zero() {
        let flat: VecDeque<f64> = vec![0.5, 0.5, 0.5].into();
        assert_eq!(price_volatility(&flat), 0.0);
        let moving: VecDeque<f64> = vec![0.5, 0.55, 0.5, 0.6].into();
        assert!(price_volatility(&moving) > 0.0);
    }
}
