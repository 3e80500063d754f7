pub mod replay;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Mutex, Notify};

use crate::config::{AppConfig, ExecutionMode};
use crate::db::Repository;
use crate::execution::live::LiveExecutor;
use crate::ingestion::{Deduplicator, TradePoller};
use crate::learning::{ExecutionParams, LearnerConfig, LearnerStats, OnlineLearner, TradeOutcome};
use crate::models::{CopySignal, OutcomeSide, Venue};
use crate::simulation::ledger::LedgerSummary;
use crate::simulation::realistic::SimClock;
use crate::simulation::{
    Disposition, ExactCopySimulator, ExecutionCounters, RealisticSimulator, Settlement, SignalExecution,
    VenueSimulator,
};
use crate::venues::VenueAdapter;

const MAX_BACKOFF_SHIFT: u32 = 5;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("live execution refused: {0}")]
    LiveRefused(String),

    #[error("{operation} is not available in {mode} mode")]
    ModeMismatch { operation: &'static str, mode: ExecutionMode },

    #[error("learning is disabled")]
    LearningDisabled,

    #[error("repository error: {0}")]
    Repository(#[from] anyhow::Error),
}

/// Parameters used when the learner is off (and always in replay).
pub fn fixed_params(config: &AppConfig) -> ExecutionParams {
    ExecutionParams {
        min_mapping_confidence: config.min_mapping_confidence,
        slippage_buffer_bps: config.slippage_bps_buffer,
        qty_scale: config.max_qty_scale,
    }
}

/// What one accepted signal produced on both venues.
#[derive(Debug, Clone, Serialize)]
pub struct SignalReport {
    pub signal_id: String,
    pub params: ExecutionParams,
    pub exact: SignalExecution,
    pub realistic: SignalExecution,
    pub live_order_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VenueStatus {
    pub venue: Venue,
    pub counters: ExecutionCounters,
    pub fill_rate: f64,
    pub partial_rate: f64,
    pub miss_rate: f64,
    pub mapping_rate: f64,
    pub avg_slippage_bps: Decimal,
    pub ledger: LedgerSummary,
}

impl VenueStatus {
    fn of(simulator: &dyn VenueSimulator) -> Self {
        let counters = simulator.counters().clone();
        Self {
            venue: simulator.venue(),
            fill_rate: counters.fill_rate(),
            partial_rate: counters.partial_rate(),
            miss_rate: counters.miss_rate(),
            mapping_rate: counters.mapping_rate(),
            avg_slippage_bps: counters.avg_slippage_bps(),
            ledger: simulator.ledger().summary(),
            counters,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub mode: ExecutionMode,
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub stopped: bool,
    pub live_armed: bool,
    pub latency_ms: u64,
    pub mapping_cache_size: usize,
    pub venues: Vec<VenueStatus>,
    pub learner: Option<LearnerStats>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct HealthReport {
    pub repository: bool,
    pub source: bool,
    pub target: bool,
}

impl HealthReport {
    pub fn healthy(&self) -> bool {
        self.repository && self.source && self.target
    }
}

/// Simulator state as last published by a writer.
#[derive(Debug, Clone)]
struct SimSnapshot {
    venues: Vec<VenueStatus>,
    latency_ms: u64,
    mapping_cache_size: usize,
}

impl SimSnapshot {
    fn of(exact: &ExactCopySimulator, realistic: &RealisticSimulator) -> Self {
        Self {
            venues: vec![VenueStatus::of(exact), VenueStatus::of(realistic)],
            latency_ms: realistic.latency_ms(),
            mapping_cache_size: realistic.mapper().cache_len(),
        }
    }
}

/// Owns both simulators, the learner and the optional live path, and drives
/// signals through them.
///
/// The simulator locks are held for a whole signal, including target-venue
/// fetches and their retries. Status readers never take them; they read the
/// snapshot published when a signal or settlement finishes.
pub struct Engine {
    config: AppConfig,
    repository: Arc<dyn Repository>,
    source: Arc<dyn VenueAdapter>,
    target: Arc<dyn VenueAdapter>,
    dedup: Deduplicator,
    exact: Mutex<ExactCopySimulator>,
    realistic: Mutex<RealisticSimulator>,
    learner: Option<Mutex<OnlineLearner>>,
    live: Option<LiveExecutor>,
    snapshot: RwLock<SimSnapshot>,
    run_id: String,
    started_at: DateTime<Utc>,
    stop: AtomicBool,
    finished: AtomicBool,
    wake: Notify,
}

impl Engine {
    /// Build the engine, open a run record and warm the deduplicator.
    ///
    /// In LIVE mode the target adapter must accept orders and the explicit
    /// live flag must be set; otherwise construction fails.
    pub async fn new(
        config: AppConfig,
        repository: Arc<dyn Repository>,
        source: Arc<dyn VenueAdapter>,
        target: Arc<dyn VenueAdapter>,
    ) -> Result<Self, EngineError> {
        let live = if config.mode == ExecutionMode::Live {
            if !config.kalshi_live_enabled {
                tracing::error!("LIVE mode requested without KALSHI_LIVE_ENABLED, refusing to start");
                return Err(EngineError::LiveRefused("KALSHI_LIVE_ENABLED is not set".into()));
            }
            if !target.orders_enabled() {
                tracing::error!(venue = %target.venue(), "LIVE mode requested but the target adapter refuses orders");
                return Err(EngineError::LiveRefused(format!(
                    "{} adapter has no order credentials",
                    target.venue()
                )));
            }
            Some(LiveExecutor::new(target.clone(), true))
        } else {
            None
        };

        let clock = match config.mode {
            ExecutionMode::Sim => SimClock::Signal,
            ExecutionMode::Shadow | ExecutionMode::Live => SimClock::Wall,
        };
        let exact = ExactCopySimulator::new(repository.clone(), config.max_qty_scale);
        let realistic = RealisticSimulator::new(target.clone(), repository.clone(), &config, clock);
        let learner = config
            .learning_enabled
            .then(|| Mutex::new(OnlineLearner::new(LearnerConfig::from_app_config(&config))));

        let snapshot = SimSnapshot::of(&exact, &realistic);
        let dedup = Deduplicator::new(repository.clone(), config.dedup_capacity);
        if let Err(e) = dedup.load_recent().await {
            tracing::warn!(error = %e, "Could not warm deduplicator, starting empty");
        }

        let run_id = repository
            .create_run(&config.mode.to_string(), &config.fingerprint())
            .await?;
        tracing::info!(
            run_id = %run_id,
            mode = %config.mode,
            source = %source.venue(),
            target = %target.venue(),
            learning = config.learning_enabled,
            "Engine started"
        );

        Ok(Self {
            config,
            repository,
            source,
            target,
            dedup,
            exact: Mutex::new(exact),
            realistic: Mutex::new(realistic),
            learner,
            live,
            snapshot: RwLock::new(snapshot),
            run_id,
            started_at: Utc::now(),
            stop: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            wake: Notify::new(),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Ask the loops to exit after their current iteration.
    pub fn stop(&self) {
        if !self.stop.swap(true, Ordering::Relaxed) {
            tracing::warn!("Engine stop requested");
        }
        self.wake.notify_waiters();
    }

    /// Run one signal through dedup, both simulators, the learner and (in
    /// LIVE) the real order path. Returns `None` for a duplicate.
    ///
    /// A signal that cannot be stored is released and returned as an error
    /// so the cursor never passes it.
    pub async fn process_signal(&self, signal: &CopySignal) -> Result<Option<SignalReport>, EngineError> {
        let started = Instant::now();
        crate::metrics::signal_ingested();

        if !self.dedup.claim(&signal.signal_id).await {
            tracing::debug!(signal = signal.short_id(), "Duplicate signal skipped");
            crate::metrics::signal_duplicate();
            return Ok(None);
        }

        match self.repository.save_signal(signal, Some(&self.run_id)).await {
            Ok(true) => {}
            Ok(false) => tracing::debug!(signal = signal.short_id(), "Signal already stored"),
            Err(e) => {
                tracing::error!(error = %e, signal = signal.short_id(), "Failed to persist signal");
                self.dedup.release(&signal.signal_id).await;
                return Err(EngineError::Repository(e));
            }
        }

        let context = self.realistic.lock().await.context_for(signal);
        let params = match &self.learner {
            Some(learner) => learner.lock().await.get_action(&context),
            None => fixed_params(&self.config),
        };

        let (exact, realistic) = {
            let mut exact_sim = self.exact.lock().await;
            let mut realistic_sim = self.realistic.lock().await;
            let pair = tokio::join!(
                exact_sim.process_signal(signal, &params),
                realistic_sim.process_signal(signal, &params)
            );
            let sims: [&dyn VenueSimulator; 2] = [&*exact_sim, &*realistic_sim];
            for sim in sims {
                crate::metrics::set_rates(sim.venue(), sim.counters());
                crate::metrics::set_ledger(sim.venue(), &sim.ledger().summary());
            }
            self.publish(SimSnapshot::of(&exact_sim, &realistic_sim));
            pair
        };
        crate::metrics::record_execution(&exact);
        crate::metrics::record_execution(&realistic);

        if let Some(learner) = &self.learner {
            if realistic.disposition != Disposition::Skipped {
                let slippage_bps = realistic
                    .fill
                    .as_ref()
                    .filter(|f| f.has_fill())
                    .and_then(|f| f.slippage_bps.to_f64())
                    .unwrap_or(0.0);
                let mut learner = learner.lock().await;
                learner.record_outcome(TradeOutcome {
                    timestamp: signal.timestamp,
                    context,
                    params,
                    filled: realistic.has_fill(),
                    slippage_bps,
                    pnl: 0.0,
                });
                crate::metrics::set_circuit_breaker(learner.is_circuit_breaker_active());
            }
        }

        let live_order_id = self.mirror_live(signal, &realistic).await;

        if let Err(e) = self.dedup.mark_processed(signal).await {
            tracing::error!(error = %e, signal = signal.short_id(), "Failed to mark signal processed");
        }
        crate::metrics::signal_latency(started.elapsed().as_secs_f64() * 1_000.0);

        Ok(Some(SignalReport {
            signal_id: signal.signal_id.clone(),
            params,
            exact,
            realistic,
            live_order_id,
        }))
    }

    /// Send the realistic fill to the target venue for real.
    async fn mirror_live(&self, signal: &CopySignal, realistic: &SignalExecution) -> Option<String> {
        let executor = self.live.as_ref()?;
        let fill = realistic.fill.as_ref().filter(|f| f.has_fill())?;
        let ticker = realistic.target_market_id.as_deref()?;
        match executor
            .execute(ticker, signal.side, signal.action, fill.filled_qty, fill.limit_price, &fill.order_id)
            .await
        {
            Ok(ack) => {
                tracing::info!(ticker, order_id = %ack.order_id, status = %ack.status, "Live order accepted");
                Some(ack.order_id)
            }
            Err(e) => {
                tracing::error!(error = %e, ticker, signal = signal.short_id(), "Live order failed");
                None
            }
        }
    }

    /// Process a fixed signal set in timestamp order (SIM mode).
    pub async fn run_sim(&self, mut signals: Vec<CopySignal>) -> Result<usize, EngineError> {
        if self.config.mode != ExecutionMode::Sim {
            return Err(EngineError::ModeMismatch {
                operation: "run_sim",
                mode: self.config.mode,
            });
        }
        signals.sort_by(|a, b| (a.timestamp, &a.signal_id).cmp(&(b.timestamp, &b.signal_id)));

        let mut processed = 0;
        for signal in &signals {
            if self.is_stopped() {
                break;
            }
            if self.process_signal(signal).await?.is_some() {
                processed += 1;
            }
        }
        tracing::info!(total = signals.len(), processed, "SIM run finished");
        Ok(processed)
    }

    /// Steady-state loop: poll the feed, process accepted signals, sleep.
    /// Errors back off exponentially and never end the loop.
    pub async fn run_shadow(&self) -> Result<(), EngineError> {
        if self.config.mode == ExecutionMode::Sim {
            return Err(EngineError::ModeMismatch {
                operation: "run_shadow",
                mode: self.config.mode,
            });
        }
        let interval = Duration::from_millis(self.config.poll_interval_ms.max(1));
        let poller = TradePoller::new(self.source.clone(), self.repository.clone(), &self.config.tracked_wallet);
        let mut failures: u32 = 0;

        tracing::info!(
            wallet = %self.config.tracked_wallet,
            interval_ms = self.config.poll_interval_ms,
            "Feed loop started"
        );

        while !self.is_stopped() {
            let healthy = match poller.poll().await {
                Ok(signals) => {
                    let mut ok = true;
                    for signal in &signals {
                        if self.is_stopped() {
                            break;
                        }
                        if let Err(e) = self.process_signal(signal).await {
                            tracing::warn!(error = %e, "Signal processing failed, backing off");
                            ok = false;
                            break;
                        }
                    }
                    ok
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Feed poll failed, backing off");
                    crate::metrics::feed_error();
                    false
                }
            };

            failures = if healthy { 0 } else { failures.saturating_add(1) };
            let delay = interval * (1u32 << failures.min(MAX_BACKOFF_SHIFT));
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.wake.notified() => {}
            }
        }

        tracing::info!("Feed loop stopped");
        Ok(())
    }

    /// Source markets the exact-copy ledger still holds open.
    pub async fn open_source_markets(&self) -> Vec<String> {
        self.exact.lock().await.ledger().open_market_ids()
    }

    /// Settle a resolved source market on both venues, persist outcomes and
    /// feed realized PnL of the realistic position back to the learner.
    pub async fn settle_market(
        &self,
        source_market_id: &str,
        outcome: OutcomeSide,
    ) -> Result<Vec<Settlement>, EngineError> {
        let now = Utc::now();
        let mut settled = self
            .exact
            .lock()
            .await
            .settle_source_market(source_market_id, outcome, now)
            .await;
        settled.extend(
            self.realistic
                .lock()
                .await
                .settle_source_market(source_market_id, outcome, now)
                .await,
        );

        for settlement in &settled {
            if let Err(e) = self
                .repository
                .save_outcome(settlement.venue, &settlement.market_id, outcome, Decimal::ONE)
                .await
            {
                tracing::error!(error = %e, market_id = %settlement.market_id, "Failed to persist outcome");
            }
            if let Err(e) = self.repository.update_position(&settlement.position).await {
                tracing::error!(error = %e, market_id = %settlement.market_id, "Failed to persist settled position");
            }

            if let (Some(learner), Some((context, params))) = (&self.learner, settlement.decision) {
                let mut learner = learner.lock().await;
                learner.record_outcome(TradeOutcome {
                    timestamp: now,
                    context,
                    params,
                    filled: true,
                    slippage_bps: 0.0,
                    pnl: settlement.pnl.to_f64().unwrap_or(0.0),
                });
                crate::metrics::set_circuit_breaker(learner.is_circuit_breaker_active());
            }
        }

        {
            let exact = self.exact.lock().await;
            let realistic = self.realistic.lock().await;
            crate::metrics::set_ledger(exact.venue(), &exact.ledger().summary());
            crate::metrics::set_ledger(realistic.venue(), &realistic.ledger().summary());
            self.publish(SimSnapshot::of(&exact, &realistic));
        }
        Ok(settled)
    }

    fn publish(&self, snapshot: SimSnapshot) {
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = snapshot;
    }

    pub async fn status(&self) -> EngineStatus {
        let SimSnapshot {
            venues,
            latency_ms,
            mapping_cache_size,
        } = self.snapshot.read().unwrap_or_else(PoisonError::into_inner).clone();
        let learner = match &self.learner {
            Some(l) => Some(l.lock().await.stats()),
            None => None,
        };
        EngineStatus {
            mode: self.config.mode,
            run_id: self.run_id.clone(),
            started_at: self.started_at,
            stopped: self.is_stopped(),
            live_armed: self.live.as_ref().is_some_and(|l| l.is_armed()),
            latency_ms,
            mapping_cache_size,
            venues,
            learner,
        }
    }

    pub async fn health(&self) -> HealthReport {
        let (repository, source, target) =
            tokio::join!(self.repository.ping(), self.source.health_check(), self.target.health_check());
        HealthReport {
            repository,
            source,
            target,
        }
    }

    /// Operator reset of the learner's circuit breaker.
    pub async fn reset_breaker(&self) -> Result<LearnerStats, EngineError> {
        let learner = self.learner.as_ref().ok_or(EngineError::LearningDisabled)?;
        let mut learner = learner.lock().await;
        learner.reset_circuit_breaker();
        crate::metrics::set_circuit_breaker(learner.is_circuit_breaker_active());
        Ok(learner.stats())
    }

    /// Stop the loops, write every position and close the run record with a
    /// status summary. Only the first call does any work.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        self.stop();
        if self.finished.swap(true, Ordering::Relaxed) {
            return Ok(());
        }

        let positions: Vec<_> = {
            let exact = self.exact.lock().await;
            let realistic = self.realistic.lock().await;
            exact
                .ledger()
                .positions()
                .chain(realistic.ledger().positions())
                .cloned()
                .collect()
        };
        for position in &positions {
            if let Err(e) = self.repository.update_position(position).await {
                tracing::error!(error = %e, market_id = %position.market_id, "Failed to persist position on shutdown");
            }
        }

        let status = self.status().await;
        let summary = serde_json::to_value(&status).map_err(anyhow::Error::from)?;
        self.repository
            .complete_run(&self.run_id, "completed", summary)
            .await?;
        tracing::info!(run_id = %self.run_id, positions = positions.len(), "Engine shut down");
        Ok(())
    }
}
