use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::VecDeque;

use super::{ContextFeatures, ExecutionParams, TradeOutcome};
use crate::config::{AppConfig, ParamBounds};

const DIM: usize = ContextFeatures::DIM;
const ARMS: usize = 3;
const STATS_WINDOW: usize = 100;

#[derive(Debug, Clone)]
pub struct LearnerConfig {
    pub epsilon: f64,
    pub confidence_bounds: ParamBounds,
    pub slippage_bounds: ParamBounds,
    pub scale_bounds: ParamBounds,
    pub max_consecutive_losses: u32,
    pub max_drawdown_pct: f64,
    /// Ridge regularization; A starts as lambda * I.
    pub ridge_lambda: f64,
    pub max_history: usize,
    pub conservative: ExecutionParams,
    pub seed: Option<u64>,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            epsilon: 0.1,
            confidence_bounds: ParamBounds::new(0.5, 0.95),
            slippage_bounds: ParamBounds::new(10.0, 200.0),
            scale_bounds: ParamBounds::new(0.1, 1.0),
            max_consecutive_losses: 5,
            max_drawdown_pct: 0.20,
            ridge_lambda: 1.0,
            max_history: 10_000,
            conservative: ExecutionParams {
                min_mapping_confidence: 0.8,
                slippage_buffer_bps: 75,
                qty_scale: 0.3,
            },
            seed: None,
        }
    }
}

impl LearnerConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        let base = Self {
            epsilon: config.learning_epsilon,
            confidence_bounds: config.confidence_bounds,
            slippage_bounds: config.slippage_bounds,
            scale_bounds: config.scale_bounds,
            max_consecutive_losses: config.max_consecutive_losses,
            max_drawdown_pct: config.max_drawdown_pct,
            seed: config.learner_seed,
            ..Self::default()
        };
        let conservative = base.bounded(
            base.conservative.min_mapping_confidence,
            f64::from(base.conservative.slippage_buffer_bps),
            base.conservative.qty_scale,
        );
        Self { conservative, ..base }
    }

    fn bounded(&self, confidence: f64, slippage_bps: f64, scale: f64) -> ExecutionParams {
        // Whole basis points that still sit inside the bounds.
        let lo = self.slippage_bounds.min.ceil();
        let hi = self.slippage_bounds.max.floor().max(lo);
        let slippage = self.slippage_bounds.clamp(slippage_bps).round().clamp(lo, hi);
        ExecutionParams {
            min_mapping_confidence: self.confidence_bounds.clamp(confidence),
            slippage_buffer_bps: slippage as u32,
            qty_scale: self.scale_bounds.clamp(scale),
        }
    }
}

/// Online ridge regression for one output parameter.
#[derive(Debug, Clone)]
struct RidgeArm {
    a_inv: [[f64; DIM]; DIM],
    b: [f64; DIM],
    weights: [f64; DIM],
}

impl RidgeArm {
    fn new(lambda: f64) -> Self {
        let mut a_inv = [[0.0; DIM]; DIM];
        for (i, row) in a_inv.iter_mut().enumerate() {
            row[i] = 1.0 / lambda;
        }
        Self {
            a_inv,
            b: [0.0; DIM],
            weights: [0.0; DIM],
        }
    }

    fn predict(&self, x: &[f64; DIM]) -> f64 {
        self.weights.iter().zip(x).map(|(w, v)| w * v).sum()
    }

    /// A += x x^T via Sherman-Morrison, b += y x, w = A^-1 b.
    fn update(&mut self, x: &[f64; DIM], y: f64) {
        let mut u = [0.0; DIM];
        for (i, ui) in u.iter_mut().enumerate() {
            *ui = (0..DIM).map(|j| self.a_inv[i][j] * x[j]).sum();
        }
        let denom = 1.0 + x.iter().zip(&u).map(|(a, b)| a * b).sum::<f64>();
        if !denom.is_finite() || denom <= f64::EPSILON {
            return;
        }
        for i in 0..DIM {
            for j in 0..DIM {
                self.a_inv[i][j] -= u[i] * u[j] / denom;
            }
        }
        for (bi, xi) in self.b.iter_mut().zip(x) {
            *bi += y * xi;
        }
        for i in 0..DIM {
            self.weights[i] = (0..DIM).map(|j| self.a_inv[i][j] * self.b[j]).sum();
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LearnerStats {
    pub total_outcomes: usize,
    pub total_pnl: f64,
    pub peak_pnl: f64,
    pub current_drawdown: f64,
    pub consecutive_losses: u32,
    pub circuit_breaker_active: bool,
    pub explorations: u64,
    pub exploitations: u64,
    pub exploration_rate: f64,
    pub recent_pnl: f64,
    pub recent_fill_rate: f64,
}

/// Epsilon-greedy contextual bandit over execution parameters, with a
/// loss-streak / drawdown circuit breaker.
#[derive(Debug)]
pub struct OnlineLearner {
    config: LearnerConfig,
    arms: [RidgeArm; ARMS],
    outcomes: VecDeque<TradeOutcome>,
    total_pnl: f64,
    peak_pnl: f64,
    consecutive_losses: u32,
    circuit_breaker_active: bool,
    explorations: u64,
    exploitations: u64,
    rng: StdRng,
}

impl OnlineLearner {
    pub fn new(config: LearnerConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let lambda = if config.ridge_lambda > 0.0 { config.ridge_lambda } else { 1.0 };
        Self {
            arms: std::array::from_fn(|_| RidgeArm::new(lambda)),
            config,
            outcomes: VecDeque::new(),
            total_pnl: 0.0,
            peak_pnl: 0.0,
            consecutive_losses: 0,
            circuit_breaker_active: false,
            explorations: 0,
            exploitations: 0,
            rng,
        }
    }

    pub fn is_circuit_breaker_active(&self) -> bool {
        self.circuit_breaker_active
    }

    /// Choose parameters for the given context. Always within bounds.
    pub fn get_action(&mut self, context: &ContextFeatures) -> ExecutionParams {
        if self.circuit_breaker_active {
            tracing::debug!("Circuit breaker active, using conservative parameters");
            return self.config.conservative;
        }

        if self.rng.gen::<f64>() < self.config.epsilon {
            self.explorations += 1;
            let c = self.config.confidence_bounds;
            let s = self.config.slippage_bounds;
            let q = self.config.scale_bounds;
            let confidence = self.rng.gen_range(c.min..=c.max);
            let slippage = self.rng.gen_range(s.min..=s.max);
            let scale = self.rng.gen_range(q.min..=q.max);
            return self.config.bounded(confidence, slippage, scale);
        }

        self.exploitations += 1;
        let x = context.to_vector();
        let confidence = self.arms[0].predict(&x);
        let slippage = self.arms[1].predict(&x) * 100.0;
        let scale = self.arms[2].predict(&x);
        self.config.bounded(confidence, slippage, scale)
    }

    /// Feed one outcome back. Updates PnL tracking, the breaker and the model.
    pub fn record_outcome(&mut self, outcome: TradeOutcome) {
        self.total_pnl += outcome.pnl;
        self.peak_pnl = self.peak_pnl.max(self.total_pnl);

        if outcome.pnl < 0.0 {
            self.consecutive_losses += 1;
        } else if outcome.pnl > 0.0 {
            self.consecutive_losses = 0;
        }

        let drawdown = self.current_drawdown();
        let tripped = self.consecutive_losses >= self.config.max_consecutive_losses
            || drawdown >= self.config.max_drawdown_pct;
        if tripped && !self.circuit_breaker_active {
            tracing::warn!(
                consecutive_losses = self.consecutive_losses,
                drawdown_pct = drawdown * 100.0,
                "Circuit breaker tripped, reverting to conservative parameters"
            );
            self.circuit_breaker_active = true;
        }

        let x = outcome.context.to_vector();
        let reward = outcome.reward();
        let targets = [
            outcome.params.min_mapping_confidence,
            f64::from(outcome.params.slippage_buffer_bps) / 100.0,
            outcome.params.qty_scale,
        ];
        if reward.is_finite() {
            for (arm, target) in self.arms.iter_mut().zip(targets) {
                arm.update(&x, reward * target);
            }
        }

        self.outcomes.push_back(outcome);
        while self.outcomes.len() > self.config.max_history {
            self.outcomes.pop_front();
        }
    }

    /// Operator reset. PnL history is kept, so a persisting drawdown trips
    /// the breaker again on the next outcome.
    pub fn reset_circuit_breaker(&mut self) {
        tracing::info!("Circuit breaker reset");
        self.circuit_breaker_active = false;
        self.consecutive_losses = 0;
    }

    pub fn current_drawdown(&self) -> f64 {
        if self.peak_pnl > 0.0 {
            (self.peak_pnl - self.total_pnl) / self.peak_pnl
        } else {
            0.0
        }
    }

    pub fn stats(&self) -> LearnerStats {
        let recent: Vec<&TradeOutcome> = self.outcomes.iter().rev().take(STATS_WINDOW).collect();
        let recent_pnl = recent.iter().map(|o| o.pnl).sum();
        let recent_fill_rate = if recent.is_empty() {
            0.0
        } else {
            recent.iter().filter(|o| o.filled).count() as f64 / recent.len() as f64
        };
        let decisions = self.explorations + self.exploitations;
        LearnerStats {
            total_outcomes: self.outcomes.len(),
            total_pnl: self.total_pnl,
            peak_pnl: self.peak_pnl,
            current_drawdown: self.current_drawdown(),
            consecutive_losses: self.consecutive_losses,
            circuit_breaker_active: self.circuit_breaker_active,
            explorations: self.explorations,
            exploitations: self.exploitations,
            exploration_rate: if decisions > 0 {
                self.explorations as f64 / decisions as f64
            } else {
                0.0
            },
            recent_pnl,
            recent_fill_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn learner(epsilon: f64) -> OnlineLearner {
        OnlineLearner::new(LearnerConfig {
            epsilon,
            seed: Some(7),
            ..LearnerConfig::default()
        })
    }

    fn outcome(pnl: f64, filled: bool, params: ExecutionParams, ctx: ContextFeatures) -> TradeOutcome {
        TradeOutcome {
            timestamp: Utc::now(),
            context: ctx,
            params,
            filled,
            slippage_bps: 15.0,
            pnl,
        }
    }

    fn within_bounds(config: &LearnerConfig, p: &ExecutionParams) -> bool {
        config.confidence_bounds.contains(p.min_mapping_confidence)
            && config.slippage_bounds.contains(f64::from(p.slippage_buffer_bps))
            && config.scale_bounds.contains(p.qty_scale)
    }

    fn context(i: usize) -> ContextFeatures {
        let f = i as f64;
        ContextFeatures {
            spread_bps: (f * 37.0) % 900.0,
            depth: (f * 113.0) % 20_000.0,
            volatility: (f * 0.0007) % 0.2,
            time_to_expiry_minutes: (f * 3.0) % 120.0,
            recent_fill_rate: (f * 0.013) % 1.0,
            recent_slippage_bps: (f * 11.0) % 400.0,
        }
    }

    #[test]
    fn test_actions_within_bounds_exploring_and_exploiting() {
        for epsilon in [0.0, 0.5, 1.0] {
            let mut l = learner(epsilon);
            for i in 0..1000 {
                let ctx = context(i);
                let p = l.get_action(&ctx);
                assert!(within_bounds(&l.config, &p), "out of bounds: {p:?}");
                // Extreme rewards push the model hard in both directions.
                let pnl = if i % 2 == 0 { 500.0 } else { -500.0 };
                l.record_outcome(outcome(pnl, i % 3 == 0, p, ctx));
                l.reset_circuit_breaker();
            }
        }
    }

    #[test]
    fn test_breaker_trips_on_loss_streak() {
        let mut l = learner(0.0);
        let p = l.config.conservative;
        for _ in 0..4 {
            l.record_outcome(outcome(-1.0, true, p, ContextFeatures::default()));
        }
        assert!(!l.is_circuit_breaker_active());
        l.record_outcome(outcome(-1.0, true, p, ContextFeatures::default()));
        assert!(l.is_circuit_breaker_active());

        let action = l.get_action(&ContextFeatures::default());
        assert_eq!(action, l.config.conservative);
    }

    #[test]
    fn test_zero_pnl_keeps_streak() {
        let mut l = learner(0.0);
        let p = l.config.conservative;
        l.record_outcome(outcome(-1.0, true, p, ContextFeatures::default()));
        l.record_outcome(outcome(0.0, true, p, ContextFeatures::default()));
        assert_eq!(l.stats().consecutive_losses, 1);
        l.record_outcome(outcome(2.0, true, p, ContextFeatures::default()));
        assert_eq!(l.stats().consecutive_losses, 0);
    }

    #[test]
    fn test_breaker_trips_on_drawdown() {
        let mut l = learner(0.0);
        let p = l.config.conservative;
        l.record_outcome(outcome(100.0, true, p, ContextFeatures::default()));
        l.record_outcome(outcome(-25.0, true, p, ContextFeatures::default()));
        assert!(l.is_circuit_breaker_active());
        assert!((l.current_drawdown() - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_reset_clears_streak_but_keeps_pnl() {
        let mut l = learner(0.0);
        let p = l.config.conservative;
        for _ in 0..5 {
            l.record_outcome(outcome(-1.0, false, p, ContextFeatures::default()));
        }
        assert!(l.is_circuit_breaker_active());
        l.reset_circuit_breaker();
        let stats = l.stats();
        assert!(!stats.circuit_breaker_active);
        assert_eq!(stats.consecutive_losses, 0);
        assert_eq!(stats.total_pnl, -5.0);
    }

    #[test]
    fn test_stats_count_decisions() {
        let mut l = learner(1.0);
        for i in 0..10 {
            l.get_action(&context(i));
        }
        let stats = l.stats();
        assert_eq!(stats.explorations, 10);
        assert_eq!(stats.exploitations, 0);
        assert_eq!(stats.exploration_rate, 1.0);
    }

    #[test]
    fn test_ridge_arm_learns_linear_target() {
        let mut arm = RidgeArm::new(1.0);
        let x = [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0];
        for _ in 0..200 {
            arm.update(&x, 2.0);
        }
        assert!((arm.predict(&x) - 2.0).abs() < 0.05);
    }

    #[test]
    fn test_from_app_config_clamps_conservative_defaults() {
        let app = AppConfig {
            confidence_bounds: ParamBounds::new(0.9, 0.95),
            ..AppConfig::default()
        };
        let config = LearnerConfig::from_app_config(&app);
        assert_eq!(config.conservative.min_mapping_confidence, 0.9);
        assert_eq!(config.max_drawdown_pct, 0.25);
    }
}
