pub mod learner;

pub use learner::{LearnerConfig, LearnerStats, OnlineLearner};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-signal execution parameters chosen by the learner (or fixed in replay).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExecutionParams {
    pub min_mapping_confidence: f64,
    pub slippage_buffer_bps: u32,
    /// Fraction of the source quantity to copy.
    pub qty_scale: f64,
}

/// Market conditions observed when a signal is processed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextFeatures {
    pub spread_bps: f64,
    pub depth: f64,
    pub volatility: f64,
    pub time_to_expiry_minutes: f64,
    pub recent_fill_rate: f64,
    pub recent_slippage_bps: f64,
}

impl ContextFeatures {
    pub const DIM: usize = 7;

    /// Normalized feature vector with a trailing bias term.
    pub fn to_vector(&self) -> [f64; Self::DIM] {
        let v = [
            self.spread_bps / 100.0,
            (self.depth / 1000.0).min(1.0),
            self.volatility * 100.0,
            self.time_to_expiry_minutes / 60.0,
            self.recent_fill_rate,
            self.recent_slippage_bps / 100.0,
            1.0,
        ];
        v.map(|x| if x.is_finite() { x } else { 0.0 })
    }
}

/// Result of one decision, fed back into the learner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub timestamp: DateTime<Utc>,
    pub context: ContextFeatures,
    pub params: ExecutionParams,
    pub filled: bool,
    pub slippage_bps: f64,
    /// Zero for fill outcomes; realized PnL for settlement outcomes.
    pub pnl: f64,
}

impl TradeOutcome {
    /// pnl / 10, plus 0.1 for a fill, minus 0.001 per bp of slippage.
    pub fn reward(&self) -> f64 {
        let fill_bonus = if self.filled { 0.1 } else { 0.0 };
        self.pnl / 10.0 + fill_bonus - self.slippage_bps / 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_vector_normalization() {
        let ctx = ContextFeatures {
            spread_bps: 200.0,
            depth: 5_000.0,
            volatility: 0.01,
            time_to_expiry_minutes: 30.0,
            recent_fill_rate: 0.8,
            recent_slippage_bps: 50.0,
        };
        assert_eq!(ctx.to_vector(), [2.0, 1.0, 1.0, 0.5, 0.8, 0.5, 1.0]);
    }

    #[test]
    fn test_non_finite_features_zeroed() {
        let ctx = ContextFeatures {
            spread_bps: f64::NAN,
            ..Default::default()
        };
        assert_eq!(ctx.to_vector()[0], 0.0);
    }

    #[test]
    fn test_reward() {
        let outcome = TradeOutcome {
            timestamp: Utc::now(),
            context: ContextFeatures::default(),
            params: ExecutionParams {
                min_mapping_confidence: 0.7,
                slippage_buffer_bps: 50,
                qty_scale: 0.5,
            },
            filled: true,
            slippage_bps: 20.0,
            pnl: 5.0,
        };
        assert!((outcome.reward() - (0.5 + 0.1 - 0.02)).abs() < 1e-12);
    }
}
