use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::AppConfig;

/// Pre-fill gates applied to every realistic order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLimits {
    /// Max slippage vs the source price, in basis points (default 300).
    pub max_slippage_bps: Decimal,
    /// Min fraction of the order coverable at the limit (0 disables).
    pub min_fill_probability: Decimal,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            max_slippage_bps: Decimal::from(300),
            min_fill_probability: Decimal::ZERO,
        }
    }
}

impl ExecutionLimits {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_slippage_bps: config.max_slippage_bps,
            min_fill_probability: config.min_fill_probability,
        }
    }
}

/// Risk check rejection. The Display text is the reject reason that gets
/// persisted with the order.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RiskRejection {
    #[error("slippage too high: {actual_bps} bps > max {max_bps} bps")]
    SlippageTooHigh { actual_bps: Decimal, max_bps: Decimal },

    #[error("insufficient depth: fill probability {probability} < min {min}")]
    InsufficientDepth { probability: Decimal, min: Decimal },
}

/// Reject when the walked price is worse than the source price by more than
/// the cap. Favourable slippage always passes.
pub fn check_slippage(slippage_bps: Decimal, limits: &ExecutionLimits) -> Result<(), RiskRejection> {
    if slippage_bps > limits.max_slippage_bps {
        return Err(RiskRejection::SlippageTooHigh {
            actual_bps: slippage_bps.round_dp(1),
            max_bps: limits.max_slippage_bps,
        });
    }
    Ok(())
}

pub fn check_fill_probability(probability: Decimal, limits: &ExecutionLimits) -> Result<(), RiskRejection> {
    if limits.min_fill_probability > Decimal::ZERO && probability < limits.min_fill_probability {
        return Err(RiskRejection::InsufficientDepth {
            probability: probability.round_dp(3),
            min: limits.min_fill_probability,
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
