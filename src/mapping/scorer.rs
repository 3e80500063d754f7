use serde::{Deserialize, Serialize};

use super::classifier::MarketFeatures;

const WEIGHT_UNDERLYING: f64 = 0.40;
const WEIGHT_TIME: f64 = 0.30;
const WEIGHT_CONTRACT: f64 = 0.20;
const WEIGHT_STRIKE: f64 = 0.10;

/// Score given to a sub-criterion when one side lacks the data.
const UNKNOWN: f64 = 0.5;

/// Per-criterion similarity, each in [0, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub underlying_match: f64,
    pub time_proximity: f64,
    pub contract_type_match: f64,
    pub strike_similarity: f64,
}

impl ScoreBreakdown {
    pub fn weighted_total(&self) -> f64 {
        let total = self.underlying_match * WEIGHT_UNDERLYING
            + self.time_proximity * WEIGHT_TIME
            + self.contract_type_match * WEIGHT_CONTRACT
            + self.strike_similarity * WEIGHT_STRIKE;
        total.clamp(0.0, 1.0)
    }
}

/// Compare a source market against one target candidate.
///
/// Time proximity decays linearly from 1 at identical expiry to 0 at
/// `max_time_diff_minutes`.
pub fn score(source: &MarketFeatures, target: &MarketFeatures, max_time_diff_minutes: f64) -> ScoreBreakdown {
    let underlying_match = match (source.underlying, target.underlying) {
        (Some(a), Some(b)) if a == b => 1.0,
        _ => 0.0,
    };

    let time_proximity = match (source.expiry, target.expiry) {
        (Some(a), Some(b)) if max_time_diff_minutes > 0.0 => {
            let diff_minutes = (a - b).num_milliseconds().abs() as f64 / 60_000.0;
            (1.0 - diff_minutes / max_time_diff_minutes).max(0.0)
        }
        (Some(_), Some(_)) => 0.0,
        _ => UNKNOWN,
    };

    let contract_type_match = match (source.contract_type, target.contract_type) {
        (Some(a), Some(b)) if a == b => 1.0,
        (Some(_), Some(_)) => 0.0,
        _ => UNKNOWN,
    };

    let strike_similarity = match (source.strike, target.strike) {
        (Some(a), Some(b)) if a > 0.0 => (1.0 - (a - b).abs() / a).max(0.0),
        _ => UNKNOWN,
    };

    ScoreBreakdown {
        underlying_match,
        time_proximity,
        contract_type_match,
        strike_similarity,
    }
}
