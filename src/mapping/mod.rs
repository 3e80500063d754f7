pub mod classifier;
pub mod scorer;
pub mod timezone;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::MarketSnapshot;

use classifier::{extract_source_features, extract_target_features, MarketFeatures};
use scorer::ScoreBreakdown;
use timezone::SourceTimezone;

/// Outcome of mapping one source market onto the target venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingResult {
    pub source_market_id: String,
    pub target_market_id: Option<String>,
    pub target_ticker: Option<String>,
    /// Weighted score in [0, 1].
    pub confidence: f64,
    pub reason: String,
    pub breakdown: ScoreBreakdown,
    pub source_features: MarketFeatures,
    pub target_features: Option<MarketFeatures>,
    pub created_at: DateTime<Utc>,
}

impl MappingResult {
    /// Usable for simulation at the given confidence floor.
    pub fn is_mappable(&self, min_confidence: f64) -> bool {
        self.target_market_id.is_some() && self.confidence >= min_confidence
    }

    fn unmatched(source_market_id: &str, features: MarketFeatures, reason: String) -> Self {
        Self {
            source_market_id: source_market_id.to_string(),
            target_market_id: None,
            target_ticker: None,
            confidence: 0.0,
            reason,
            breakdown: ScoreBreakdown::default(),
            source_features: features,
            target_features: None,
            created_at: Utc::now(),
        }
    }
}

/// Maps source markets to the best target candidate and caches the answer
/// per source market id.
#[derive(Debug)]
pub struct MarketMapper {
    tz: SourceTimezone,
    max_time_diff_minutes: f64,
    cache: HashMap<String, MappingResult>,
}

impl MarketMapper {
    pub fn new(tz: SourceTimezone, max_time_diff_minutes: f64) -> Self {
        Self {
            tz,
            max_time_diff_minutes,
            cache: HashMap::new(),
        }
    }

    /// Source features used to narrow the candidate fetch.
    pub fn source_features(&self, title: &str, reference: DateTime<Utc>) -> MarketFeatures {
        extract_source_features(title, reference, self.tz)
    }

    pub fn cached(&self, source_market_id: &str) -> Option<&MappingResult> {
        self.cache.get(source_market_id)
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Score every candidate and keep the strictly highest. Ties go to the
    /// candidate seen first. The result is cached even when nothing matched,
    /// unless the candidate list was empty (nothing to remember yet).
    pub fn find_best_match(
        &mut self,
        source_market_id: &str,
        title: &str,
        reference: DateTime<Utc>,
        candidates: &[MarketSnapshot],
    ) -> MappingResult {
        if let Some(hit) = self.cache.get(source_market_id) {
            return hit.clone();
        }

        let source = extract_source_features(title, reference, self.tz);
        if candidates.is_empty() {
            return MappingResult::unmatched(source_market_id, source, "no target candidates".into());
        }

        let mut best: Option<(&MarketSnapshot, MarketFeatures, ScoreBreakdown, f64)> = None;
        for candidate in candidates {
            let target = extract_target_features(candidate);
            let breakdown = scorer::score(&source, &target, self.max_time_diff_minutes);
            let total = breakdown.weighted_total();
            let better = match &best {
                Some((_, _, _, best_total)) => total > *best_total,
                None => total > 0.0,
            };
            if better {
                best = Some((candidate, target, breakdown, total));
            }
        }

        let result = match best {
            Some((market, target, breakdown, confidence)) => {
                let reason = format!(
                    "matched {} {} market (underlying={:.2} time={:.2} type={:.2} strike={:.2})",
                    source.underlying.map(|u| u.as_str()).unwrap_or("unknown"),
                    source
                        .window_minutes
                        .map(|w| format!("{w}m"))
                        .unwrap_or_else(|| "n/a".into()),
                    breakdown.underlying_match,
                    breakdown.time_proximity,
                    breakdown.contract_type_match,
                    breakdown.strike_similarity,
                );
                MappingResult {
                    source_market_id: source_market_id.to_string(),
                    target_market_id: Some(market.market_id.clone()),
                    target_ticker: market.ticker.clone().or_else(|| Some(market.market_id.clone())),
                    confidence,
                    reason,
                    breakdown,
                    source_features: source,
                    target_features: Some(target),
                    created_at: Utc::now(),
                }
            }
            None => MappingResult::unmatched(source_market_id, source, "no candidate scored above zero".into()),
        };

        tracing::debug!(
            source_market_id,
            target = ?result.target_market_id,
            confidence = result.confidence,
            "Mapping computed"
        );
        self.cache.insert(source_market_id.to_string(), result.clone());
        result
    }

    /// Source market ids that currently map to `target_market_id`.
    pub fn sources_for_target(&self, target_market_id: &str) -> Vec<String> {
        self.cache
            .values()
            .filter(|m| m.target_market_id.as_deref() == Some(target_market_id))
            .map(|m| m.source_market_id.clone())
            .collect()
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Venue;
    use chrono::TimeZone;
    use rust_decimal::Decimal;

    const TITLE: &str = "Bitcoin Up or Down - January 7, 6:45PM-7:00PM ET";

    fn reference() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 7, 23, 46, 0).unwrap()
    }

    fn kalshi(ticker: &str, strike: Option<i64>) -> MarketSnapshot {
        MarketSnapshot {
            market_id: ticker.into(),
            venue: Venue::Kalshi,
            ticker: Some(ticker.into()),
            title: String::new(),
            expiry: None,
            strike: strike.map(Decimal::from),
            active: true,
            closed: false,
            winner: None,
            yes_price: None,
            volume: None,
        }
    }

    #[test]
    fn test_picks_closest_expiry() {
        let mut mapper = MarketMapper::new(SourceTimezone::UsEastern, 30.0);
        let candidates = vec![
            kalshi("KXBTC15M-26JAN071845-45", None),
            kalshi("KXBTC15M-26JAN071900-00", None),
            kalshi("KXETH15M-26JAN071900-00", None),
        ];
        let result = mapper.find_best_match("0xcond", TITLE, reference(), &candidates);
        assert_eq!(result.target_market_id.as_deref(), Some("KXBTC15M-26JAN071900-00"));
        assert!(result.is_mappable(0.7));
        assert!((0.0..=1.0).contains(&result.confidence));
    }

    #[test]
    fn test_first_seen_wins_ties() {
        let mut mapper = MarketMapper::new(SourceTimezone::UsEastern, 30.0);
        let candidates = vec![
            kalshi("KXBTC15M-26JAN071900-00", None),
            kalshi("KXBTC15M-26JAN071900-01", None),
        ];
        let result = mapper.find_best_match("0xcond", TITLE, reference(), &candidates);
        assert_eq!(result.target_market_id.as_deref(), Some("KXBTC15M-26JAN071900-00"));
    }

    #[test]
    fn test_result_is_cached() {
        let mut mapper = MarketMapper::new(SourceTimezone::UsEastern, 30.0);
        let first = mapper.find_best_match(
            "0xcond",
            TITLE,
            reference(),
            &[kalshi("KXBTC15M-26JAN071900-00", None)],
        );
        // Second call ignores the (empty) candidate list.
        let second = mapper.find_best_match("0xcond", TITLE, reference(), &[]);
        assert_eq!(first, second);
        assert_eq!(mapper.cache_len(), 1);
        assert_eq!(mapper.sources_for_target("KXBTC15M-26JAN071900-00"), vec!["0xcond".to_string()]);
    }

    #[test]
    fn test_empty_candidates_not_cached() {
        let mut mapper = MarketMapper::new(SourceTimezone::UsEastern, 30.0);
        let result = mapper.find_best_match("0xcond", TITLE, reference(), &[]);
        assert!(!result.is_mappable(0.0));
        assert_eq!(mapper.cache_len(), 0);
    }

    #[test]
    fn test_below_floor_not_mappable() {
        let mut mapper = MarketMapper::new(SourceTimezone::UsEastern, 30.0);
        let result = mapper.find_best_match(
            "0xcond",
            TITLE,
            reference(),
            &[kalshi("KXETH15M-26JAN071900-00", None)],
        );
        assert!(result.target_market_id.is_some());
        assert!(!result.is_mappable(0.7));
    }
}
