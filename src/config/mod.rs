use rust_decimal::Decimal;
use serde::Serialize;
use std::env;
use std::fmt;
use std::str::FromStr;

use crate::mapping::timezone::SourceTimezone;

const DEFAULT_TRACKED_WALLET: &str = "0x6031b6eed1c97e853c6e0f03ad3ce3529351f96d";
const DEFAULT_POLYMARKET_DATA_URL: &str = "https://data-api.polymarket.com";
const DEFAULT_POLYMARKET_GAMMA_URL: &str = "https://gamma-api.polymarket.com";
const DEFAULT_POLYMARKET_CLOB_URL: &str = "https://clob.polymarket.com";
const DEFAULT_KALSHI_URL: &str = "https://api.elections.kalshi.com/trade-api/v2";

/// How far the engine is allowed to reach into the outside world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecutionMode {
    /// Recorded data only, no external calls.
    Sim,
    /// Live reads, simulated writes.
    Shadow,
    /// Live reads and real target-venue orders (explicitly gated).
    Live,
}

impl FromStr for ExecutionMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "SIM" => Ok(ExecutionMode::Sim),
            "SHADOW" => Ok(ExecutionMode::Shadow),
            "LIVE" => Ok(ExecutionMode::Live),
            other => Err(anyhow::anyhow!("unknown execution mode: {other}")),
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Sim => f.write_str("SIM"),
            ExecutionMode::Shadow => f.write_str("SHADOW"),
            ExecutionMode::Live => f.write_str("LIVE"),
        }
    }
}

/// Inclusive safety range for one learned parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ParamBounds {
    pub min: f64,
    pub max: f64,
}

impl ParamBounds {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Clamp into range. Non-finite input falls back to the midpoint.
    pub fn clamp(&self, value: f64) -> f64 {
        if !value.is_finite() {
            return (self.min + self.max) / 2.0;
        }
        value.clamp(self.min, self.max)
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub mode: ExecutionMode,
    pub database_url: Option<String>,
    pub host: String,
    pub port: u16,
    pub api_token: Option<String>,

    // Source feed
    pub tracked_wallet: String,
    pub poll_interval_ms: u64,
    pub polymarket_data_url: String,
    pub polymarket_gamma_url: String,
    pub polymarket_clob_url: String,

    // Mapping
    pub min_mapping_confidence: f64,
    pub max_mapping_time_diff_minutes: f64,
    pub source_timezone: SourceTimezone,

    // Simulation
    pub default_latency_ms: u64,
    pub slippage_bps_buffer: u32,
    pub fee_bps: Decimal,
    pub max_slippage_bps: Decimal,
    pub min_fill_probability: Decimal,
    pub max_qty_scale: f64,
    pub orderbook_ttl_ms: u64,
    pub dedup_capacity: usize,

    // Adapter I/O policy
    pub fetch_timeout_ms: u64,
    pub fetch_retries: u32,
    pub fetch_backoff_ms: u64,

    // Learner
    pub learning_enabled: bool,
    pub learning_epsilon: f64,
    pub learner_seed: Option<u64>,
    pub confidence_bounds: ParamBounds,
    pub slippage_bounds: ParamBounds,
    pub scale_bounds: ParamBounds,
    pub max_consecutive_losses: u32,
    pub max_drawdown_pct: f64,

    // Target venue
    pub kalshi_base_url: String,
    pub kalshi_api_key_id: Option<String>,
    pub kalshi_api_secret: Option<String>,
    pub kalshi_live_enabled: bool,

    pub recorded_market_data: Option<String>,
    pub resolution_interval_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Shadow,
            database_url: None,
            host: "0.0.0.0".into(),
            port: 8080,
            api_token: None,

            tracked_wallet: DEFAULT_TRACKED_WALLET.into(),
            poll_interval_ms: 2_000,
            polymarket_data_url: DEFAULT_POLYMARKET_DATA_URL.into(),
            polymarket_gamma_url: DEFAULT_POLYMARKET_GAMMA_URL.into(),
            polymarket_clob_url: DEFAULT_POLYMARKET_CLOB_URL.into(),

            min_mapping_confidence: 0.7,
            max_mapping_time_diff_minutes: 30.0,
            source_timezone: SourceTimezone::UsEastern,

            default_latency_ms: 2_000,
            slippage_bps_buffer: 50,
            fee_bps: Decimal::from(70),
            max_slippage_bps: Decimal::from(300),
            min_fill_probability: Decimal::ZERO,
            max_qty_scale: 0.5,
            orderbook_ttl_ms: 5_000,
            dedup_capacity: 10_000,

            fetch_timeout_ms: 10_000,
            fetch_retries: 3,
            fetch_backoff_ms: 1_000,

            learning_enabled: true,
            learning_epsilon: 0.1,
            learner_seed: None,
            confidence_bounds: ParamBounds::new(0.5, 0.95),
            slippage_bounds: ParamBounds::new(10.0, 200.0),
            scale_bounds: ParamBounds::new(0.1, 1.0),
            max_consecutive_losses: 5,
            max_drawdown_pct: 0.25,

            kalshi_base_url: DEFAULT_KALSHI_URL.into(),
            kalshi_api_key_id: None,
            kalshi_api_secret: None,
            kalshi_live_enabled: false,

            recorded_market_data: None,
            resolution_interval_secs: 60,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let d = Self::default();

        let source_timezone = match env::var("SOURCE_TIMEZONE") {
            Ok(raw) => SourceTimezone::parse(&raw)
                .ok_or_else(|| anyhow::anyhow!("unsupported SOURCE_TIMEZONE: {raw}"))?,
            Err(_) => d.source_timezone,
        };

        let config = Self {
            mode: env::var("EXECUTION_MODE")
                .ok()
                .map(|m| m.parse())
                .transpose()?
                .unwrap_or(d.mode),
            database_url: env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
            host: env::var("HOST").unwrap_or(d.host),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".into())
                .parse()?,
            api_token: env::var("API_TOKEN").ok().filter(|s| !s.is_empty()),

            tracked_wallet: env::var("TRACKED_WALLET").unwrap_or(d.tracked_wallet),
            poll_interval_ms: env_or("POLL_INTERVAL_MS", d.poll_interval_ms),
            polymarket_data_url: env::var("POLYMARKET_DATA_URL").unwrap_or(d.polymarket_data_url),
            polymarket_gamma_url: env::var("POLYMARKET_GAMMA_URL").unwrap_or(d.polymarket_gamma_url),
            polymarket_clob_url: env::var("POLYMARKET_CLOB_URL").unwrap_or(d.polymarket_clob_url),

            min_mapping_confidence: env_or("MIN_MAPPING_CONFIDENCE", d.min_mapping_confidence),
            max_mapping_time_diff_minutes: env_or(
                "MAX_MAPPING_TIME_DIFF_MINUTES",
                d.max_mapping_time_diff_minutes,
            ),
            source_timezone,

            default_latency_ms: env_or("DEFAULT_LATENCY_MS", d.default_latency_ms),
            slippage_bps_buffer: env_or("SLIPPAGE_BPS_BUFFER", d.slippage_bps_buffer),
            fee_bps: env_or("FEE_BPS", d.fee_bps),
            max_slippage_bps: env_or("MAX_SLIPPAGE_BPS", d.max_slippage_bps),
            min_fill_probability: env_or("MIN_FILL_PROBABILITY", d.min_fill_probability),
            max_qty_scale: env_or("MAX_QTY_SCALE", d.max_qty_scale),
            orderbook_ttl_ms: env_or("ORDERBOOK_TTL_MS", d.orderbook_ttl_ms),
            dedup_capacity: env_or("DEDUP_CAPACITY", d.dedup_capacity),

            fetch_timeout_ms: env_or("FETCH_TIMEOUT_MS", d.fetch_timeout_ms),
            fetch_retries: env_or("FETCH_RETRIES", d.fetch_retries),
            fetch_backoff_ms: env_or("FETCH_BACKOFF_MS", d.fetch_backoff_ms),

            learning_enabled: env_or("LEARNING_ENABLED", d.learning_enabled),
            learning_epsilon: env_or("LEARNING_EPSILON", d.learning_epsilon),
            learner_seed: env::var("LEARNER_SEED").ok().and_then(|s| s.parse().ok()),
            confidence_bounds: ParamBounds::new(
                env_or("LEARNER_CONFIDENCE_MIN", d.confidence_bounds.min),
                env_or("LEARNER_CONFIDENCE_MAX", d.confidence_bounds.max),
            ),
            slippage_bounds: ParamBounds::new(
                env_or("LEARNER_SLIPPAGE_MIN", d.slippage_bounds.min),
                env_or("LEARNER_SLIPPAGE_MAX", d.slippage_bounds.max),
            ),
            scale_bounds: ParamBounds::new(
                env_or("LEARNER_SCALE_MIN", d.scale_bounds.min),
                env_or("LEARNER_SCALE_MAX", d.scale_bounds.max),
            ),
            max_consecutive_losses: env_or("MAX_CONSECUTIVE_LOSSES", d.max_consecutive_losses),
            max_drawdown_pct: env_or("MAX_DRAWDOWN_PCT", d.max_drawdown_pct),

            kalshi_base_url: env::var("KALSHI_BASE_URL").unwrap_or(d.kalshi_base_url),
            kalshi_api_key_id: env::var("KALSHI_API_KEY_ID").ok().filter(|s| !s.is_empty()),
            kalshi_api_secret: env::var("KALSHI_API_SECRET").ok().filter(|s| !s.is_empty()),
            kalshi_live_enabled: env_or("KALSHI_LIVE_ENABLED", d.kalshi_live_enabled),

            recorded_market_data: env::var("RECORDED_MARKET_DATA").ok().filter(|s| !s.is_empty()),
            resolution_interval_secs: env_or("RESOLUTION_INTERVAL_SECS", d.resolution_interval_secs),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject bound pairs that cannot hold a value.
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, b) in [
            ("confidence", self.confidence_bounds),
            ("slippage", self.slippage_bounds),
            ("scale", self.scale_bounds),
        ] {
            if !(b.min.is_finite() && b.max.is_finite()) || b.min > b.max {
                anyhow::bail!("invalid learner {name} bounds: [{}, {}]", b.min, b.max);
            }
        }
        // The slippage buffer is applied in whole basis points.
        let slippage = self.slippage_bounds;
        if slippage.min < 0.0 || slippage.min.ceil() > slippage.max.floor() {
            anyhow::bail!(
                "learner slippage bounds [{}, {}] contain no whole basis point",
                slippage.min,
                slippage.max
            );
        }
        if !(0.0..=1.0).contains(&self.learning_epsilon) {
            anyhow::bail!("LEARNING_EPSILON must be within [0, 1]");
        }
        Ok(())
    }

    /// Returns true if both Kalshi API credentials are configured.
    pub fn has_kalshi_auth(&self) -> bool {
        self.kalshi_api_key_id.is_some() && self.kalshi_api_secret.is_some()
    }

    /// Stable fingerprint recorded on each run row.
    pub fn fingerprint(&self) -> String {
        use sha2::{Digest, Sha256};

        let material = format!(
            "{}|{}|{}|{}|{}|{}|{}|{}|{}|{}",
            self.mode,
            self.tracked_wallet,
            self.min_mapping_confidence,
            self.max_mapping_time_diff_minutes,
            self.source_timezone,
            self.default_latency_ms,
            self.slippage_bps_buffer,
            self.fee_bps,
            self.max_slippage_bps,
            self.max_qty_scale,
        );
        let digest = format!("{:x}", Sha256::digest(material.as_bytes()));
        digest[..16].to_string()
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parse() {
        assert_eq!("sim".parse::<ExecutionMode>().unwrap(), ExecutionMode::Sim);
        assert_eq!("LIVE".parse::<ExecutionMode>().unwrap(), ExecutionMode::Live);
        assert!("paper".parse::<ExecutionMode>().is_err());
    }

    #[test]
    fn test_bounds_clamp_handles_nan() {
        let b = ParamBounds::new(10.0, 200.0);
        assert_eq!(b.clamp(500.0), 200.0);
        assert_eq!(b.clamp(-3.0), 10.0);
        assert_eq!(b.clamp(f64::NAN), 105.0);
        assert!(b.contains(b.clamp(f64::INFINITY)));
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert!(!config.has_kalshi_auth());
        assert_eq!(config.fingerprint().len(), 16);
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        let config = AppConfig {
            scale_bounds: ParamBounds::new(1.0, 0.1),
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_slippage_bounds_need_a_whole_bps() {
        let narrow = AppConfig {
            slippage_bounds: ParamBounds::new(10.5, 10.7),
            ..AppConfig::default()
        };
        assert!(narrow.validate().is_err());

        let single = AppConfig {
            slippage_bounds: ParamBounds::new(10.5, 11.0),
            ..AppConfig::default()
        };
        assert!(single.validate().is_ok());
    }
}
