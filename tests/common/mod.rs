use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;

use polymirror::config::{AppConfig, ExecutionMode};
use polymirror::db::MemoryRepository;
use polymirror::engine::Engine;
use polymirror::ingestion::canonicalizer::signal_id;
use polymirror::models::{Action, BookLevel, CopySignal, MarketSnapshot, Orderbook, OutcomeSide, SignalMeta, Venue};
use polymirror::venues::RecordedVenue;

pub const TICKER: &str = "KXBTC15M-26JAN071900-00";
pub const SOURCE_MARKET: &str = "0xbtc15m-1900";
pub const TITLE: &str = "Bitcoin Up or Down - January 7, 6:45PM-7:00PM ET";

#[allow(dead_code)]
pub fn d(v: &str) -> Decimal {
    v.parse().unwrap()
}

/// 18:46 ET, inside the 6:45PM-7:00PM window.
#[allow(dead_code)]
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 7, 23, 46, 0).unwrap()
}

/// Config with no randomness, no fees and full-size copying.
#[allow(dead_code)]
pub fn test_config() -> AppConfig {
    AppConfig {
        mode: ExecutionMode::Sim,
        learning_enabled: false,
        learner_seed: Some(7),
        fee_bps: Decimal::ZERO,
        max_qty_scale: 1.0,
        slippage_bps_buffer: 100,
        port: 0,
        ..AppConfig::default()
    }
}

#[allow(dead_code)]
pub fn target_market() -> MarketSnapshot {
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

/// One-level book on both sides, `offset_secs` after `t0()`.
#[allow(dead_code)]
pub fn book(offset_secs: i64, yes_ask: &str, no_ask: &str, size: &str) -> Orderbook {
    let mut ob = Orderbook::empty(TICKER, Venue::Kalshi, t0() + Duration::seconds(offset_secs));
    ob.yes_asks = vec![BookLevel::new(d(yes_ask), d(size))];
    ob.no_asks = vec![BookLevel::new(d(no_ask), d(size))];
    ob.yes_bids = vec![BookLevel::new(Decimal::ONE - d(no_ask), d(size))];
    ob.no_bids = vec![BookLevel::new(Decimal::ONE - d(yes_ask), d(size))];
    ob
}

#[allow(dead_code)]
pub fn recorded_target(books: Vec<Orderbook>) -> RecordedVenue {
    RecordedVenue::from_parts(Venue::Kalshi, vec![target_market()], books, Vec::new())
}

#[allow(dead_code)]
pub fn signal(trade_id: &str, offset_secs: i64, side: OutcomeSide, action: Action, qty: &str, price: &str) -> CopySignal {
    CopySignal {
        signal_id: signal_id(trade_id, 0, None),
        timestamp: t0() + Duration::seconds(offset_secs),
        source: "test".into(),
        market_id: SOURCE_MARKET.into(),
        market_name: TITLE.into(),
        market_slug: "btc-updown-15m".into(),
        side,
        action,
        quantity: d(qty),
        price: d(price),
        value: d(qty) * d(price),
        meta: SignalMeta {
            wallet: "0xwallet".into(),
            trade_id: trade_id.into(),
            ..SignalMeta::default()
        },
    }
}

#[allow(dead_code)]
pub async fn build_engine(config: AppConfig, books: Vec<Orderbook>) -> (Arc<Engine>, Arc<MemoryRepository>) {
    let repository = Arc::new(MemoryRepository::new());
    let engine = Engine::new(
        config,
        repository.clone(),
        Arc::new(RecordedVenue::empty(Venue::Polymarket)),
        Arc::new(recorded_target(books)),
    )
    .await
    .expect("engine should start");
    (Arc::new(engine), repository)
}
