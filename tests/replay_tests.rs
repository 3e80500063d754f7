mod common;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, NaiveDate};

use polymirror::engine::replay::{run_replay, ReplayReport, CSV_HEADER};
use polymirror::models::{Action, CopySignal, MarketSnapshot, Orderbook, OutcomeSide, Venue};
use polymirror::venues::{RecordedVenue, VenueAdapter};

use common::{book, recorded_target, signal, target_market, test_config, SOURCE_MARKET};

const LATENCIES: [u64; 3] = [2000, 5000, 10000];

fn signals() -> Vec<CopySignal> {
    ["r3", "r1", "r2"]
        .iter()
        .map(|id| signal(id, 0, OutcomeSide::Yes, Action::Buy, "10", "0.50"))
        .collect()
}

/// The ask walks away from the copied price as time passes.
fn books() -> Vec<Orderbook> {
    vec![
        book(0, "0.50", "0.52", "500"),
        book(4, "0.52", "0.50", "500"),
        book(10, "0.60", "0.42", "500"),
    ]
}

async fn replay(outcomes: &HashMap<String, OutcomeSide>) -> ReplayReport {
    let target: Arc<dyn VenueAdapter> = Arc::new(recorded_target(books()));
    run_replay(&test_config(), &signals(), &LATENCIES, target, outcomes).await
}

#[tokio::test]
async fn test_replay_is_deterministic() {
    let first = replay(&HashMap::new()).await.to_csv().unwrap();
    let second = replay(&HashMap::new()).await.to_csv().unwrap();
    assert_eq!(first, second);

    let lines: Vec<&str> = first.lines().collect();
    assert_eq!(lines[0], CSV_HEADER.join(","));
    // Two venues per latency.
    assert_eq!(lines.len(), 1 + 2 * LATENCIES.len());
}

#[tokio::test]
async fn test_fill_rate_drops_with_latency() {
    let report = replay(&HashMap::new()).await;

    let rates: Vec<(u64, f64)> = report
        .sensitivity
        .iter()
        .map(|row| (row.latency_ms, row.fill_rate))
        .collect();
    assert_eq!(rates, vec![(2000, 1.0), (5000, 0.0), (10000, 0.0)]);
    assert!(report.sensitivity.iter().all(|row| row.attempts == 3));
    assert!(report.sensitivity.iter().all(|row| row.unmapped == 0));

    // The exact copy ignores latency entirely.
    let exact_filled: Vec<u64> = report
        .rows
        .iter()
        .filter(|row| row.venue.as_str() == "polymarket")
        .map(|row| row.signals_filled)
        .collect();
    assert_eq!(exact_filled, vec![3, 3, 3]);
}

#[tokio::test]
async fn test_replay_settles_outcomes() {
    let outcomes = HashMap::from([(SOURCE_MARKET.to_string(), OutcomeSide::Yes)]);
    let csv = replay(&outcomes).await.to_csv().unwrap();

    assert!(csv.lines().any(|line| line == "2000,kalshi,3,3,1.000,0.0,15.00,15.00,0.00"));
    assert!(csv.lines().any(|line| line == "5000,kalshi,3,0,0.000,0.0,0.00,0.00,0.00"));
}

#[tokio::test]
async fn test_report_writes_csv_file() {
    let report = replay(&HashMap::new()).await;
    let path = std::env::temp_dir().join(format!("polymirror-replay-{}.csv", std::process::id()));

    report.write_csv(&path).unwrap();
    let written = std::fs::read_to_string(&path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(written, report.to_csv().unwrap());
}

/// Earlier 15-minute BTC markets, one every quarter hour from Jan 5 00:15 ET.
fn earlier_markets(count: i64) -> Vec<MarketSnapshot> {
    let first = NaiveDate::from_ymd_opt(2026, 1, 5)
        .unwrap()
        .and_hms_opt(0, 15, 0)
        .unwrap();
    (0..count)
        .map(|i| {
            let close = first + Duration::minutes(15 * i);
            let ticker = format!("KXBTC15M-26JAN{}-00", close.format("%d%H%M"));
            MarketSnapshot {
                market_id: ticker.clone(),
                ticker: Some(ticker),
                ..target_market()
            }
        })
        .collect()
}

#[tokio::test]
async fn test_target_found_in_long_recording() {
    let mut markets = earlier_markets(250);
    markets.push(target_market());
    let target: Arc<dyn VenueAdapter> = Arc::new(RecordedVenue::from_parts(
        Venue::Kalshi,
        markets,
        vec![book(0, "0.50", "0.52", "500")],
        Vec::new(),
    ));
    let one = [signal("long", 0, OutcomeSide::Yes, Action::Buy, "10", "0.50")];

    let report = run_replay(&test_config(), &one, &[2000], target, &HashMap::new()).await;

    let row = &report.sensitivity[0];
    assert_eq!(row.unmapped, 0);
    assert_eq!(row.attempts, 1);
    assert_eq!(row.fill_rate, 1.0);
}
