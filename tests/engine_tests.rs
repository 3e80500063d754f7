mod common;

use polymirror::config::{AppConfig, ParamBounds};
use polymirror::db::Repository;
use polymirror::ingestion::FEED_CURSOR;
use polymirror::models::{Action, OutcomeSide, Venue};
use polymirror::simulation::Disposition;

use common::{book, build_engine, d, signal, test_config, SOURCE_MARKET, TICKER};

#[tokio::test]
async fn test_duplicate_signal_is_processed_once() {
    let (engine, repo) = build_engine(test_config(), vec![book(0, "0.50", "0.52", "500")]).await;
    let s = signal("t-1", 0, OutcomeSide::Yes, Action::Buy, "100", "0.50");

    let first = engine.process_signal(&s).await.unwrap();
    let second = engine.process_signal(&s).await.unwrap();

    let report = first.expect("first observation is processed");
    assert_eq!(report.exact.disposition, Disposition::Filled);
    assert_eq!(report.realistic.disposition, Disposition::Filled);
    assert!(second.is_none());

    assert_eq!(repo.signal_count().await, 1);
    // One order per venue.
    assert_eq!(repo.orders().await.len(), 2);
    assert_eq!(repo.get_cursor(FEED_CURSOR).await.unwrap(), Some(s.timestamp));
}

#[tokio::test]
async fn test_missed_order_still_advances_cursor() {
    let (engine, repo) = build_engine(test_config(), Vec::new()).await;
    let s = signal("t-1", 30, OutcomeSide::Yes, Action::Buy, "100", "0.50");

    let report = engine.process_signal(&s).await.unwrap().unwrap();
    assert_eq!(report.realistic.disposition, Disposition::Missed);
    assert_eq!(repo.get_cursor(FEED_CURSOR).await.unwrap(), Some(s.timestamp));

    let status = engine.status().await;
    let kalshi = status.venues.iter().find(|v| v.venue == Venue::Kalshi).unwrap();
    assert_eq!(kalshi.counters.missed, 1);
    assert_eq!(kalshi.miss_rate, 1.0);
}

#[tokio::test]
async fn test_hedged_position_locks_edge_and_settles() {
    let (engine, repo) = build_engine(test_config(), vec![book(0, "0.50", "0.45", "500")]).await;
    engine
        .process_signal(&signal("yes", 0, OutcomeSide::Yes, Action::Buy, "100", "0.50"))
        .await
        .unwrap();
    engine
        .process_signal(&signal("no", 5, OutcomeSide::No, Action::Buy, "100", "0.45"))
        .await
        .unwrap();

    let status = engine.status().await;
    for venue in &status.venues {
        assert_eq!(venue.ledger.hedged_positions, 1, "{}", venue.venue);
        assert_eq!(venue.ledger.total_locked_edge, d("5"), "{}", venue.venue);
    }

    let settled = engine.settle_market(SOURCE_MARKET, OutcomeSide::Yes).await.unwrap();
    assert_eq!(settled.len(), 2);
    assert!(settled.iter().all(|s| s.pnl == d("5")));

    let outcome = repo.outcome(Venue::Kalshi, TICKER).await;
    assert_eq!(outcome, Some((OutcomeSide::Yes, d("1"))));
    let row = repo.position(Venue::Kalshi, TICKER).await.unwrap();
    assert_eq!(row.settled_outcome.as_deref(), Some("YES"));
    assert_eq!(row.realized_pnl, d("5"));

    // A second resolution finds nothing open.
    assert!(engine.settle_market(SOURCE_MARKET, OutcomeSide::Yes).await.unwrap().is_empty());
    assert!(engine.open_source_markets().await.is_empty());
}

#[tokio::test]
async fn test_losing_settlement_trips_breaker_until_reset() {
    let config = AppConfig {
        learning_enabled: true,
        max_consecutive_losses: 1,
        confidence_bounds: ParamBounds::new(0.5, 0.8),
        ..test_config()
    };
    let (engine, _repo) = build_engine(config, vec![book(0, "0.50", "0.52", "500")]).await;
    engine
        .process_signal(&signal("t-1", 0, OutcomeSide::Yes, Action::Buy, "100", "0.50"))
        .await
        .unwrap();

    let before = engine.status().await.learner.unwrap();
    assert!(!before.circuit_breaker_active);
    assert_eq!(before.total_outcomes, 1);

    let settled = engine.settle_market(SOURCE_MARKET, OutcomeSide::No).await.unwrap();
    assert!(settled.iter().all(|s| s.pnl < d("0")));

    let tripped = engine.status().await.learner.unwrap();
    assert!(tripped.circuit_breaker_active);
    assert_eq!(tripped.consecutive_losses, 1);

    let reset = engine.reset_breaker().await.unwrap();
    assert!(!reset.circuit_breaker_active);
    assert_eq!(reset.consecutive_losses, 0);
    // PnL history survives the reset.
    assert!(reset.total_pnl < 0.0);
}

#[tokio::test]
async fn test_run_sim_orders_signals_and_completes_run() {
    let (engine, repo) = build_engine(test_config(), vec![book(0, "0.50", "0.52", "500")]).await;
    let signals = vec![
        signal("c", 20, OutcomeSide::Yes, Action::Buy, "10", "0.50"),
        signal("a", 0, OutcomeSide::Yes, Action::Buy, "10", "0.50"),
        signal("b", 10, OutcomeSide::Yes, Action::Buy, "10", "0.50"),
    ];
    let latest = signals[0].timestamp;

    let processed = engine.run_sim(signals.clone()).await.unwrap();
    assert_eq!(processed, 3);
    assert_eq!(repo.get_cursor(FEED_CURSOR).await.unwrap(), Some(latest));

    // Re-running the same input is a no-op.
    assert_eq!(engine.run_sim(signals).await.unwrap(), 0);

    engine.shutdown().await.unwrap();
    let run = repo.run(engine.run_id()).await.unwrap();
    assert_eq!(run.status, "completed");
    assert_eq!(run.mode, "SIM");
    assert!(run.summary.is_some());
}
