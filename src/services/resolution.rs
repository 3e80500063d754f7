use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::engine::Engine;
use crate::venues::VenueAdapter;

/// Periodically check source markets that still have open simulated
/// positions and settle them once the venue reports a winner.
pub async fn run_resolution_poller(engine: Arc<Engine>, source: Arc<dyn VenueAdapter>, interval_secs: u64) {
    let mut ticker = interval(Duration::from_secs(interval_secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(interval_secs, "Resolution poller started");

    while !engine.is_stopped() {
        ticker.tick().await;
        let settled = resolve_once(&engine, source.as_ref()).await;
        if settled > 0 {
            tracing::info!(markets = settled, "Resolution poller settled markets");
        }
    }

    tracing::info!("Resolution poller stopped");
}

/// One pass over the open markets. Returns how many were settled.
pub async fn resolve_once(engine: &Engine, source: &dyn VenueAdapter) -> usize {
    let open = engine.open_source_markets().await;
    if open.is_empty() {
        tracing::debug!("No open markets to check");
        return 0;
    }

    let mut settled = 0;
    for market_id in &open {
        let market = match source.get_market(market_id).await {
            Ok(Some(m)) => m,
            Ok(None) => {
                tracing::debug!(market_id = %market_id, "Market not found on source venue");
                continue;
            }
            Err(e) => {
                tracing::warn!(error = %e, market_id = %market_id, "Failed to fetch market");
                continue;
            }
        };

        // Closed but no winner declared yet
        let Some(winner) = market.winner.filter(|_| market.closed) else {
            continue;
        };

        tracing::info!(market_id = %market_id, outcome = %winner, "Market resolved");
        match engine.settle_market(market_id, winner).await {
            Ok(positions) if !positions.is_empty() => settled += 1,
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, market_id = %market_id, "Failed to settle market"),
        }
    }
    settled
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal::Decimal;

    use crate::config::AppConfig;
    use crate::db::MemoryRepository;
    use crate::models::{Action, CopySignal, MarketSnapshot, OutcomeSide, SignalMeta, Venue};
    use crate::venues::RecordedVenue;

    fn source_market(id: &str, closed: bool, winner: Option<OutcomeSide>) -> MarketSnapshot {
        MarketSnapshot {
            market_id: id.into(),
            venue: Venue::Polymarket,
            ticker: None,
            title: "Bitcoin Up or Down - January 7, 6:45PM-7:00PM ET".into(),
            expiry: None,
            strike: None,
            active: !closed,
            closed,
            winner,
            yes_price: None,
            volume: None,
        }
    }

    fn buy(market_id: &str, id: &str) -> CopySignal {
        let quantity = Decimal::from(10);
        let price = Decimal::new(40, 2);
        CopySignal {
            signal_id: id.into(),
            timestamp: Utc::now(),
            source: "test".into(),
            market_id: market_id.into(),
            market_name: "Bitcoin Up or Down - January 7, 6:45PM-7:00PM ET".into(),
            market_slug: "btc-updown".into(),
            side: OutcomeSide::Yes,
            action: Action::Buy,
            quantity,
            price,
            value: quantity * price,
            meta: SignalMeta::default(),
        }
    }

    #[tokio::test]
    async fn test_resolve_once_settles_only_closed_markets() {
        let source: Arc<dyn VenueAdapter> = Arc::new(RecordedVenue::from_parts(
            Venue::Polymarket,
            vec![
                source_market("0xdone", true, Some(OutcomeSide::Yes)),
                source_market("0xopen", false, None),
            ],
            Vec::new(),
            Vec::new(),
        ));
        let config = AppConfig {
            learning_enabled: false,
            ..AppConfig::default()
        };
        let engine = Engine::new(
            config,
            Arc::new(MemoryRepository::new()),
            source.clone(),
            Arc::new(RecordedVenue::empty(Venue::Kalshi)),
        )
        .await
        .unwrap();

        engine.process_signal(&buy("0xdone", "a".repeat(32).as_str())).await.unwrap();
        engine.process_signal(&buy("0xopen", "b".repeat(32).as_str())).await.unwrap();
        assert_eq!(engine.open_source_markets().await.len(), 2);

        assert_eq!(resolve_once(&engine, source.as_ref()).await, 1);
        assert_eq!(engine.open_source_markets().await, vec!["0xopen".to_string()]);

        // Nothing left that the venue reports as closed.
        assert_eq!(resolve_once(&engine, source.as_ref()).await, 0);
    }
}
