use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use thiserror::Error;

use crate::models::{Action, LiveOrder, OrderAck, OutcomeSide, Venue};
use crate::venues::{AdapterError, VenueAdapter};

#[derive(Debug, Error)]
pub enum LiveExecutionError {
    #[error("live execution is not enabled (set KALSHI_LIVE_ENABLED and credentials)")]
    NotEnabled,

    #[error("adapter for {0} refuses orders")]
    AdapterRefused(Venue),

    #[error("order size rounds to zero contracts")]
    ZeroSize,

    #[error("price {0} is outside 1..=99 cents")]
    InvalidPrice(Decimal),

    #[error("venue error: {0}")]
    Venue(#[from] AdapterError),
}

/// Places real orders on the target venue. Every request is refused unless
/// the operator enabled live trading and the adapter reports orders enabled;
/// there is no fallback to simulation.
pub struct LiveExecutor {
    adapter: Arc<dyn VenueAdapter>,
    enabled: bool,
}

impl LiveExecutor {
    pub fn new(adapter: Arc<dyn VenueAdapter>, enabled: bool) -> Self {
        if enabled && !adapter.orders_enabled() {
            tracing::error!(
                venue = %adapter.venue(),
                "Live execution requested but the adapter has orders disabled"
            );
        }
        Self { adapter, enabled }
    }

    pub fn is_armed(&self) -> bool {
        self.enabled && self.adapter.orders_enabled()
    }

    /// Submit a limit order mirroring a simulated fill.
    pub async fn execute(
        &self,
        ticker: &str,
        side: OutcomeSide,
        action: Action,
        quantity: Decimal,
        limit_price: Decimal,
        client_order_id: &str,
    ) -> Result<OrderAck, LiveExecutionError> {
        if !self.enabled {
            tracing::error!(ticker, "Refusing live order: live execution disabled");
            return Err(LiveExecutionError::NotEnabled);
        }
        if !self.adapter.orders_enabled() {
            tracing::error!(ticker, venue = %self.adapter.venue(), "Refusing live order: adapter has orders disabled");
            return Err(LiveExecutionError::AdapterRefused(self.adapter.venue()));
        }

        let count = quantity.floor().to_u32().unwrap_or(0);
        if count == 0 {
            return Err(LiveExecutionError::ZeroSize);
        }
        let cents = (limit_price * Decimal::ONE_HUNDRED).round().to_u32().unwrap_or(0);
        if !(1..=99).contains(&cents) {
            return Err(LiveExecutionError::InvalidPrice(limit_price));
        }

        let order = LiveOrder {
            ticker: ticker.to_string(),
            side,
            action,
            count,
            price_cents: cents,
            client_order_id: client_order_id.to_string(),
        };

        tracing::warn!(
            ticker,
            side = %side,
            action = action.as_str(),
            count,
            price_cents = cents,
            "Submitting LIVE order"
        );
        Ok(self.adapter.place_order(&order).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::venues::RecordedVenue;

    #[tokio::test]
    async fn test_refuses_when_disabled() {
        let executor = LiveExecutor::new(Arc::new(RecordedVenue::empty(Venue::Kalshi)), false);
        let result = executor
            .execute("T", OutcomeSide::Yes, Action::Buy, Decimal::from(10), Decimal::new(5, 1), "c1")
            .await;
        assert!(matches!(result, Err(LiveExecutionError::NotEnabled)));
        assert!(!executor.is_armed());
    }

    #[tokio::test]
    async fn test_refuses_when_adapter_has_orders_disabled() {
        let executor = LiveExecutor::new(Arc::new(RecordedVenue::empty(Venue::Kalshi)), true);
        let result = executor
            .execute("T", OutcomeSide::Yes, Action::Buy, Decimal::from(10), Decimal::new(5, 1), "c1")
            .await;
        assert!(matches!(result, Err(LiveExecutionError::AdapterRefused(Venue::Kalshi))));
    }
}
