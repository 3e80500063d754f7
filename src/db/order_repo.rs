use sqlx::PgPool;

use crate::models::{SimFillRecord, SimOrderRecord};

/// Insert a simulated order with its final status.
pub async fn insert_sim_order(pool: &PgPool, order: &SimOrderRecord) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO sim_orders (order_id, signal_id, venue, market_id, side, action, requested_qty,
                                limit_price, latency_ms, status, filled_qty, avg_fill_price, fee,
                                slippage_bps, reject_reason, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
        ON CONFLICT (order_id) DO NOTHING
        "#,
    )
    .bind(&order.order_id)
    .bind(&order.signal_id)
    .bind(&order.venue)
    .bind(&order.market_id)
    .bind(&order.side)
    .bind(&order.action)
    .bind(order.requested_qty)
    .bind(order.limit_price)
    .bind(order.latency_ms)
    .bind(&order.status)
    .bind(order.filled_qty)
    .bind(order.avg_fill_price)
    .bind(order.fee)
    .bind(order.slippage_bps)
    .bind(&order.reject_reason)
    .bind(order.created_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Insert one consumed book level of a simulated order.
pub async fn insert_sim_fill(pool: &PgPool, fill: &SimFillRecord) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO sim_fills (order_id, level, price, quantity, created_at)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(&fill.order_id)
    .bind(fill.level)
    .bind(fill.price)
    .bind(fill.quantity)
    .bind(fill.created_at)
    .execute(pool)
    .await?;

    Ok(())
}
