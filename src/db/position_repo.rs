use rust_decimal::Decimal;
use sqlx::PgPool;

use crate::models::PositionRow;

/// Write the absolute state of a ledger entry. Repeating the call with the
/// same row is a no-op.
pub async fn upsert_position(pool: &PgPool, row: &PositionRow) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO sim_positions (venue, market_id, yes_qty, yes_cost, no_qty, no_cost,
                                   realized_pnl, settled_outcome, settled_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        ON CONFLICT (venue, market_id) DO UPDATE
            SET yes_qty = EXCLUDED.yes_qty,
                yes_cost = EXCLUDED.yes_cost,
                no_qty = EXCLUDED.no_qty,
                no_cost = EXCLUDED.no_cost,
                realized_pnl = EXCLUDED.realized_pnl,
                settled_outcome = EXCLUDED.settled_outcome,
                settled_at = EXCLUDED.settled_at,
                updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(&row.venue)
    .bind(&row.market_id)
    .bind(row.yes_qty)
    .bind(row.yes_cost)
    .bind(row.no_qty)
    .bind(row.no_cost)
    .bind(row.realized_pnl)
    .bind(&row.settled_outcome)
    .bind(row.settled_at)
    .bind(row.updated_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Record the resolution of a market on one venue.
pub async fn insert_outcome(
    pool: &PgPool,
    venue: &str,
    market_id: &str,
    outcome: &str,
    payout: Decimal,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO outcomes (venue, market_id, outcome, payout)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (venue, market_id) DO NOTHING
        "#,
    )
    .bind(venue)
    .bind(market_id)
    .bind(outcome)
    .bind(payout)
    .execute(pool)
    .await?;

    Ok(())
}
