use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::models::signal::SignalRow;
use crate::models::CopySignal;

/// Insert a signal. Returns false if the id already exists.
pub async fn insert_signal(pool: &PgPool, signal: &CopySignal, run_id: Option<&str>) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO signals (signal_id, run_id, timestamp, source, market_id, market_name, market_slug,
                             side, action, quantity, price, value, meta)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        ON CONFLICT (signal_id) DO NOTHING
        "#,
    )
    .bind(&signal.signal_id)
    .bind(run_id)
    .bind(signal.timestamp)
    .bind(&signal.source)
    .bind(&signal.market_id)
    .bind(&signal.market_name)
    .bind(&signal.market_slug)
    .bind(signal.side.as_str())
    .bind(signal.action.as_str())
    .bind(signal.quantity)
    .bind(signal.price)
    .bind(signal.value)
    .bind(sqlx::types::Json(&signal.meta))
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Signals at or after `since`, oldest first.
pub async fn get_signals_since(pool: &PgPool, since: DateTime<Utc>, limit: i64) -> anyhow::Result<Vec<CopySignal>> {
    let rows = sqlx::query_as::<_, SignalRow>(
        r#"
        SELECT signal_id, run_id, timestamp, source, market_id, market_name, market_slug,
               side, action, quantity, price, value, meta, processed
        FROM signals
        WHERE timestamp >= $1
        ORDER BY timestamp ASC, signal_id ASC
        LIMIT $2
        "#,
    )
    .bind(since)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().filter_map(SignalRow::into_signal).collect())
}

/// Ids of the most recently processed signals, newest first.
pub async fn get_recent_processed_ids(pool: &PgPool, limit: i64) -> anyhow::Result<Vec<String>> {
    let ids = sqlx::query_scalar::<_, String>(
        r#"
        SELECT signal_id FROM signals
        WHERE processed
        ORDER BY processed_at DESC NULLS LAST, timestamp DESC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(ids)
}

pub async fn is_processed(pool: &PgPool, signal_id: &str) -> anyhow::Result<bool> {
    let processed = sqlx::query_scalar::<_, bool>("SELECT processed FROM signals WHERE signal_id = $1")
        .bind(signal_id)
        .fetch_optional(pool)
        .await?;

    Ok(processed.unwrap_or(false))
}

/// Flag a signal processed and advance the cursor in one transaction, so the
/// cursor never points past what was recorded.
pub async fn mark_processed(pool: &PgPool, signal_id: &str, cursor: &str, ts: DateTime<Utc>) -> anyhow::Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("UPDATE signals SET processed = TRUE, processed_at = NOW() WHERE signal_id = $1")
        .bind(signal_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        r#"
        INSERT INTO cursors (name, value, updated_at)
        VALUES ($1, $2, NOW())
        ON CONFLICT (name) DO UPDATE
            SET value = GREATEST(cursors.value, EXCLUDED.value), updated_at = NOW()
        "#,
    )
    .bind(cursor)
    .bind(ts)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

pub async fn get_cursor(pool: &PgPool, name: &str) -> anyhow::Result<Option<DateTime<Utc>>> {
    let value = sqlx::query_scalar::<_, DateTime<Utc>>("SELECT value FROM cursors WHERE name = $1")
        .bind(name)
        .fetch_optional(pool)
        .await?;

    Ok(value)
}

pub async fn update_cursor(pool: &PgPool, name: &str, ts: DateTime<Utc>) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO cursors (name, value, updated_at)
        VALUES ($1, $2, NOW())
        ON CONFLICT (name) DO UPDATE
            SET value = GREATEST(cursors.value, EXCLUDED.value), updated_at = NOW()
        "#,
    )
    .bind(name)
    .bind(ts)
    .execute(pool)
    .await?;

    Ok(())
}
