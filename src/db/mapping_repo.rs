use sqlx::PgPool;

use crate::mapping::MappingResult;

/// Append the mapping decision taken for one signal.
pub async fn insert_mapping(pool: &PgPool, signal_id: &str, mapping: &MappingResult) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO mappings (signal_id, source_market_id, target_market_id, target_ticker, confidence,
                              reason, breakdown, source_features, target_features, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(signal_id)
    .bind(&mapping.source_market_id)
    .bind(&mapping.target_market_id)
    .bind(&mapping.target_ticker)
    .bind(mapping.confidence)
    .bind(&mapping.reason)
    .bind(sqlx::types::Json(&mapping.breakdown))
    .bind(sqlx::types::Json(&mapping.source_features))
    .bind(mapping.target_features.as_ref().map(sqlx::types::Json))
    .bind(mapping.created_at)
    .execute(pool)
    .await?;

    Ok(())
}
