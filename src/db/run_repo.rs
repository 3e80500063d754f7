use sqlx::PgPool;
use uuid::Uuid;

/// Open a run row and return its id.
pub async fn create_run(pool: &PgPool, mode: &str, config_hash: &str) -> anyhow::Result<String> {
    let run_id = Uuid::new_v4().to_string();
    sqlx::query("INSERT INTO runs (run_id, mode, config_hash) VALUES ($1, $2, $3)")
        .bind(&run_id)
        .bind(mode)
        .bind(config_hash)
        .execute(pool)
        .await?;

    Ok(run_id)
}

pub async fn complete_run(
    pool: &PgPool,
    run_id: &str,
    status: &str,
    summary: serde_json::Value,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        UPDATE runs
        SET status = $2, summary = $3, completed_at = NOW()
        WHERE run_id = $1
        "#,
    )
    .bind(run_id)
    .bind(status)
    .bind(summary)
    .execute(pool)
    .await?;

    Ok(())
}
