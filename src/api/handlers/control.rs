use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::errors::AppError;
use crate::AppState;

/// POST /api/control/reset-breaker: Clear the learner's circuit breaker.
pub async fn reset_breaker(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let stats = state.engine.reset_breaker().await?;
    tracing::warn!("Circuit breaker reset via control API");
    Ok(Json(json!({ "success": true, "learner": stats })))
}

/// POST /api/control/stop: Stop the feed loop after its current iteration.
pub async fn stop(State(state): State<AppState>) -> Json<Value> {
    state.engine.stop();
    tracing::warn!("Engine STOPPED via control API");
    Json(json!({ "success": true, "status": "stopping" }))
}
