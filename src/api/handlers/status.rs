use axum::extract::State;
use axum::Json;

use crate::engine::EngineStatus;
use crate::AppState;

/// GET /status: Per-venue counters and ledgers plus learner state.
pub async fn status(State(state): State<AppState>) -> Json<EngineStatus> {
    Json(state.engine.status().await)
}
