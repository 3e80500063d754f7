use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::AppState;
use super::auth::require_auth;
use super::handlers;

pub fn create_router(state: AppState) -> Router {
    // Public routes: no authentication required
    let public = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::ready))
        .route("/metrics", get(handlers::metrics::render))
        .route("/status", get(handlers::status::status));

    // Control routes: require Bearer token when API_TOKEN is set
    let protected = Router::new()
        .route("/api/control/reset-breaker", post(handlers::control::reset_breaker))
        .route("/api/control/stop", post(handlers::control::stop))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    public
        .merge(protected)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
