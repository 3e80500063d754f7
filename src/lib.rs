pub mod api;
pub mod config;
pub mod db;
pub mod engine;
pub mod errors;
pub mod execution;
pub mod ingestion;
pub mod learning;
pub mod mapping;
pub mod metrics;
pub mod models;
pub mod services;
pub mod simulation;
pub mod venues;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::engine::Engine;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub config: AppConfig,
    pub metrics_handle: metrics_exporter_prometheus::PrometheusHandle,
}
