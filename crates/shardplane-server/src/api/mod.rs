//! Admin HTTP API
//!
//! - `state`: Shared application state
//! - `health`: Liveness and readiness probes
//! - `metrics`: Prometheus metrics endpoint
//! - `nodes`: Registry listing and build information

mod health;
mod metrics;
mod nodes;
mod state;

pub use state::AppState;

use axum::{routing::get, Router};

/// Create the admin router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health checks
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        // Observability
        .route("/metrics", get(metrics::get_metrics))
        // Cluster state
        .route("/nodes", get(nodes::list_nodes))
        .route("/version", get(nodes::get_version))
        .with_state(state)
}
