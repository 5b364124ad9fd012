//! Prometheus Metrics Endpoint

use super::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse};

/// GET /metrics - metrics in Prometheus exposition format
#[tracing::instrument(skip(state))]
pub async fn get_metrics(State(state): State<AppState>) -> impl IntoResponse {
    let content_type = [("content-type", "text/plain; charset=utf-8")];
    match &state.metrics_state {
        Some(metrics) => (
            StatusCode::OK,
            content_type,
            metrics.prometheus_handle.render(),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            content_type,
            "Metrics not initialized".to_string(),
        ),
    }
}
