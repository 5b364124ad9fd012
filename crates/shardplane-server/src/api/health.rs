//! Health Check Endpoints
//!
//! Liveness and readiness probe handlers.

use super::state::AppState;
use axum::{extract::State, http::StatusCode};
use std::time::Duration;

/// Liveness probe endpoint. Verifies the metadata store answers.
#[tracing::instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Result<&'static str, StatusCode> {
    let check = tokio::time::timeout(Duration::from_secs(2), state.context.driver.check()).await;

    match check {
        Ok(Ok(())) => Ok("OK"),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Metadata store health check failed");
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
        Err(_) => {
            tracing::warn!("Metadata store health check timed out");
            Err(StatusCode::REQUEST_TIMEOUT)
        }
    }
}

/// Readiness probe endpoint. Returns OK after the first discovery pass.
#[tracing::instrument(skip(state))]
pub async fn readiness_check(State(state): State<AppState>) -> Result<&'static str, StatusCode> {
    if state.context.is_ready() {
        Ok("READY")
    } else {
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}
