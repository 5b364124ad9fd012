//! Application State
//!
//! Shared state passed to all API handlers.

use crate::context::ClusterContext;
use crate::observability::MetricsState;
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub context: Arc<ClusterContext>,
    /// None when the Prometheus recorder could not be installed
    pub metrics_state: Option<MetricsState>,
}

impl AppState {
    pub fn new(context: Arc<ClusterContext>, metrics_state: Option<MetricsState>) -> Self {
        Self {
            context,
            metrics_state,
        }
    }
}
