//! Observability Module
//!
//! - `metrics`: Prometheus metrics for membership, placement and node calls
//! - `events`: Structured event logging with consistent fields
//! - `errors`: Sink for failures that are reported but not propagated
//! - `tracing`: Subscriber setup with optional OpenTelemetry export

pub mod errors;
pub mod events;
pub mod metrics;
pub mod tracing;

pub use metrics::{init_metrics, MetricsState};
pub use tracing::{init_tracing, shutdown_tracing, TracingConfig};
