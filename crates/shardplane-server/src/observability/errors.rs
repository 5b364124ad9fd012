//! Error capture sink
//!
//! Best-effort failures end here: logged with their context and counted,
//! never returned to the caller.

use super::metrics;
use shardplane_core::ClusterError;
use tracing::error;

pub fn capture(op: &str, subject: &str, err: &ClusterError) {
    error!(
        event_type = "error_captured",
        op = %op,
        subject = %subject,
        error_kind = err.kind(),
        error = %err,
        "Captured failure"
    );
    metrics::record_error_captured(op);
}

/// Capture for errors outside the cluster taxonomy.
pub fn capture_any(op: &str, subject: &str, err: &dyn std::error::Error) {
    error!(
        event_type = "error_captured",
        op = %op,
        subject = %subject,
        error = %err,
        "Captured failure"
    );
    metrics::record_error_captured(op);
}
