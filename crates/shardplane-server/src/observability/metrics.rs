//! Prometheus Metrics
//!
//! Metrics tracked:
//! - `shardplane_nodes_available` - gauge of registered writable nodes
//! - `shardplane_node_shard_count` - gauge of shards hosted per node
//! - `shardplane_shards_created_total` - counter of logical shards created
//! - `shardplane_node_operations_total` - counter of node calls by op and outcome
//! - `shardplane_errors_captured_total` - counter of swallowed failures by op
//! - `shardplane_membership_changes_total` - counter of registry changes by kind
//! - `shardplane_discovery_reconcile_duration_seconds` - histogram of reconciliation passes
//! - `shardplane_orphan_shards_purged_total` - counter of orphan replicas deleted

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// State containing the Prometheus handle for metrics export
#[derive(Clone)]
pub struct MetricsState {
    pub prometheus_handle: PrometheusHandle,
}

/// Install the Prometheus recorder and register metric descriptions.
pub fn init_metrics() -> Result<MetricsState, Box<dyn std::error::Error + Send + Sync>> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    register_metric_descriptions();

    Ok(MetricsState {
        prometheus_handle: handle,
    })
}

fn register_metric_descriptions() {
    // Membership
    describe_gauge!(
        "shardplane_nodes_available",
        "Number of registered writable index nodes"
    );
    describe_gauge!(
        "shardplane_node_shard_count",
        "Number of shard replicas hosted by each node"
    );
    describe_counter!(
        "shardplane_membership_changes_total",
        "Registry changes applied by discovery"
    );
    describe_histogram!(
        "shardplane_discovery_reconcile_duration_seconds",
        "Duration of a discovery reconciliation pass in seconds"
    );

    // Placement and node calls
    describe_counter!(
        "shardplane_shards_created_total",
        "Total number of logical shards created"
    );
    describe_counter!(
        "shardplane_node_operations_total",
        "Node calls by operation and outcome"
    );
    describe_counter!(
        "shardplane_errors_captured_total",
        "Failures reported to the error sink without being propagated"
    );

    // Maintenance
    describe_counter!(
        "shardplane_orphan_shards_purged_total",
        "Orphan shard replicas deleted from index nodes"
    );
}

pub fn set_available_nodes(count: usize) {
    gauge!("shardplane_nodes_available").set(count as f64);
}

pub fn set_node_shard_count(node_id: &str, count: u64) {
    gauge!("shardplane_node_shard_count", "node" => node_id.to_string()).set(count as f64);
}

pub fn record_shard_created() {
    counter!("shardplane_shards_created_total").increment(1);
}

pub fn record_node_operation(op: &str, outcome: &'static str) {
    counter!(
        "shardplane_node_operations_total",
        "op" => op.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_error_captured(op: &str) {
    counter!("shardplane_errors_captured_total", "op" => op.to_string()).increment(1);
}

/// `change` is one of `added`, `updated`, `removed`.
pub fn record_membership_change(change: &'static str) {
    counter!("shardplane_membership_changes_total", "change" => change).increment(1);
}

pub fn record_reconcile_duration(duration: Duration) {
    histogram!("shardplane_discovery_reconcile_duration_seconds").record(duration.as_secs_f64());
}

pub fn record_orphan_purged() {
    counter!("shardplane_orphan_shards_purged_total").increment(1);
}
