//! Structured Events
//!
//! Lifecycle events with an `event_type` field and consistent field names.
//!
//! Event types:
//! - `node_joined` / `node_updated` / `node_departed` - registry changes
//! - `membership_anomaly` - more than one node removed in a single pass
//! - `shard_created` - a logical shard and its replicas exist
//! - `shard_rollback` - replicas of a failed creation attempt were undone
//! - `kb_purged` / `kb_storage_purged` - deletion intent progressed
//! - `orphan_shard_purged` - a replica unknown to metadata was deleted

use tracing::{info, warn};

pub fn node_joined(node_id: &str, address: &str, primary_id: Option<&str>) {
    info!(
        event_type = "node_joined",
        node_id = %node_id,
        address = %address,
        primary_id = ?primary_id,
        "Index node joined"
    );
}

pub fn node_updated(node_id: &str, address: &str, shard_count: u64) {
    info!(
        event_type = "node_updated",
        node_id = %node_id,
        address = %address,
        shard_count = shard_count,
        "Index node updated"
    );
}

pub fn node_departed(node_id: &str) {
    warn!(
        event_type = "node_departed",
        node_id = %node_id,
        "Index node departed"
    );
}

/// Shards on the removed nodes are not re-replicated.
pub fn membership_anomaly(removed: &[String]) {
    warn!(
        event_type = "membership_anomaly",
        removed_count = removed.len(),
        removed = ?removed,
        "More than one index node removed in a single reconciliation pass"
    );
}

pub fn shard_created(kbid: &str, shard_id: &str, nodes: &[String]) {
    info!(
        event_type = "shard_created",
        kbid = %kbid,
        shard_id = %shard_id,
        nodes = ?nodes,
        "Shard created"
    );
}

pub fn shard_rollback(kbid: &str, shard_id: &str, replicas: usize) {
    warn!(
        event_type = "shard_rollback",
        kbid = %kbid,
        shard_id = %shard_id,
        replicas = replicas,
        "Rolled back replicas of failed shard creation"
    );
}

pub fn kb_purged(kbid: &str) {
    info!(event_type = "kb_purged", kbid = %kbid, "Knowledge box metadata purged");
}

pub fn kb_storage_purged(kbid: &str) {
    info!(
        event_type = "kb_storage_purged",
        kbid = %kbid,
        "Knowledge box storage purged"
    );
}

pub fn orphan_shard_purged(shard_id: &str, node_id: &str) {
    info!(
        event_type = "orphan_shard_purged",
        shard_id = %shard_id,
        node_id = %node_id,
        "Orphan shard deleted"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_functions_dont_panic() {
        node_joined("node-1", "10.0.0.1:10009", None);
        node_updated("node-1", "10.0.0.1:10009", 4);
        node_departed("node-1");
        membership_anomaly(&["node-1".to_string(), "node-2".to_string()]);
        shard_created("kb", "shard-1", &["node-1".to_string()]);
        shard_rollback("kb", "shard-1", 1);
        kb_purged("kb");
        kb_storage_purged("kb");
        orphan_shard_purged("shard-1", "node-1");
    }
}
