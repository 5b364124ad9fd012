//! Orphan shard reconciliation
//!
//! A shard is orphaned when an index node still hosts it but no shard set
//! in metadata references it any more, typically because the node was
//! unreachable while its knowledge box was being deleted. Detection needs a
//! full metadata scan, which is fine on this maintenance path.

use crate::cluster::NodeRegistry;
use crate::maindb::get_json;
use crate::observability::{errors, events, metrics};
use crate::policy::{self, NodeOp};
use shardplane_core::{keys, ClusterError, Driver, ShardSet};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// Outcome of an orphan sweep
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OrphanPurgeReport {
    pub deleted: Vec<String>,
    pub failed: Vec<String>,
    /// Nodes whose shards could not be listed, left for the next sweep
    pub unreachable_nodes: Vec<String>,
}

/// Orphans found on the nodes that answered
#[derive(Debug, Default)]
struct OrphanScan {
    orphans: BTreeMap<String, String>,
    unreachable_nodes: Vec<String>,
}

/// Shard ids hosted by writable nodes and referenced by no shard set,
/// mapped to the node hosting them.
///
/// Nodes are listed before metadata is read, so a shard committed in
/// between is seen as referenced. Rollover shard sets count as references.
/// A node that cannot list its shards is captured and skipped.
pub async fn detect_orphan_shards(
    registry: &NodeRegistry,
    driver: &dyn Driver,
) -> Result<BTreeMap<String, String>, ClusterError> {
    Ok(scan(registry, driver).await?.orphans)
}

async fn scan(registry: &NodeRegistry, driver: &dyn Driver) -> Result<OrphanScan, ClusterError> {
    let mut result = OrphanScan::default();
    for node in registry.list_nodes().await {
        let listed = node.client.list_shards().await;
        let Some(shards) = policy::settle(NodeOp::ListShards, node.id(), listed)? else {
            warn!(node_id = %node.id(), "Could not list shards, node skipped");
            result.unreachable_nodes.push(node.info.id.clone());
            continue;
        };
        debug!(node_id = %node.id(), shards = shards.len(), "Listed node shards");
        for shard_id in shards {
            result.orphans.insert(shard_id, node.info.id.clone());
        }
    }

    let referenced = referenced_shard_ids(driver).await?;
    result
        .orphans
        .retain(|shard_id, _| !referenced.contains(shard_id));
    Ok(result)
}

async fn referenced_shard_ids(driver: &dyn Driver) -> Result<BTreeSet<String>, ClusterError> {
    let mut txn = driver.begin(true).await?;
    let mut referenced = BTreeSet::new();
    for key in txn.keys(keys::KBS_PREFIX, None, false).await? {
        if !key.ends_with("/shards") {
            continue;
        }
        if let Some(shards) = get_json::<ShardSet>(&mut *txn, &key).await? {
            referenced.extend(shards.referenced_ids());
        }
    }
    txn.abort().await?;
    Ok(referenced)
}

/// Delete every orphan from the node hosting it.
///
/// Failures on one node or shard do not stop the sweep. A shard that
/// disappeared in the meantime counts as deleted, so running the sweep twice
/// in a row leaves the second run with nothing to do.
pub async fn purge_orphan_shards(
    registry: &NodeRegistry,
    driver: &dyn Driver,
) -> Result<OrphanPurgeReport, ClusterError> {
    let OrphanScan {
        orphans,
        unreachable_nodes,
    } = scan(registry, driver).await?;
    let mut report = OrphanPurgeReport {
        unreachable_nodes,
        ..OrphanPurgeReport::default()
    };
    if orphans.is_empty() {
        info!("No orphan shards found");
        return Ok(report);
    }
    info!(orphans = orphans.len(), "Purging orphan shards");

    for (shard_id, node_id) in orphans {
        let Some(node) = registry.get_node(&node_id).await else {
            warn!(shard_id = %shard_id, node_id = %node_id, "Node left before its orphan could be deleted");
            report.failed.push(shard_id);
            continue;
        };
        let result = match node.client.delete_shard(&shard_id).await {
            Err(ClusterError::ShardNotFound(_)) => Ok(shard_id.clone()),
            other => other,
        };
        match policy::settle(NodeOp::DeleteOrphan, &node_id, result) {
            Ok(Some(_)) => {
                metrics::record_orphan_purged();
                events::orphan_shard_purged(&shard_id, &node_id);
                report.deleted.push(shard_id);
            }
            Ok(None) => report.failed.push(shard_id),
            Err(e) => {
                errors::capture(NodeOp::DeleteOrphan.as_str(), &node_id, &e);
                report.failed.push(shard_id);
            }
        }
    }
    Ok(report)
}
