//! Cluster Discovery
//!
//! Turns full membership lists into registry mutations. Each pass is a
//! complete diff against the registry:
//! - unknown members are added
//! - known members get address, shard count and disk refreshed in place
//! - registered nodes missing from the list are removed
//!
//! Where the lists come from is the business of a [`MembershipSource`];
//! [`DiscoveryController`] drives the periodic loop.

pub mod controller;
pub mod sources;

pub use controller::DiscoveryController;
pub use sources::{EtcdMembershipSource, MembershipSource, SeedListSource};

use super::registry::NodeRegistry;
use crate::observability::{errors, events, metrics};
use shardplane_core::{ClusterError, MemberReport};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;
use tracing::{debug, warn};

/// What a reconciliation pass changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub removed: Vec<String>,
}

impl ReconcileSummary {
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

#[derive(Clone)]
pub struct ClusterDiscovery {
    registry: NodeRegistry,
}

impl ClusterDiscovery {
    pub fn new(registry: NodeRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    /// Reconcile the registry against the full current membership.
    ///
    /// Never fails the pass because of a single member: a member whose client
    /// cannot be built is captured and skipped.
    pub async fn update_members(&self, members: Vec<MemberReport>) -> ReconcileSummary {
        let started = Instant::now();
        let mut summary = ReconcileSummary::default();

        // Last report wins for duplicated ids
        let reported: BTreeMap<String, MemberReport> = members
            .into_iter()
            .map(|m| (m.node_id.clone(), m))
            .collect();

        for member in reported.values() {
            if let Err(e) = self.apply_member(member, &mut summary).await {
                errors::capture("discovery_apply_member", &member.node_id, &e);
            }
        }

        let reported_ids: BTreeSet<&String> = reported.keys().collect();
        for (node_id, primary_id) in self.registry.members().await {
            if reported_ids.contains(&node_id) {
                continue;
            }
            match self.registry.remove_node(&node_id, primary_id.as_deref()).await {
                Ok(_) => {
                    metrics::record_membership_change("removed");
                    summary.removed.push(node_id);
                }
                // Removed concurrently; nothing left to do
                Err(ClusterError::NotFound { .. }) => {}
                Err(e) => errors::capture("discovery_remove_member", &node_id, &e),
            }
        }

        if summary.removed.len() > 1 {
            events::membership_anomaly(&summary.removed);
        }

        metrics::record_reconcile_duration(started.elapsed());
        let total_nodes = self.registry.len().await;
        debug!(
            added = summary.added.len(),
            updated = summary.updated.len(),
            removed = summary.removed.len(),
            total_nodes,
            "Reconciled cluster membership"
        );
        summary
    }

    async fn apply_member(
        &self,
        member: &MemberReport,
        summary: &mut ReconcileSummary,
    ) -> Result<(), ClusterError> {
        let Some(known) = self.registry.get_node(&member.node_id).await else {
            self.registry
                .add_node(
                    &member.node_id,
                    &member.address,
                    member.shard_count,
                    member.available_disk,
                    member.primary_id.as_deref(),
                )
                .await?;
            events::node_joined(&member.node_id, &member.address, member.primary_id.as_deref());
            metrics::record_membership_change("added");
            summary.added.push(member.node_id.clone());
            return Ok(());
        };

        if known.info.primary_id != member.primary_id {
            warn!(
                node_id = %member.node_id,
                registered_primary = ?known.info.primary_id,
                reported_primary = ?member.primary_id,
                "Ignoring primary change for a registered node"
            );
        }

        let changed = known.info.address != member.address
            || known.info.shard_count != member.shard_count
            || known.info.available_disk != member.available_disk;
        if !changed {
            return Ok(());
        }

        self.registry
            .update_node(
                &member.node_id,
                &member.address,
                member.shard_count,
                member.available_disk,
            )
            .await?;
        events::node_updated(&member.node_id, &member.address, member.shard_count);
        metrics::record_membership_change("updated");
        summary.updated.push(member.node_id.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::node::LocalConnector;
    use std::sync::Arc;

    fn report(id: &str, shard_count: u64) -> MemberReport {
        MemberReport {
            node_id: id.to_string(),
            address: format!("{id}:10009"),
            shard_count,
            available_disk: 100,
            primary_id: None,
        }
    }

    fn discovery() -> ClusterDiscovery {
        ClusterDiscovery::new(NodeRegistry::new(Arc::new(LocalConnector::new())))
    }

    async fn listed(discovery: &ClusterDiscovery) -> Vec<String> {
        discovery
            .registry()
            .list_nodes()
            .await
            .into_iter()
            .map(|n| n.info.id)
            .collect()
    }

    #[tokio::test]
    async fn test_reconcile_converges_to_reported_set() {
        let discovery = discovery();
        discovery
            .registry()
            .add_node("stale", "stale:1", 0, 0, None)
            .await
            .unwrap();

        discovery
            .update_members(vec![report("A", 0), report("B", 0), report("C", 0)])
            .await;
        assert_eq!(listed(&discovery).await, vec!["A", "B", "C"]);

        let summary = discovery
            .update_members(vec![report("A", 0), report("C", 0)])
            .await;
        assert_eq!(summary.removed, vec!["B"]);
        assert_eq!(listed(&discovery).await, vec!["A", "C"]);
    }

    #[tokio::test]
    async fn test_known_member_updated_in_place() {
        let discovery = discovery();
        discovery.update_members(vec![report("A", 1)]).await;

        let summary = discovery.update_members(vec![report("A", 1)]).await;
        assert!(summary.is_noop());

        let summary = discovery.update_members(vec![report("A", 9)]).await;
        assert_eq!(summary.updated, vec!["A"]);
        let node = discovery.registry().get_node("A").await.unwrap();
        assert_eq!(node.info.shard_count, 9);
    }

    #[tokio::test]
    async fn test_mass_removal_is_not_fatal() {
        let discovery = discovery();
        discovery
            .update_members(vec![report("A", 0), report("B", 0), report("C", 0)])
            .await;

        let summary = discovery.update_members(vec![]).await;
        assert_eq!(summary.removed.len(), 3);
        assert!(discovery.registry().is_empty().await);
    }

    #[tokio::test]
    async fn test_read_replica_members() {
        let discovery = discovery();
        let mut replica = report("A-r", 0);
        replica.primary_id = Some("A".into());
        discovery
            .update_members(vec![report("A", 0), replica])
            .await;

        assert_eq!(listed(&discovery).await, vec!["A"]);
        assert_eq!(discovery.registry().read_replica_count().await, 1);

        let summary = discovery.update_members(vec![report("A", 0)]).await;
        assert_eq!(summary.removed, vec!["A-r"]);
        assert_eq!(discovery.registry().read_replica_count().await, 0);
    }
}
