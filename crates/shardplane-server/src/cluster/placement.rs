//! Replica selection and candidate ordering
//!
//! `choose_node` picks the replica that serves a call for a logical shard.
//! `check_enough_nodes` and `sorted_nodes` prepare the candidate list for
//! shard creation.

use super::registry::{NodeRegistry, RegisteredNode};
use super::rendezvous::RendezvousHash;
use crate::config::{ClusterSettings, PlacementStrategy};
use shardplane_core::{ClusterError, LogicalShard};
use std::collections::BTreeSet;
use tracing::trace;

/// Pick the node and replica id serving `shard`.
///
/// Preferred replica ids in `target_replicas` are honoured in order when
/// their node is registered; otherwise the rendezvous winner among the
/// registered replica nodes is used, keyed by the shard id. With
/// `read_only`, read replicas of those nodes are candidates too.
pub async fn choose_node(
    registry: &NodeRegistry,
    hash_seed: u32,
    shard: &LogicalShard,
    target_replicas: Option<&[String]>,
    read_only: bool,
) -> Result<(RegisteredNode, String), ClusterError> {
    let mut candidates: Vec<(RegisteredNode, String)> = Vec::new();
    for replica in &shard.replicas {
        if let Some(node) = registry.get_primary(&replica.node_id).await {
            candidates.push((node, replica.id.clone()));
        }
        if read_only {
            for node in registry.get_read_replicas(&replica.node_id).await {
                candidates.push((node, replica.id.clone()));
            }
        }
    }

    if candidates.is_empty() {
        return Err(ClusterError::NoHealthyNodeAvailable(format!(
            "no registered node hosts a replica of shard {}",
            shard.shard_id
        )));
    }

    if let Some(targets) = target_replicas {
        for target in targets {
            if let Some(found) = candidates.iter().find(|(_, replica)| replica == target) {
                trace!(shard_id = %shard.shard_id, replica_id = %target, "Using preferred replica");
                return Ok(found.clone());
            }
        }
    }

    let ring = RendezvousHash::with_nodes(hash_seed, candidates.iter().map(|(n, _)| n.info.id.clone()));
    let winner = ring
        .find_node(&shard.shard_id)
        .map(str::to_string)
        .ok_or_else(|| ClusterError::NoHealthyNodeAvailable(shard.shard_id.clone()))?;
    candidates
        .into_iter()
        .find(|(node, _)| node.info.id == winner)
        .ok_or_else(|| ClusterError::NoHealthyNodeAvailable(shard.shard_id.clone()))
}

/// Writable nodes allowed to receive a new replica.
///
/// Fails with `NodeClusterSmall` when fewer than `node_replicas` remain
/// after applying the per-node shard cap.
pub async fn check_enough_nodes(
    registry: &NodeRegistry,
    settings: &ClusterSettings,
) -> Result<Vec<RegisteredNode>, ClusterError> {
    let nodes = registry.list_nodes().await;
    let required = settings.node_replicas;
    if nodes.len() < required {
        return Err(ClusterError::NodeClusterSmall(format!(
            "not enough nodes: total {}, required {required}",
            nodes.len()
        )));
    }

    let available: Vec<_> = match settings.max_node_replicas {
        Some(cap) => nodes
            .into_iter()
            .filter(|n| n.info.shard_count < cap)
            .collect(),
        None => nodes,
    };
    if available.len() < required {
        return Err(ClusterError::NodeClusterSmall(format!(
            "not enough nodes with room for shards: available {}, required {required}",
            available.len()
        )));
    }
    Ok(available)
}

/// Order candidates per `strategy`; nodes in `avoid` go to the tail.
///
/// Ties are broken by node id so the order is deterministic.
pub fn sorted_nodes(
    mut nodes: Vec<RegisteredNode>,
    strategy: PlacementStrategy,
    avoid: &BTreeSet<String>,
) -> Vec<RegisteredNode> {
    nodes.sort_by(|a, b| {
        let by_strategy = match strategy {
            PlacementStrategy::MostAvailableDisk => {
                b.info.available_disk.cmp(&a.info.available_disk)
            }
            PlacementStrategy::LeastShards => a.info.shard_count.cmp(&b.info.shard_count),
        };
        by_strategy.then_with(|| a.info.id.cmp(&b.info.id))
    });

    let (preferred, avoided): (Vec<_>, Vec<_>) =
        nodes.into_iter().partition(|n| !avoid.contains(&n.info.id));
    preferred.into_iter().chain(avoided).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::node::LocalConnector;
    use shardplane_core::ShardReplica;
    use std::sync::Arc;

    fn shard() -> LogicalShard {
        LogicalShard {
            shard_id: "shard-1".into(),
            kbid: "kb".into(),
            replicas: vec![
                ShardReplica {
                    id: "r0".into(),
                    node_id: "n0".into(),
                },
                ShardReplica {
                    id: "r1".into(),
                    node_id: "n1".into(),
                },
            ],
            read_only: false,
        }
    }

    async fn registry_with(ids: &[&str]) -> NodeRegistry {
        let registry = NodeRegistry::new(Arc::new(LocalConnector::new()));
        for id in ids {
            registry
                .add_node(id, &format!("{id}:1"), 0, 0, None)
                .await
                .unwrap();
        }
        registry
    }

    #[tokio::test]
    async fn test_target_preference_is_best_effort() {
        let registry = registry_with(&["n0", "n1"]).await;
        let target = vec!["r0".to_string()];

        let (node, replica) = choose_node(&registry, 0, &shard(), Some(&target), false)
            .await
            .unwrap();
        assert_eq!((node.info.id.as_str(), replica.as_str()), ("n0", "r0"));

        registry.remove_node("n0", None).await.unwrap();
        let (node, replica) = choose_node(&registry, 0, &shard(), Some(&target), false)
            .await
            .unwrap();
        assert_eq!((node.info.id.as_str(), replica.as_str()), ("n1", "r1"));
    }

    #[tokio::test]
    async fn test_no_registered_replica_is_no_healthy_node() {
        let registry = registry_with(&["other"]).await;
        let result = choose_node(&registry, 0, &shard(), None, false).await;
        assert!(matches!(result, Err(ClusterError::NoHealthyNodeAvailable(_))));
    }

    #[tokio::test]
    async fn test_choice_without_target_is_deterministic() {
        let registry = registry_with(&["n0", "n1"]).await;
        let (first, _) = choose_node(&registry, 0, &shard(), None, false).await.unwrap();
        for _ in 0..10 {
            let (again, _) = choose_node(&registry, 0, &shard(), None, false).await.unwrap();
            assert_eq!(first.info.id, again.info.id);
        }
    }

    #[tokio::test]
    async fn test_read_only_uses_read_replicas() {
        let registry = registry_with(&[]).await;
        registry
            .add_node("n0-r", "n0r:1", 0, 0, Some("n0"))
            .await
            .unwrap();

        assert!(choose_node(&registry, 0, &shard(), None, false).await.is_err());
        let (node, replica) = choose_node(&registry, 0, &shard(), None, true).await.unwrap();
        assert_eq!(node.info.id, "n0-r");
        assert_eq!(replica, "r0");
    }

    #[tokio::test]
    async fn test_check_enough_nodes() {
        let registry = registry_with(&["n0"]).await;
        let settings = ClusterSettings::default();
        assert!(matches!(
            check_enough_nodes(&registry, &settings).await,
            Err(ClusterError::NodeClusterSmall(_))
        ));

        registry.add_node("n1", "n1:1", 10, 0, None).await.unwrap();
        assert_eq!(check_enough_nodes(&registry, &settings).await.unwrap().len(), 2);

        let capped = ClusterSettings {
            max_node_replicas: Some(5),
            ..ClusterSettings::default()
        };
        assert!(check_enough_nodes(&registry, &capped).await.is_err());
    }

    #[tokio::test]
    async fn test_sorted_nodes_strategies() {
        let registry = NodeRegistry::new(Arc::new(LocalConnector::new()));
        registry.add_node("a", "a:1", 5, 100, None).await.unwrap();
        registry.add_node("b", "b:1", 1, 300, None).await.unwrap();
        registry.add_node("c", "c:1", 3, 200, None).await.unwrap();
        let nodes = registry.list_nodes().await;
        let ids = |v: Vec<RegisteredNode>| v.into_iter().map(|n| n.info.id).collect::<Vec<_>>();

        let none = BTreeSet::new();
        assert_eq!(
            ids(sorted_nodes(nodes.clone(), PlacementStrategy::LeastShards, &none)),
            vec!["b", "c", "a"]
        );
        assert_eq!(
            ids(sorted_nodes(nodes.clone(), PlacementStrategy::MostAvailableDisk, &none)),
            vec!["b", "c", "a"]
        );

        let avoid: BTreeSet<String> = ["b".to_string()].into();
        assert_eq!(
            ids(sorted_nodes(nodes, PlacementStrategy::LeastShards, &avoid)),
            vec!["c", "a", "b"]
        );
    }
}
