//! Standalone shard manager
//!
//! Single-process deployments embed the index node, so resources are written
//! straight into it instead of going through index messages. There is no
//! separate compaction daemon either: every `max_ops_before_checks` writes
//! to a replica, a background task reads the replica's counts, opens a new
//! shard when it is full and asks the node to garbage collect.

use super::manager::KbShardManager;
use super::ShardWriter;
use crate::cluster::RegisteredNode;
use crate::observability::errors;
use crate::policy::{self, NodeOp};
use async_trait::async_trait;
use parking_lot::Mutex;
use shardplane_core::{ClusterError, LogicalShard, Resource, ShardCounter, ShardReplica};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Clone)]
pub struct StandaloneShardManager {
    inner: KbShardManager,
    /// (node id, replica id) -> writes since the last check
    ops: Arc<Mutex<HashMap<(String, String), u64>>>,
    checks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl StandaloneShardManager {
    pub fn new(inner: KbShardManager) -> Self {
        Self {
            inner,
            ops: Arc::new(Mutex::new(HashMap::new())),
            checks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Wait for the background checks spawned so far.
    pub async fn wait_for_checks(&self) {
        let handles: Vec<_> = std::mem::take(&mut *self.checks.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                debug!(error = %e, "Background shard check did not finish");
            }
        }
    }

    async fn node_for(&self, replica: &ShardReplica) -> Result<RegisteredNode, ClusterError> {
        self.inner
            .registry()
            .get_node(&replica.node_id)
            .await
            .ok_or_else(|| {
                ClusterError::NoHealthyNodeAvailable(format!(
                    "embedded node {} is not registered",
                    replica.node_id
                ))
            })
    }

    fn resource_change_event(&self, kbid: &str, node: &RegisteredNode, replica_id: &str) {
        let threshold = self.inner.settings().max_ops_before_checks;
        let due = {
            let mut ops = self.ops.lock();
            let count = ops
                .entry((node.info.id.clone(), replica_id.to_string()))
                .or_insert(0);
            *count += 1;
            if *count >= threshold {
                *count = 0;
                true
            } else {
                false
            }
        };
        if !due {
            return;
        }

        debug!(kbid = %kbid, node_id = %node.id(), replica_id = %replica_id, "Scheduling shard check");
        let manager = self.inner.clone();
        let node = node.clone();
        let kbid = kbid.to_string();
        let replica_id = replica_id.to_string();
        let handle = tokio::spawn(async move {
            let stats = policy::settle(
                NodeOp::GetShard,
                node.id(),
                node.client.get_shard(&replica_id).await,
            );
            if let Ok(Some(stats)) = stats {
                if let Err(e) = manager
                    .maybe_create_new_shard(&kbid, stats.paragraphs, stats.fields)
                    .await
                {
                    errors::capture("maybe_create_new_shard", &kbid, &e);
                }
            }
            let _ = policy::settle(NodeOp::Gc, node.id(), node.client.gc(&replica_id).await);
        });

        let mut checks = self.checks.lock();
        checks.retain(|h| !h.is_finished());
        checks.push(handle);
    }
}

#[async_trait]
impl ShardWriter for StandaloneShardManager {
    fn manager(&self) -> &KbShardManager {
        &self.inner
    }

    /// Counts are collected by the background check, so no counter is
    /// returned.
    async fn add_resource(
        &self,
        shard: &LogicalShard,
        resource: &Resource,
        _txid: i64,
        _partition: Option<&str>,
        kb: &str,
        _reindex_id: Option<&str>,
    ) -> Result<Option<ShardCounter>, ClusterError> {
        for replica in &shard.replicas {
            let node = self.node_for(replica).await?;
            policy::settle(
                NodeOp::SetResource,
                node.id(),
                node.client.set_resource(&replica.id, resource).await,
            )?;
            self.resource_change_event(kb, &node, &replica.id);
        }
        Ok(None)
    }

    async fn delete_resource(
        &self,
        shard: &LogicalShard,
        uuid: &str,
        _txid: i64,
        _partition: Option<&str>,
        kb: &str,
    ) -> Result<(), ClusterError> {
        for replica in &shard.replicas {
            let node = self.node_for(replica).await?;
            policy::settle(
                NodeOp::RemoveResource,
                node.id(),
                node.client.remove_resource(&replica.id, uuid).await,
            )?;
            self.resource_change_event(kb, &node, &replica.id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::node::LocalConnector;
    use crate::cluster::NodeRegistry;
    use crate::config::ClusterSettings;
    use crate::indexing::NodeIndexing;
    use crate::maindb::MemoryDriver;
    use crate::storage::MemoryStorage;
    use shardplane_core::{ReleaseChannel, SemanticModel};

    async fn standalone(settings: ClusterSettings) -> (StandaloneShardManager, Arc<LocalConnector>) {
        let connector = Arc::new(LocalConnector::new());
        let registry = NodeRegistry::new(connector.clone());
        registry
            .add_node("standalone", "localhost", 0, 0, None)
            .await
            .unwrap();
        let manager = KbShardManager::new(
            registry.clone(),
            Arc::new(MemoryDriver::new()),
            Arc::new(MemoryStorage::new()),
            Arc::new(NodeIndexing::new(registry)),
            Arc::new(ClusterSettings {
                node_replicas: 1,
                standalone_mode: true,
                ..settings
            }),
        );

        let mut txn = manager.driver().begin(false).await.unwrap();
        manager
            .create_shard_by_kbid(&mut *txn, "kb", &SemanticModel::default(), ReleaseChannel::Stable)
            .await
            .unwrap();
        txn.commit().await.unwrap();
        (StandaloneShardManager::new(manager), connector)
    }

    #[tokio::test]
    async fn test_writes_go_straight_to_the_node() {
        let (manager, connector) = standalone(ClusterSettings::default()).await;
        let shard = manager.manager().active_shard("kb").await.unwrap();
        let replica = &shard.replicas[0];
        let node = connector.get("standalone").unwrap();

        let counter = manager
            .add_resource(&shard, &Resource::new("r1"), 1, None, "kb", None)
            .await
            .unwrap();
        assert!(counter.is_none());
        assert!(node.has_resource(&replica.id, "r1"));
        assert!(node.indexed_messages().is_empty());

        manager
            .delete_resource(&shard, "r1", 2, None, "kb")
            .await
            .unwrap();
        assert!(!node.has_resource(&replica.id, "r1"));
    }

    #[tokio::test]
    async fn test_gc_after_max_ops() {
        let settings = ClusterSettings {
            max_ops_before_checks: 2,
            ..ClusterSettings::default()
        };
        let (manager, connector) = standalone(settings).await;
        let shard = manager.manager().active_shard("kb").await.unwrap();
        let replica_id = shard.replicas[0].id.clone();
        let node = connector.get("standalone").unwrap();

        manager
            .add_resource(&shard, &Resource::new("r1"), 1, None, "kb", None)
            .await
            .unwrap();
        manager.wait_for_checks().await;
        assert_eq!(node.gc_runs(&replica_id), 0);

        manager
            .add_resource(&shard, &Resource::new("r2"), 2, None, "kb", None)
            .await
            .unwrap();
        manager.wait_for_checks().await;
        assert_eq!(node.gc_runs(&replica_id), 1);
    }

    #[tokio::test]
    async fn test_full_shard_rolls_over_in_background() {
        let settings = ClusterSettings {
            max_ops_before_checks: 1,
            max_shard_fields: 1,
            ..ClusterSettings::default()
        };
        let (manager, _connector) = standalone(settings).await;
        let first = manager.manager().active_shard("kb").await.unwrap();

        let resource = Resource::new("r1")
            .with_field("a", vec![])
            .with_field("b", vec![]);
        manager
            .add_resource(&first, &resource, 1, None, "kb", None)
            .await
            .unwrap();
        manager.wait_for_checks().await;

        let shards = manager.manager().get_shards_by_kbid("kb").await.unwrap();
        assert_eq!(shards.shards.len(), 2);
        assert!(shards.shards[0].read_only);
    }
}
