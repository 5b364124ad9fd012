//! Knowledge box lifecycle
//!
//! Creation writes the config and the first shard in one transaction.
//! Deletion only removes the config and records a [`KbDeletion`] intent;
//! the heavy lifting happens later in [`KnowledgeBox::purge`], driven by
//! the purge job.

use crate::maindb::{get_json, set_json};
use crate::observability::{errors, metrics};
use crate::policy::{self, NodeOp};
use crate::shards::KbShardManager;
use shardplane_core::{
    keys, ClusterError, KbDeletion, KnowledgeBoxConfig, LogicalShard, ReleaseChannel,
    SemanticModel, ShardSet,
};
use tracing::{debug, error, info, warn};

/// Keys deleted per transaction when wiping a knowledge box
const KEY_DELETE_CHUNK: usize = 1_000;

#[derive(Clone)]
pub struct KnowledgeBox {
    manager: KbShardManager,
}

impl KnowledgeBox {
    pub fn new(manager: KbShardManager) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &KbShardManager {
        &self.manager
    }

    pub async fn get_config(&self, kbid: &str) -> Result<Option<KnowledgeBoxConfig>, ClusterError> {
        let mut txn = self.manager.driver().begin(true).await?;
        let config = get_json(&mut *txn, &keys::kb_config(kbid)).await;
        txn.abort().await?;
        config
    }

    /// Store the config of a new knowledge box and open its first shard.
    pub async fn create(
        &self,
        kbid: &str,
        slug: &str,
        semantic_model: SemanticModel,
        release_channel: ReleaseChannel,
    ) -> Result<LogicalShard, ClusterError> {
        let mut txn = self.manager.driver().begin(false).await?;
        let key = keys::kb_config(kbid);
        if txn.get(&key).await?.is_some() {
            txn.abort().await?;
            return Err(ClusterError::KnowledgeBoxConflict(kbid.to_string()));
        }

        let config = KnowledgeBoxConfig {
            kbid: kbid.to_string(),
            slug: slug.to_string(),
            release_channel,
            semantic_model,
        };
        set_json(&mut *txn, &key, &config).await?;

        let shard = self
            .manager
            .create_shard_by_kbid(
                &mut *txn,
                kbid,
                &config.semantic_model,
                config.release_channel,
            )
            .await?;

        if let Err(e) = txn.commit().await {
            self.manager.rollback_shard(&shard).await;
            return Err(e.into());
        }
        self.manager.cache().invalidate(kbid);
        info!(kbid = %kbid, slug = %slug, shard_id = %shard.shard_id, "Knowledge box created");
        Ok(shard)
    }

    /// Drop the config and record the deletion intent.
    ///
    /// Replicas are asked to go right away, best-effort. Whatever survives
    /// is handled by the purge job and the orphan sweep.
    pub async fn delete(&self, kbid: &str) -> Result<(), ClusterError> {
        let mut txn = self.manager.driver().begin(false).await?;
        let config_key = keys::kb_config(kbid);
        if txn.get(&config_key).await?.is_none() {
            txn.abort().await?;
            return Err(ClusterError::not_found("knowledge box", kbid));
        }
        let shards = get_json::<ShardSet>(&mut *txn, &keys::kb_shards(kbid)).await?;

        txn.delete(&config_key).await?;
        set_json(&mut *txn, &keys::kb_deletion(kbid), &KbDeletion::new(kbid)).await?;
        txn.commit().await?;
        self.manager.cache().invalidate(kbid);
        info!(kbid = %kbid, "Knowledge box deleted, purge pending");

        let Some(shards) = shards else {
            warn!(kbid = %kbid, "Shards not found for knowledge box while deleting it");
            return Ok(());
        };
        for shard in &shards.shards {
            for replica in &shard.replicas {
                let Some(node) = self.manager.registry().get_node(&replica.node_id).await else {
                    continue;
                };
                if let Err(e) = node.client.delete_shard(&replica.id).await {
                    metrics::record_node_operation(NodeOp::DeleteKbShard.as_str(), "error");
                    errors::capture(NodeOp::DeleteKbShard.as_str(), node.id(), &e);
                }
            }
        }
        Ok(())
    }

    /// Delete every replica of the knowledge box, then all of its metadata.
    ///
    /// A replica the node no longer knows is treated as deleted. A replica
    /// on a node that is not registered is left for the orphan sweep. Any
    /// other node failure aborts the purge with `ShardNotFound` and keeps
    /// the metadata so the next run can retry.
    pub async fn purge(&self, kbid: &str) -> Result<(), ClusterError> {
        for key in [keys::kb_shards(kbid), keys::kb_rollover_shards(kbid)] {
            let mut txn = self.manager.driver().begin(true).await?;
            let shards = get_json::<ShardSet>(&mut *txn, &key).await;
            txn.abort().await?;

            match shards? {
                Some(shards) => self.purge_replicas(&shards).await?,
                None if key == keys::kb_shards(kbid) => {
                    warn!(kbid = %kbid, "Shards not found for knowledge box while purging it");
                }
                None => {}
            }
        }

        let deleted = self.delete_all_kb_keys(kbid).await?;
        self.manager.cache().invalidate(kbid);
        debug!(kbid = %kbid, keys = deleted, "Knowledge box metadata deleted");
        Ok(())
    }

    async fn purge_replicas(&self, shards: &ShardSet) -> Result<(), ClusterError> {
        for shard in &shards.shards {
            for replica in &shard.replicas {
                let Some(node) = self.manager.registry().get_node(&replica.node_id).await else {
                    error!(
                        kbid = %shards.kbid,
                        node_id = %replica.node_id,
                        replica_id = %replica.id,
                        "No node found, replica may stay orphaned"
                    );
                    continue;
                };
                match node.client.delete_shard(&replica.id).await {
                    Err(ClusterError::ShardNotFound(_)) => {
                        debug!(node_id = %node.id(), replica_id = %replica.id, "Replica already gone");
                    }
                    result => {
                        policy::settle(NodeOp::PurgeShard, node.id(), result).map_err(|e| {
                            ClusterError::ShardNotFound(format!("{e} @ {}", node.info.address))
                        })?;
                        debug!(
                            kbid = %shards.kbid,
                            node_id = %node.id(),
                            replica_id = %replica.id,
                            "Replica deleted"
                        );
                    }
                }
            }
        }
        Ok(())
    }

    /// Delete every key under `/kbs/{kbid}/`, committing in chunks.
    pub async fn delete_all_kb_keys(&self, kbid: &str) -> Result<usize, ClusterError> {
        let prefix = keys::kb_keys(kbid);
        let mut deleted = 0;
        loop {
            let mut txn = self.manager.driver().begin(true).await?;
            let all_keys = txn.keys(&prefix, None, true).await;
            txn.abort().await?;
            let all_keys = all_keys?;
            if all_keys.is_empty() {
                break;
            }

            for chunk in all_keys.chunks(KEY_DELETE_CHUNK) {
                let mut txn = self.manager.driver().begin(false).await?;
                for key in chunk {
                    txn.delete(key).await?;
                }
                txn.commit().await?;
                deleted += chunk.len();
            }
        }
        Ok(deleted)
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
    use shardplane_core::{DeletionState, Driver};
    use std::sync::Arc;

    async fn fixture(nodes: &[&str]) -> (KnowledgeBox, Arc<LocalConnector>) {
        let connector = Arc::new(LocalConnector::new());
        let registry = NodeRegistry::new(connector.clone());
        for id in nodes {
            registry
                .add_node(id, &format!("{id}:10009"), 0, 0, None)
                .await
                .unwrap();
        }
        let manager = KbShardManager::new(
            registry.clone(),
            Arc::new(MemoryDriver::new()),
            Arc::new(MemoryStorage::new()),
            Arc::new(NodeIndexing::new(registry)),
            Arc::new(ClusterSettings::default()),
        );
        (KnowledgeBox::new(manager), connector)
    }

    async fn create(kb: &KnowledgeBox, kbid: &str) -> LogicalShard {
        kb.create(kbid, "my-kb", SemanticModel::default(), ReleaseChannel::Stable)
            .await
            .unwrap()
    }

    async fn deletion(driver: &Arc<dyn Driver>, kbid: &str) -> Option<KbDeletion> {
        let mut txn = driver.begin(true).await.unwrap();
        get_json(&mut *txn, &keys::kb_deletion(kbid)).await.unwrap()
    }

    #[tokio::test]
    async fn test_create_writes_config_and_first_shard() {
        let (kb, _) = fixture(&["n0", "n1"]).await;
        let shard = create(&kb, "kb1").await;

        assert_eq!(shard.replicas.len(), 2);
        let config = kb.get_config("kb1").await.unwrap().unwrap();
        assert_eq!(config.slug, "my-kb");
        let active = kb.manager().active_shard("kb1").await.unwrap();
        assert_eq!(active.shard_id, shard.shard_id);
    }

    #[tokio::test]
    async fn test_create_twice_conflicts() {
        let (kb, connector) = fixture(&["n0", "n1"]).await;
        create(&kb, "kb1").await;

        let err = kb
            .create("kb1", "other", SemanticModel::default(), ReleaseChannel::Stable)
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::KnowledgeBoxConflict(_)));
        assert_eq!(connector.get("n0").unwrap().shard_ids().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_create_leaves_nothing() {
        let (kb, _) = fixture(&["n0"]).await;
        let err = kb
            .create("kb1", "my-kb", SemanticModel::default(), ReleaseChannel::Stable)
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::NodeClusterSmall(_)));
        assert!(kb.get_config("kb1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_records_intent_and_drops_replicas() {
        let (kb, connector) = fixture(&["n0", "n1"]).await;
        create(&kb, "kb1").await;

        kb.delete("kb1").await.unwrap();

        assert!(kb.get_config("kb1").await.unwrap().is_none());
        let record = deletion(kb.manager().driver(), "kb1").await.unwrap();
        assert_eq!(record.state, DeletionState::PendingMetadataPurge);
        assert!(connector.get("n0").unwrap().shard_ids().is_empty());
        assert!(connector.get("n1").unwrap().shard_ids().is_empty());
    }

    #[tokio::test]
    async fn test_delete_unknown_kb() {
        let (kb, _) = fixture(&["n0", "n1"]).await;
        let err = kb.delete("missing").await.unwrap_err();
        assert!(matches!(err, ClusterError::NotFound { kind: "knowledge box", .. }));
    }

    #[tokio::test]
    async fn test_delete_with_unreachable_node_still_records_intent() {
        let (kb, connector) = fixture(&["n0", "n1"]).await;
        create(&kb, "kb1").await;
        connector.get("n1").unwrap().set_unreachable(true);

        kb.delete("kb1").await.unwrap();

        assert!(deletion(kb.manager().driver(), "kb1").await.is_some());
        assert!(connector.get("n0").unwrap().shard_ids().is_empty());
        assert_eq!(connector.get("n1").unwrap().shard_ids().len(), 1);
    }

    #[tokio::test]
    async fn test_purge_removes_replicas_and_keys() {
        let (kb, connector) = fixture(&["n0", "n1"]).await;
        create(&kb, "kb1").await;

        kb.purge("kb1").await.unwrap();

        assert!(connector.get("n0").unwrap().shard_ids().is_empty());
        assert!(connector.get("n1").unwrap().shard_ids().is_empty());
        let mut txn = kb.manager().driver().begin(true).await.unwrap();
        let left = txn.keys(&keys::kb_keys("kb1"), None, true).await.unwrap();
        assert!(left.is_empty());
        assert!(matches!(
            kb.manager().get_shards_by_kbid("kb1").await,
            Err(ClusterError::ShardsNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_purge_after_delete_ignores_missing_replicas() {
        let (kb, _) = fixture(&["n0", "n1"]).await;
        create(&kb, "kb1").await;
        kb.delete("kb1").await.unwrap();

        kb.purge("kb1").await.unwrap();
    }

    #[tokio::test]
    async fn test_purge_with_unreachable_node_keeps_metadata() {
        let (kb, connector) = fixture(&["n0", "n1"]).await;
        create(&kb, "kb1").await;
        connector.get("n1").unwrap().set_unreachable(true);

        let err = kb.purge("kb1").await.unwrap_err();
        assert!(matches!(err, ClusterError::ShardNotFound(_)));
        assert!(kb.manager().get_shards_by_kbid("kb1").await.is_ok());
    }

    #[tokio::test]
    async fn test_purge_skips_unregistered_node() {
        let (kb, connector) = fixture(&["n0", "n1"]).await;
        create(&kb, "kb1").await;
        kb.manager().registry().remove_node("n1", None).await.unwrap();

        kb.purge("kb1").await.unwrap();

        assert!(connector.get("n0").unwrap().shard_ids().is_empty());
        assert_eq!(connector.get("n1").unwrap().shard_ids().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_all_kb_keys_in_chunks() {
        let (kb, _) = fixture(&["n0", "n1"]).await;
        let driver = kb.manager().driver().clone();
        let mut txn = driver.begin(false).await.unwrap();
        for i in 0..(KEY_DELETE_CHUNK + 5) {
            txn.set(&format!("/kbs/kb1/r/{i:05}"), vec![1]).await.unwrap();
        }
        txn.set("/kbs/kb10/config", vec![1]).await.unwrap();
        txn.commit().await.unwrap();

        let deleted = kb.delete_all_kb_keys("kb1").await.unwrap();

        assert_eq!(deleted, KEY_DELETE_CHUNK + 5);
        let mut txn = driver.begin(true).await.unwrap();
        assert!(txn.get("/kbs/kb10/config").await.unwrap().is_some());
    }
}
