//! Knowledge box shard manager
//!
//! Owns the write path of the clustered deployment:
//! - shard creation with replica placement and rollback
//! - active shard lookup through the bounded shard set cache
//! - index and delete dispatch to every replica of a shard
//! - best-effort maintenance broadcasts over all replicas of a knowledge box

use super::cache::ShardCache;
use super::ShardWriter;
use crate::cluster::placement::{self, check_enough_nodes, sorted_nodes};
use crate::cluster::{NodeRegistry, RegisteredNode};
use crate::config::ClusterSettings;
use crate::indexing::IndexingDispatcher;
use crate::maindb::{get_json, set_json};
use crate::observability::{errors, events, metrics};
use crate::policy::{self, NodeOp};
use async_trait::async_trait;
use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use shardplane_core::{
    keys, new_id, ClusterError, Driver, IndexMessage, LogicalShard, ReleaseChannel, Resource,
    SemanticModel, ShardCounter, ShardReplica, ShardSet, Storage, Transaction, VectorSetConfig,
};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// A replica call that completed successfully
#[derive(Debug, Clone)]
pub struct ReplicaOutcome<T> {
    pub node_id: String,
    pub replica_id: String,
    pub value: T,
}

/// Result of a broadcast over every replica of a knowledge box
#[derive(Debug, Clone)]
pub struct Fanout<T> {
    pub succeeded: Vec<ReplicaOutcome<T>>,
    /// Replica ids whose call failed, timed out or had no registered node
    pub failed: Vec<String>,
    /// Set when at least one replica did not answer successfully
    pub incomplete: bool,
}

impl<T> Default for Fanout<T> {
    fn default() -> Self {
        Self {
            succeeded: Vec::new(),
            failed: Vec::new(),
            incomplete: false,
        }
    }
}

#[derive(Clone)]
pub struct KbShardManager {
    registry: NodeRegistry,
    driver: Arc<dyn Driver>,
    storage: Arc<dyn Storage>,
    indexing: Arc<dyn IndexingDispatcher>,
    settings: Arc<ClusterSettings>,
    cache: Arc<ShardCache>,
}

impl KbShardManager {
    pub fn new(
        registry: NodeRegistry,
        driver: Arc<dyn Driver>,
        storage: Arc<dyn Storage>,
        indexing: Arc<dyn IndexingDispatcher>,
        settings: Arc<ClusterSettings>,
    ) -> Self {
        let cache = Arc::new(ShardCache::new(settings.shard_cache_capacity));
        Self {
            registry,
            driver,
            storage,
            indexing,
            settings,
            cache,
        }
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn settings(&self) -> &ClusterSettings {
        &self.settings
    }

    pub fn cache(&self) -> &ShardCache {
        &self.cache
    }

    /// True when either count is over its configured maximum.
    pub fn should_create_new_shard(&self, num_paragraphs: u64, num_fields: u64) -> bool {
        num_paragraphs > self.settings.max_shard_paragraphs
            || num_fields > self.settings.max_shard_fields
    }

    /// Shard set of a knowledge box, served from the cache when possible.
    pub async fn get_shards_by_kbid(&self, kbid: &str) -> Result<ShardSet, ClusterError> {
        if let Some(cached) = self.cache.get(kbid) {
            return Ok(cached);
        }

        let mut txn = self.driver.begin(true).await?;
        let shards = get_json::<ShardSet>(&mut *txn, &keys::kb_shards(kbid)).await;
        txn.abort().await?;

        let shards = shards?.ok_or_else(|| ClusterError::ShardsNotFound(kbid.to_string()))?;
        self.cache.put(shards.clone());
        Ok(shards)
    }

    /// The shard currently receiving writes for `kbid`.
    pub async fn active_shard(&self, kbid: &str) -> Result<LogicalShard, ClusterError> {
        self.get_shards_by_kbid(kbid)
            .await?
            .active()
            .cloned()
            .ok_or_else(|| ClusterError::ShardsNotFound(kbid.to_string()))
    }

    pub async fn get_current_active_shard(
        &self,
        txn: &mut dyn Transaction,
        kbid: &str,
    ) -> Result<Option<LogicalShard>, ClusterError> {
        let shards = get_json::<ShardSet>(txn, &keys::kb_shards(kbid)).await?;
        Ok(shards.and_then(|s| s.active().cloned()))
    }

    /// Create a new logical shard for `kbid` and persist it in `txn`.
    ///
    /// Candidates are tried in placement order until `node_replicas` of them
    /// accepted a replica. A node refusing is skipped; running out of
    /// candidates undoes the replicas created so far and fails with
    /// `ExhaustedNodes`.
    ///
    /// The caller commits `txn` and only then invalidates the cached shard
    /// set, otherwise a reader in between caches the pre-commit set again.
    pub async fn create_shard_by_kbid(
        &self,
        txn: &mut dyn Transaction,
        kbid: &str,
        semantic_model: &SemanticModel,
        release_channel: ReleaseChannel,
    ) -> Result<LogicalShard, ClusterError> {
        let key = keys::kb_shards(kbid);
        let mut kb_shards = match get_json::<ShardSet>(txn, &key).await? {
            Some(existing) => existing,
            None => {
                debug!(kbid = %kbid, "No shards yet for knowledge box");
                let mut fresh = ShardSet::new(kbid);
                fresh.release_channel = release_channel;
                fresh.semantic_model = Some(semantic_model.clone());
                fresh
            }
        };

        let nodes = check_enough_nodes(&self.registry, &self.settings).await?;
        let candidates = sorted_nodes(
            nodes,
            self.settings.placement_strategy,
            &kb_shards.node_ids(),
        );

        let mut shard = LogicalShard {
            shard_id: new_id(),
            kbid: kbid.to_string(),
            replicas: Vec::with_capacity(self.settings.node_replicas),
            read_only: false,
        };
        let mut candidates = candidates.into_iter();
        let mut attempts = 0;

        while shard.replicas.len() < self.settings.node_replicas {
            let Some(node) = candidates.next() else {
                warn!(
                    kbid = %kbid,
                    shard_id = %shard.shard_id,
                    attempts = attempts,
                    created = shard.replicas.len(),
                    "No node left to place a replica on"
                );
                self.rollback_shard(&shard).await;
                return Err(ClusterError::ExhaustedNodes { attempts });
            };

            attempts += 1;
            let result = node
                .client
                .new_shard(kbid, release_channel, semantic_model)
                .await;
            match policy::settle(NodeOp::NewShard, node.id(), result) {
                Ok(Some(replica_id)) => {
                    debug!(node_id = %node.id(), replica_id = %replica_id, "Replica created");
                    shard.replicas.push(ShardReplica {
                        id: replica_id,
                        node_id: node.info.id.clone(),
                    });
                }
                Ok(None) => {}
                Err(e) => errors::capture(NodeOp::NewShard.as_str(), node.id(), &e),
            }
        }

        kb_shards.push_shard(shard.clone());
        if let Err(e) = set_json(txn, &key, &kb_shards).await {
            self.rollback_shard(&shard).await;
            return Err(e);
        }

        let node_ids: Vec<String> = shard.replicas.iter().map(|r| r.node_id.clone()).collect();
        metrics::record_shard_created();
        events::shard_created(kbid, &shard.shard_id, &node_ids);
        Ok(shard)
    }

    /// Best-effort deletion of every replica of a shard that never made it
    /// into committed metadata.
    pub async fn rollback_shard(&self, shard: &LogicalShard) {
        if shard.replicas.is_empty() {
            return;
        }
        for replica in &shard.replicas {
            let Some(node) = self.registry.get_node(&replica.node_id).await else {
                warn!(
                    node_id = %replica.node_id,
                    replica_id = %replica.id,
                    "Node gone, replica left for the orphan sweep"
                );
                continue;
            };
            if let Err(e) = node.client.delete_shard(&replica.id).await {
                metrics::record_node_operation(NodeOp::RollbackShard.as_str(), "error");
                errors::capture(NodeOp::RollbackShard.as_str(), &replica.node_id, &e);
            }
        }
        events::shard_rollback(&shard.kbid, &shard.shard_id, shard.replicas.len());
    }

    /// Open a new shard in its own transaction when the counts call for it.
    pub async fn maybe_create_new_shard(
        &self,
        kbid: &str,
        num_paragraphs: u64,
        num_fields: u64,
    ) -> Result<Option<LogicalShard>, ClusterError> {
        if !self.should_create_new_shard(num_paragraphs, num_fields) {
            return Ok(None);
        }
        info!(
            kbid = %kbid,
            paragraphs = num_paragraphs,
            fields = num_fields,
            "Active shard is full, creating a new one"
        );

        let mut txn = self.driver.begin(false).await?;
        let current = get_json::<ShardSet>(&mut *txn, &keys::kb_shards(kbid))
            .await?
            .ok_or_else(|| ClusterError::ShardsNotFound(kbid.to_string()))?;
        let model = current.semantic_model.clone().unwrap_or_default();
        let shard = self
            .create_shard_by_kbid(&mut *txn, kbid, &model, current.release_channel)
            .await?;

        if let Err(e) = txn.commit().await {
            self.rollback_shard(&shard).await;
            return Err(e.into());
        }
        self.cache.invalidate(kbid);
        Ok(Some(shard))
    }

    /// Run `f` against every replica of every shard of `kbid` concurrently.
    ///
    /// Failures never abort sibling calls. Calls still running when
    /// `timeout` elapses are cancelled and counted as failed.
    pub async fn apply_for_all_shards<T, F, Fut>(
        &self,
        kbid: &str,
        op: NodeOp,
        timeout: Duration,
        f: F,
    ) -> Result<Fanout<T>, ClusterError>
    where
        F: Fn(RegisteredNode, String) -> Fut,
        Fut: Future<Output = Result<T, ClusterError>>,
    {
        let shards = self.get_shards_by_kbid(kbid).await?;
        let mut fanout = Fanout::default();
        let mut outstanding = BTreeSet::new();
        let mut pending = FuturesUnordered::new();

        for shard in &shards.shards {
            for replica in &shard.replicas {
                let Some(node) = self.registry.get_node(&replica.node_id).await else {
                    let err = ClusterError::NoHealthyNodeAvailable(format!(
                        "node {} is not registered",
                        replica.node_id
                    ));
                    errors::capture(op.as_str(), &replica.node_id, &err);
                    fanout.failed.push(replica.id.clone());
                    continue;
                };
                outstanding.insert(replica.id.clone());
                let node_id = replica.node_id.clone();
                let replica_id = replica.id.clone();
                let call = f(node, replica_id.clone());
                pending.push(async move { (node_id, replica_id, call.await) });
            }
        }

        let deadline = Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, pending.next()).await {
                Ok(Some((node_id, replica_id, result))) => {
                    outstanding.remove(&replica_id);
                    match policy::settle(op, &node_id, result) {
                        Ok(Some(value)) => fanout.succeeded.push(ReplicaOutcome {
                            node_id,
                            replica_id,
                            value,
                        }),
                        Ok(None) => fanout.failed.push(replica_id),
                        Err(e) => {
                            errors::capture(op.as_str(), &node_id, &e);
                            fanout.failed.push(replica_id);
                        }
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        kbid = %kbid,
                        op = op.as_str(),
                        pending = outstanding.len(),
                        timeout = ?timeout,
                        "Fan-out timed out, keeping partial results"
                    );
                    fanout.failed.extend(std::mem::take(&mut outstanding));
                    break;
                }
            }
        }

        fanout.incomplete = !fanout.failed.is_empty();
        Ok(fanout)
    }

    pub async fn clean_and_upgrade(&self, kbid: &str) -> Result<Fanout<()>, ClusterError> {
        self.apply_for_all_shards(
            kbid,
            NodeOp::CleanAndUpgrade,
            self.settings.fanout_timeout,
            |node, replica_id| async move { node.client.clean_and_upgrade_shard(&replica_id).await },
        )
        .await
    }

    /// Add a vectorset to every replica, using the similarity of the
    /// knowledge box's semantic model.
    pub async fn create_vectorset(
        &self,
        kbid: &str,
        vectorset_id: &str,
        dimension: u32,
    ) -> Result<Fanout<()>, ClusterError> {
        let shards = self.get_shards_by_kbid(kbid).await?;
        let config = VectorSetConfig {
            vectorset_id: vectorset_id.to_string(),
            dimension,
            similarity: shards
                .semantic_model
                .map(|m| m.similarity)
                .unwrap_or_default(),
        };
        let config = &config;
        self.apply_for_all_shards(
            kbid,
            NodeOp::AddVectorSet,
            self.settings.fanout_timeout,
            |node, replica_id| async move { node.client.add_vectorset(&replica_id, config).await },
        )
        .await
    }

    pub async fn delete_vectorset(
        &self,
        kbid: &str,
        vectorset_id: &str,
    ) -> Result<Fanout<()>, ClusterError> {
        self.apply_for_all_shards(
            kbid,
            NodeOp::RemoveVectorSet,
            self.settings.fanout_timeout,
            |node, replica_id| async move {
                node.client.remove_vectorset(&replica_id, vectorset_id).await
            },
        )
        .await
    }

    /// Vectorsets present on at least one replica.
    pub async fn list_vectorsets(&self, kbid: &str) -> Result<BTreeSet<String>, ClusterError> {
        let fanout = self
            .apply_for_all_shards(
                kbid,
                NodeOp::ListVectorSets,
                self.settings.fanout_timeout,
                |node, replica_id| async move { node.client.list_vectorsets(&replica_id).await },
            )
            .await?;
        Ok(fanout
            .succeeded
            .into_iter()
            .flat_map(|outcome| outcome.value)
            .collect())
    }

    async fn index_message(
        &self,
        resource: &Resource,
        txid: i64,
        partition: Option<&str>,
        kb: &str,
        shard_id: &str,
        reindex_id: Option<&str>,
    ) -> Result<IndexMessage, ClusterError> {
        let reindex_id = reindex_id
            .map(str::to_string)
            .or_else(|| (txid == -1).then(new_id));
        let message = match reindex_id.as_deref() {
            Some(reindex_id) => {
                self.storage
                    .reindexing(resource, reindex_id, partition, kb, shard_id)
                    .await?
            }
            None => {
                self.storage
                    .indexing(resource, txid, partition, kb, shard_id)
                    .await?
            }
        };
        Ok(message)
    }
}

#[async_trait]
impl ShardWriter for KbShardManager {
    fn manager(&self) -> &KbShardManager {
        self
    }

    /// Dispatches to all replicas concurrently. The replica picked by
    /// `choose_node` also reports its counts once it has the message; a
    /// failing count only costs the counter.
    async fn add_resource(
        &self,
        shard: &LogicalShard,
        resource: &Resource,
        txid: i64,
        partition: Option<&str>,
        kb: &str,
        reindex_id: Option<&str>,
    ) -> Result<Option<ShardCounter>, ClusterError> {
        let message = self
            .index_message(resource, txid, partition, kb, &shard.shard_id, reindex_id)
            .await?;

        let counter_target =
            match placement::choose_node(&self.registry, self.settings.hash_seed, shard, None, false)
                .await
            {
                Ok(target) => Some(target),
                Err(e) => {
                    errors::capture(NodeOp::GetCount.as_str(), &shard.shard_id, &e);
                    None
                }
            };

        let calls = shard.replicas.iter().map(|replica| {
            let message = message.for_replica(&replica.node_id, &replica.id);
            let count_on = counter_target
                .as_ref()
                .filter(|(node, replica_id)| {
                    node.info.id == replica.node_id && *replica_id == replica.id
                })
                .map(|(node, _)| node.clone());
            async move {
                let dispatched = self.indexing.dispatch(message).await;
                let count = match (&dispatched, count_on) {
                    (Ok(()), Some(node)) => Some(node.client.get_count(&replica.id).await),
                    _ => None,
                };
                (replica, dispatched, count)
            }
        });

        let mut counter = None;
        let mut first_error = None;
        for (replica, dispatched, count) in join_all(calls).await {
            if let Err(e) = policy::settle(NodeOp::Index, &replica.node_id, dispatched) {
                warn!(
                    kbid = %kb,
                    node_id = %replica.node_id,
                    replica_id = %replica.id,
                    error = %e,
                    "Index dispatch failed"
                );
                first_error.get_or_insert(e);
            }
            if let Some(count) = count {
                if let Ok(Some(count)) = policy::settle(NodeOp::GetCount, &replica.node_id, count) {
                    counter = Some(ShardCounter {
                        shard: shard.shard_id.clone(),
                        fields: count.fields,
                        paragraphs: count.paragraphs,
                    });
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(counter),
        }
    }

    async fn delete_resource(
        &self,
        shard: &LogicalShard,
        uuid: &str,
        txid: i64,
        partition: Option<&str>,
        kb: &str,
    ) -> Result<(), ClusterError> {
        let message = IndexMessage::deletion(uuid, txid, partition, kb);
        let calls = shard.replicas.iter().map(|replica| {
            let message = message.for_replica(&replica.node_id, &replica.id);
            async move { (replica, self.indexing.dispatch(message).await) }
        });
        let results = join_all(calls).await;

        let cleanup = self
            .storage
            .delete_indexing(uuid, txid, kb, &shard.shard_id)
            .await;

        let mut first_error = None;
        for (replica, result) in results {
            if let Err(e) = policy::settle(NodeOp::Index, &replica.node_id, result) {
                first_error.get_or_insert(e);
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }
        cleanup?;
        Ok(())
    }
}
