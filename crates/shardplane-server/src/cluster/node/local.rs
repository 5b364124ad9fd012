//! In-process index node
//!
//! Backs standalone deployments where the index runs inside this process,
//! and doubles as the node fixture for tests. It keeps per-replica resource
//! bookkeeping only: enough for counts, listings, vectorsets and GC.

use super::{NodeClient, NodeConnector};
use async_trait::async_trait;
use parking_lot::Mutex;
use shardplane_core::{
    new_id, ClusterError, Counter, IndexMessage, NodeMetadata, ReleaseChannel, Resource,
    SemanticModel, ShardStats, Storage, TypeMessage, VectorSetConfig,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Default)]
struct LocalShard {
    kbid: String,
    /// uuid -> (fields, paragraphs)
    resources: HashMap<String, (u64, u64)>,
    vectorsets: BTreeSet<String>,
    /// Deletions since the last GC
    dirty: u64,
    gc_runs: u64,
}

impl LocalShard {
    fn counter(&self) -> Counter {
        Counter {
            resources: self.resources.len() as u64,
            fields: self.resources.values().map(|(f, _)| f).sum(),
            paragraphs: self.resources.values().map(|(_, p)| p).sum(),
        }
    }
}

pub struct LocalNode {
    id: String,
    address: String,
    primary_id: Option<String>,
    storage: Option<Arc<dyn Storage>>,
    available_disk: AtomicU64,
    shards: Mutex<HashMap<String, LocalShard>>,
    indexed: Mutex<Vec<IndexMessage>>,
    calls: Mutex<HashMap<&'static str, usize>>,
    unreachable: AtomicBool,
    fail_new_shard: AtomicBool,
    /// Delay added to every call, in milliseconds
    latency_ms: AtomicU64,
}

impl LocalNode {
    pub fn new(id: &str, address: &str) -> Self {
        Self {
            id: id.to_string(),
            address: address.to_string(),
            primary_id: None,
            storage: None,
            available_disk: AtomicU64::new(0),
            shards: Mutex::new(HashMap::new()),
            indexed: Mutex::new(Vec::new()),
            calls: Mutex::new(HashMap::new()),
            unreachable: AtomicBool::new(false),
            fail_new_shard: AtomicBool::new(false),
            latency_ms: AtomicU64::new(0),
        }
    }

    /// Resolve creation messages against this storage.
    pub fn with_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Make this node a read replica of `primary_id`.
    pub fn with_primary(mut self, primary_id: &str) -> Self {
        self.primary_id = Some(primary_id.to_string());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Every call fails with a connection error while set.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn set_fail_new_shard(&self, fail: bool) {
        self.fail_new_shard.store(fail, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_available_disk(&self, bytes: u64) {
        self.available_disk.store(bytes, Ordering::SeqCst);
    }

    /// Number of calls received for `op`, failed ones included.
    pub fn calls(&self, op: &str) -> usize {
        self.calls.lock().get(op).copied().unwrap_or(0)
    }

    pub fn indexed_messages(&self) -> Vec<IndexMessage> {
        self.indexed.lock().clone()
    }

    pub fn shard_ids(&self) -> BTreeSet<String> {
        self.shards.lock().keys().cloned().collect()
    }

    pub fn has_resource(&self, shard_id: &str, uuid: &str) -> bool {
        self.shards
            .lock()
            .get(shard_id)
            .is_some_and(|s| s.resources.contains_key(uuid))
    }

    pub fn gc_runs(&self, shard_id: &str) -> u64 {
        self.shards.lock().get(shard_id).map_or(0, |s| s.gc_runs)
    }

    async fn enter(&self, op: &'static str) -> Result<(), ClusterError> {
        *self.calls.lock().entry(op).or_insert(0) += 1;
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(ClusterError::NodeConnection(format!(
                "{} @ {} is unreachable",
                self.id, self.address
            )));
        }
        Ok(())
    }

    fn with_shard<T>(
        &self,
        shard_id: &str,
        f: impl FnOnce(&mut LocalShard) -> T,
    ) -> Result<T, ClusterError> {
        let mut shards = self.shards.lock();
        let shard = shards
            .get_mut(shard_id)
            .ok_or_else(|| ClusterError::ShardNotFound(format!("{shard_id} @ {}", self.address)))?;
        Ok(f(shard))
    }

    fn apply_resource(
        &self,
        shard_id: &str,
        uuid: &str,
        fields: u64,
        paragraphs: u64,
    ) -> Result<(), ClusterError> {
        self.with_shard(shard_id, |shard| {
            shard.resources.insert(uuid.to_string(), (fields, paragraphs));
        })
    }

    fn drop_resource(&self, shard_id: &str, uuid: &str) -> Result<(), ClusterError> {
        self.with_shard(shard_id, |shard| {
            if shard.resources.remove(uuid).is_some() {
                shard.dirty += 1;
            }
        })
    }
}

#[async_trait]
impl NodeClient for LocalNode {
    async fn new_shard(
        &self,
        kbid: &str,
        _release_channel: ReleaseChannel,
        _model: &SemanticModel,
    ) -> Result<String, ClusterError> {
        self.enter("new_shard").await?;
        if self.fail_new_shard.load(Ordering::SeqCst) {
            return Err(ClusterError::Node(format!("{} refused new shard", self.id)));
        }
        let id = new_id();
        self.shards.lock().insert(
            id.clone(),
            LocalShard {
                kbid: kbid.to_string(),
                ..LocalShard::default()
            },
        );
        debug!(node_id = %self.id, shard_id = %id, kbid = %kbid, "Local shard created");
        Ok(id)
    }

    async fn delete_shard(&self, shard_id: &str) -> Result<String, ClusterError> {
        self.enter("delete_shard").await?;
        match self.shards.lock().remove(shard_id) {
            Some(shard) => {
                debug!(node_id = %self.id, shard_id = %shard_id, kbid = %shard.kbid, "Local shard deleted");
                Ok(shard_id.to_string())
            }
            None => Err(ClusterError::ShardNotFound(format!(
                "{shard_id} @ {}",
                self.address
            ))),
        }
    }

    async fn list_shards(&self) -> Result<Vec<String>, ClusterError> {
        self.enter("list_shards").await?;
        Ok(self.shard_ids().into_iter().collect())
    }

    async fn get_shard(&self, shard_id: &str) -> Result<ShardStats, ClusterError> {
        self.enter("get_shard").await?;
        self.with_shard(shard_id, |shard| {
            let counter = shard.counter();
            ShardStats {
                shard_id: shard_id.to_string(),
                resources: counter.resources,
                fields: counter.fields,
                paragraphs: counter.paragraphs,
            }
        })
    }

    async fn get_count(&self, shard_id: &str) -> Result<Counter, ClusterError> {
        self.enter("get_count").await?;
        self.with_shard(shard_id, |shard| shard.counter())
    }

    async fn index(&self, message: &IndexMessage) -> Result<(), ClusterError> {
        self.enter("index").await?;
        match message.typemessage {
            TypeMessage::Creation => {
                let (fields, paragraphs) = match &self.storage {
                    Some(storage) => {
                        let resource = storage.get_indexing(&message.storage_key).await?;
                        (resource.field_count(), resource.paragraph_count())
                    }
                    None => (0, 0),
                };
                self.apply_resource(&message.shard, &message.resource, fields, paragraphs)?;
            }
            TypeMessage::Deletion => self.drop_resource(&message.shard, &message.resource)?,
        }
        self.indexed.lock().push(message.clone());
        Ok(())
    }

    async fn set_resource(&self, shard_id: &str, resource: &Resource) -> Result<(), ClusterError> {
        self.enter("set_resource").await?;
        self.apply_resource(
            shard_id,
            &resource.uuid,
            resource.field_count(),
            resource.paragraph_count(),
        )
    }

    async fn remove_resource(&self, shard_id: &str, uuid: &str) -> Result<(), ClusterError> {
        self.enter("remove_resource").await?;
        self.drop_resource(shard_id, uuid)
    }

    async fn add_vectorset(
        &self,
        shard_id: &str,
        config: &VectorSetConfig,
    ) -> Result<(), ClusterError> {
        self.enter("add_vectorset").await?;
        self.with_shard(shard_id, |shard| {
            shard.vectorsets.insert(config.vectorset_id.clone());
        })
    }

    async fn list_vectorsets(&self, shard_id: &str) -> Result<Vec<String>, ClusterError> {
        self.enter("list_vectorsets").await?;
        self.with_shard(shard_id, |shard| shard.vectorsets.iter().cloned().collect())
    }

    async fn remove_vectorset(
        &self,
        shard_id: &str,
        vectorset_id: &str,
    ) -> Result<(), ClusterError> {
        self.enter("remove_vectorset").await?;
        self.with_shard(shard_id, |shard| {
            shard.vectorsets.remove(vectorset_id);
        })
    }

    async fn clean_and_upgrade_shard(&self, shard_id: &str) -> Result<(), ClusterError> {
        self.enter("clean_and_upgrade_shard").await?;
        self.with_shard(shard_id, |shard| shard.dirty = 0)
    }

    async fn gc(&self, shard_id: &str) -> Result<(), ClusterError> {
        self.enter("gc").await?;
        self.with_shard(shard_id, |shard| {
            shard.dirty = 0;
            shard.gc_runs += 1;
        })
    }

    async fn metadata(&self) -> Result<NodeMetadata, ClusterError> {
        self.enter("metadata").await?;
        Ok(NodeMetadata {
            node_id: self.id.clone(),
            shard_count: self.shards.lock().len() as u64,
            available_disk: self.available_disk.load(Ordering::SeqCst),
            primary_node_id: self.primary_id.clone(),
        })
    }
}

/// Connector handing out in-process nodes, one per node id.
#[derive(Default)]
pub struct LocalConnector {
    storage: Option<Arc<dyn Storage>>,
    nodes: Mutex<HashMap<String, Arc<LocalNode>>>,
}

impl LocalConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_storage(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage: Some(storage),
            nodes: Mutex::new(HashMap::new()),
        }
    }

    /// The node with this id, created on first request.
    pub fn node(&self, node_id: &str, address: &str) -> Arc<LocalNode> {
        self.nodes
            .lock()
            .entry(node_id.to_string())
            .or_insert_with(|| {
                let node = LocalNode::new(node_id, address);
                Arc::new(match &self.storage {
                    Some(storage) => node.with_storage(storage.clone()),
                    None => node,
                })
            })
            .clone()
    }

    /// Register an already built node, replacing any node with the same id.
    pub fn insert(&self, node: LocalNode) -> Arc<LocalNode> {
        let node = Arc::new(node);
        self.nodes.lock().insert(node.id.clone(), node.clone());
        node
    }

    pub fn get(&self, node_id: &str) -> Option<Arc<LocalNode>> {
        self.nodes.lock().get(node_id).cloned()
    }

    fn by_address(&self, address: &str) -> Option<Arc<LocalNode>> {
        self.nodes
            .lock()
            .values()
            .find(|n| n.address == address)
            .cloned()
    }
}

#[async_trait]
impl NodeConnector for LocalConnector {
    fn connect(&self, node_id: &str, address: &str) -> Result<Arc<dyn NodeClient>, ClusterError> {
        Ok(self.node(node_id, address))
    }

    async fn probe(&self, address: &str) -> Result<NodeMetadata, ClusterError> {
        let node = self
            .by_address(address)
            .ok_or_else(|| ClusterError::NodeConnection(format!("nothing listening at {address}")))?;
        node.metadata().await
    }
}
