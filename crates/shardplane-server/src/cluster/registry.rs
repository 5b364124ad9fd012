//! Node Registry
//!
//! In-memory catalog of live index nodes. Writable (primary) nodes and read
//! replicas are kept apart: only primaries are placement candidates.
//! The registry is rebuilt from membership on every start.

use super::node::{NodeClient, NodeConnector};
use crate::observability::{events, metrics};
use shardplane_core::{ClusterError, IndexNode};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, trace};

/// A registered node and the client used to reach it
#[derive(Clone)]
pub struct RegisteredNode {
    pub info: IndexNode,
    pub client: Arc<dyn NodeClient>,
}

impl RegisteredNode {
    pub fn id(&self) -> &str {
        &self.info.id
    }
}

impl fmt::Debug for RegisteredNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredNode")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct Nodes {
    primaries: HashMap<String, RegisteredNode>,
    /// primary id -> replica id -> node
    read_replicas: HashMap<String, HashMap<String, RegisteredNode>>,
}

impl Nodes {
    fn replica_count(&self) -> usize {
        self.read_replicas.values().map(HashMap::len).sum()
    }
}

/// Shared registry of index nodes
#[derive(Clone)]
pub struct NodeRegistry {
    nodes: Arc<RwLock<Nodes>>,
    connector: Arc<dyn NodeConnector>,
}

impl NodeRegistry {
    pub fn new(connector: Arc<dyn NodeConnector>) -> Self {
        Self {
            nodes: Arc::new(RwLock::new(Nodes::default())),
            connector,
        }
    }

    pub fn connector(&self) -> &Arc<dyn NodeConnector> {
        &self.connector
    }

    /// Insert or replace a node.
    pub async fn add_node(
        &self,
        id: &str,
        address: &str,
        shard_count: u64,
        available_disk: u64,
        primary_id: Option<&str>,
    ) -> Result<RegisteredNode, ClusterError> {
        let node = RegisteredNode {
            info: IndexNode {
                id: id.to_string(),
                address: address.to_string(),
                shard_count,
                available_disk,
                primary_id: primary_id.map(str::to_string),
            },
            client: self.connector.connect(id, address)?,
        };

        let mut nodes = self.nodes.write().await;
        match primary_id {
            Some(primary) => {
                nodes
                    .read_replicas
                    .entry(primary.to_string())
                    .or_default()
                    .insert(id.to_string(), node.clone());
            }
            None => {
                nodes.primaries.insert(id.to_string(), node.clone());
                metrics::set_available_nodes(nodes.primaries.len());
            }
        }
        metrics::set_node_shard_count(id, shard_count);
        debug!(
            node_id = %id,
            address = %address,
            primary_id = ?primary_id,
            total_nodes = nodes.primaries.len(),
            "Added index node"
        );
        Ok(node)
    }

    /// Refresh the mutable fields of a known node in place.
    ///
    /// Returns `false` when the node is unknown. The client is rebuilt only
    /// when the address changed.
    pub async fn update_node(
        &self,
        id: &str,
        address: &str,
        shard_count: u64,
        available_disk: u64,
    ) -> Result<bool, ClusterError> {
        let mut nodes = self.nodes.write().await;
        let Nodes {
            primaries,
            read_replicas,
        } = &mut *nodes;
        let entry = match primaries.get_mut(id) {
            Some(entry) => Some(entry),
            None => read_replicas.values_mut().find_map(|r| r.get_mut(id)),
        };
        let Some(entry) = entry else {
            return Ok(false);
        };

        if entry.info.address != address {
            entry.client = self.connector.connect(id, address)?;
            entry.info.address = address.to_string();
        }
        entry.info.shard_count = shard_count;
        entry.info.available_disk = available_disk;
        metrics::set_node_shard_count(id, shard_count);
        trace!(node_id = %id, shard_count = shard_count, "Updated index node");
        Ok(true)
    }

    /// Look a node up by id, primaries first.
    pub async fn get_node(&self, id: &str) -> Option<RegisteredNode> {
        let nodes = self.nodes.read().await;
        nodes
            .primaries
            .get(id)
            .or_else(|| nodes.read_replicas.values().find_map(|r| r.get(id)))
            .cloned()
    }

    /// Writable node by id.
    pub async fn get_primary(&self, id: &str) -> Option<RegisteredNode> {
        self.nodes.read().await.primaries.get(id).cloned()
    }

    /// Remove a node. With `primary_id` the removal targets a read replica.
    pub async fn remove_node(
        &self,
        id: &str,
        primary_id: Option<&str>,
    ) -> Result<RegisteredNode, ClusterError> {
        let mut nodes = self.nodes.write().await;
        let removed = match primary_id {
            Some(primary) => {
                let removed = nodes
                    .read_replicas
                    .get_mut(primary)
                    .and_then(|replicas| replicas.remove(id));
                if nodes
                    .read_replicas
                    .get(primary)
                    .is_some_and(HashMap::is_empty)
                {
                    nodes.read_replicas.remove(primary);
                }
                removed
            }
            None => nodes.primaries.remove(id),
        };

        let removed = removed.ok_or_else(|| ClusterError::not_found("index node", id))?;
        metrics::set_available_nodes(nodes.primaries.len());
        events::node_departed(id);
        Ok(removed)
    }

    /// Writable nodes, sorted by id. Read replicas are never included.
    pub async fn list_nodes(&self) -> Vec<RegisteredNode> {
        let nodes = self.nodes.read().await;
        let mut list: Vec<_> = nodes.primaries.values().cloned().collect();
        list.sort_by(|a, b| a.info.id.cmp(&b.info.id));
        list
    }

    pub async fn get_read_replicas(&self, primary_id: &str) -> Vec<RegisteredNode> {
        let nodes = self.nodes.read().await;
        let mut list: Vec<_> = nodes
            .read_replicas
            .get(primary_id)
            .map(|r| r.values().cloned().collect())
            .unwrap_or_default();
        list.sort_by(|a, b| a.info.id.cmp(&b.info.id));
        list
    }

    /// Every registered id with the primary it replicates, if any.
    pub async fn members(&self) -> Vec<(String, Option<String>)> {
        let nodes = self.nodes.read().await;
        let mut members: Vec<_> = nodes
            .primaries
            .keys()
            .map(|id| (id.clone(), None))
            .collect();
        for (primary, replicas) in &nodes.read_replicas {
            members.extend(replicas.keys().map(|id| (id.clone(), Some(primary.clone()))));
        }
        members.sort();
        members
    }

    pub async fn node_ids(&self) -> BTreeSet<String> {
        self.members().await.into_iter().map(|(id, _)| id).collect()
    }

    /// Number of writable nodes.
    pub async fn len(&self) -> usize {
        self.nodes.read().await.primaries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn read_replica_count(&self) -> usize {
        self.nodes.read().await.replica_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::node::LocalConnector;

    fn registry() -> NodeRegistry {
        NodeRegistry::new(Arc::new(LocalConnector::new()))
    }

    #[tokio::test]
    async fn test_add_is_upsert() {
        let registry = registry();
        registry.add_node("n0", "n0:1", 1, 10, None).await.unwrap();
        registry.add_node("n0", "n0:2", 5, 10, None).await.unwrap();

        assert_eq!(registry.len().await, 1);
        let node = registry.get_node("n0").await.unwrap();
        assert_eq!(node.info.address, "n0:2");
        assert_eq!(node.info.shard_count, 5);
    }

    #[tokio::test]
    async fn test_read_replicas_are_not_listed() {
        let registry = registry();
        registry.add_node("n0", "n0:1", 0, 0, None).await.unwrap();
        registry
            .add_node("n0-r", "n0r:1", 0, 0, Some("n0"))
            .await
            .unwrap();

        let listed: Vec<_> = registry
            .list_nodes()
            .await
            .into_iter()
            .map(|n| n.info.id)
            .collect();
        assert_eq!(listed, vec!["n0"]);
        assert_eq!(registry.get_read_replicas("n0").await.len(), 1);
        assert!(registry.get_node("n0-r").await.is_some());
        assert!(registry.get_primary("n0-r").await.is_none());
    }

    #[tokio::test]
    async fn test_remove_unknown_is_not_found() {
        let registry = registry();
        assert!(matches!(
            registry.remove_node("ghost", None).await,
            Err(ClusterError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_remove_read_replica() {
        let registry = registry();
        registry
            .add_node("n0-r", "n0r:1", 0, 0, Some("n0"))
            .await
            .unwrap();
        assert!(registry.remove_node("n0-r", None).await.is_err());
        registry.remove_node("n0-r", Some("n0")).await.unwrap();
        assert_eq!(registry.read_replica_count().await, 0);
    }

    #[tokio::test]
    async fn test_update_node_in_place() {
        let registry = registry();
        registry.add_node("n0", "n0:1", 1, 10, None).await.unwrap();
        assert!(registry.update_node("n0", "n0:1", 7, 20).await.unwrap());
        assert!(!registry.update_node("ghost", "g:1", 7, 20).await.unwrap());

        let node = registry.get_node("n0").await.unwrap();
        assert_eq!(node.info.shard_count, 7);
        assert_eq!(node.info.available_disk, 20);
    }
}
