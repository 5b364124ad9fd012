//! Index message dispatch
//!
//! The write path hands each replica its own copy of the index message. The
//! default dispatcher delivers it to the owning node's client; anything that
//! queues messages per node can stand in through [`IndexingDispatcher`].

use crate::cluster::NodeRegistry;
use async_trait::async_trait;
use shardplane_core::{ClusterError, IndexMessage};
use tracing::trace;

#[async_trait]
pub trait IndexingDispatcher: Send + Sync {
    /// Deliver `message` to the node named in `message.node`.
    async fn dispatch(&self, message: IndexMessage) -> Result<(), ClusterError>;
}

/// Delivers index messages straight to registered nodes
#[derive(Clone)]
pub struct NodeIndexing {
    registry: NodeRegistry,
}

impl NodeIndexing {
    pub fn new(registry: NodeRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl IndexingDispatcher for NodeIndexing {
    async fn dispatch(&self, message: IndexMessage) -> Result<(), ClusterError> {
        let node = self.registry.get_node(&message.node).await.ok_or_else(|| {
            ClusterError::NoHealthyNodeAvailable(format!(
                "node {} of replica {} is not registered",
                message.node, message.shard
            ))
        })?;
        trace!(
            node_id = %message.node,
            replica_id = %message.shard,
            resource = %message.resource,
            typemessage = ?message.typemessage,
            "Dispatching index message"
        );
        node.client.index(&message).await
    }
}
