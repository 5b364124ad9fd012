//! Index node clients
//!
//! `NodeClient` is the RPC surface of one index node. Two variants exist and
//! are picked when the registry is built, through a `NodeConnector`:
//!
//! ```text
//! NodeConnector ──connect──▶ Arc<dyn NodeClient>
//!   GrpcConnector   ──▶ RetryingNodeClient(GrpcNodeClient)   remote nodes
//!   LocalConnector  ──▶ LocalNode                            embedded node
//! ```

pub mod grpc;
pub mod local;
pub mod proto;
pub mod retrying;

pub use grpc::{GrpcConnector, GrpcNodeClient};
pub use local::{LocalConnector, LocalNode};
pub use retrying::RetryingNodeClient;

use async_trait::async_trait;
use shardplane_core::{
    ClusterError, Counter, IndexMessage, NodeMetadata, ReleaseChannel, Resource, SemanticModel,
    ShardStats, VectorSetConfig,
};
use std::sync::Arc;

#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Create a replica and return the id the node assigned to it.
    async fn new_shard(
        &self,
        kbid: &str,
        release_channel: ReleaseChannel,
        model: &SemanticModel,
    ) -> Result<String, ClusterError>;

    async fn delete_shard(&self, shard_id: &str) -> Result<String, ClusterError>;

    async fn list_shards(&self) -> Result<Vec<String>, ClusterError>;

    async fn get_shard(&self, shard_id: &str) -> Result<ShardStats, ClusterError>;

    async fn get_count(&self, shard_id: &str) -> Result<Counter, ClusterError>;

    /// Deliver an index message addressed to one of this node's replicas.
    async fn index(&self, message: &IndexMessage) -> Result<(), ClusterError>;

    /// Write a resource straight into a replica (standalone mode).
    async fn set_resource(&self, shard_id: &str, resource: &Resource) -> Result<(), ClusterError>;

    async fn remove_resource(&self, shard_id: &str, uuid: &str) -> Result<(), ClusterError>;

    async fn add_vectorset(
        &self,
        shard_id: &str,
        config: &VectorSetConfig,
    ) -> Result<(), ClusterError>;

    async fn list_vectorsets(&self, shard_id: &str) -> Result<Vec<String>, ClusterError>;

    async fn remove_vectorset(&self, shard_id: &str, vectorset_id: &str)
        -> Result<(), ClusterError>;

    async fn clean_and_upgrade_shard(&self, shard_id: &str) -> Result<(), ClusterError>;

    async fn gc(&self, shard_id: &str) -> Result<(), ClusterError>;

    async fn metadata(&self) -> Result<NodeMetadata, ClusterError>;
}

#[async_trait]
pub trait NodeConnector: Send + Sync {
    /// Client for a registered node. Must not block on the network.
    fn connect(&self, node_id: &str, address: &str) -> Result<Arc<dyn NodeClient>, ClusterError>;

    /// Fetch the metadata of whatever node answers at `address` over a
    /// brand new connection.
    async fn probe(&self, address: &str) -> Result<NodeMetadata, ClusterError>;
}
