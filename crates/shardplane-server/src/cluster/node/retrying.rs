//! Retry decorator for node clients
//!
//! Idempotent calls go through the shared retry policy. Writes and shard
//! creation are passed through untouched: repeating them after an ambiguous
//! failure could create a second replica or apply a write twice.

use super::NodeClient;
use crate::policy::NodeOp;
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use shardplane_core::{
    ClusterError, Counter, IndexMessage, NodeMetadata, ReleaseChannel, Resource, SemanticModel,
    ShardStats, VectorSetConfig,
};
use std::sync::Arc;

/// Only connectivity and generic node failures are worth another attempt.
fn is_transient(err: &ClusterError) -> bool {
    matches!(err, ClusterError::NodeConnection(_) | ClusterError::Node(_))
}

pub struct RetryingNodeClient {
    node_id: String,
    inner: Arc<dyn NodeClient>,
    policy: RetryPolicy,
}

impl RetryingNodeClient {
    pub fn new(node_id: &str, inner: Arc<dyn NodeClient>, policy: RetryPolicy) -> Self {
        Self {
            node_id: node_id.to_string(),
            inner,
            policy,
        }
    }

    fn op_name(&self, op: NodeOp) -> String {
        format!("{}@{}", op.as_str(), self.node_id)
    }
}

#[async_trait]
impl NodeClient for RetryingNodeClient {
    async fn new_shard(
        &self,
        kbid: &str,
        release_channel: ReleaseChannel,
        model: &SemanticModel,
    ) -> Result<String, ClusterError> {
        self.inner.new_shard(kbid, release_channel, model).await
    }

    async fn delete_shard(&self, shard_id: &str) -> Result<String, ClusterError> {
        let op = self.op_name(NodeOp::PurgeShard);
        self.policy
            .run_when(&op, || self.inner.delete_shard(shard_id), is_transient)
            .await
    }

    async fn list_shards(&self) -> Result<Vec<String>, ClusterError> {
        let op = self.op_name(NodeOp::ListShards);
        self.policy
            .run_when(&op, || self.inner.list_shards(), is_transient)
            .await
    }

    async fn get_shard(&self, shard_id: &str) -> Result<ShardStats, ClusterError> {
        let op = self.op_name(NodeOp::GetShard);
        self.policy
            .run_when(&op, || self.inner.get_shard(shard_id), is_transient)
            .await
    }

    async fn get_count(&self, shard_id: &str) -> Result<Counter, ClusterError> {
        let op = self.op_name(NodeOp::GetCount);
        self.policy
            .run_when(&op, || self.inner.get_count(shard_id), is_transient)
            .await
    }

    async fn index(&self, message: &IndexMessage) -> Result<(), ClusterError> {
        self.inner.index(message).await
    }

    async fn set_resource(&self, shard_id: &str, resource: &Resource) -> Result<(), ClusterError> {
        self.inner.set_resource(shard_id, resource).await
    }

    async fn remove_resource(&self, shard_id: &str, uuid: &str) -> Result<(), ClusterError> {
        self.inner.remove_resource(shard_id, uuid).await
    }

    async fn add_vectorset(
        &self,
        shard_id: &str,
        config: &VectorSetConfig,
    ) -> Result<(), ClusterError> {
        self.inner.add_vectorset(shard_id, config).await
    }

    async fn list_vectorsets(&self, shard_id: &str) -> Result<Vec<String>, ClusterError> {
        let op = self.op_name(NodeOp::ListVectorSets);
        self.policy
            .run_when(&op, || self.inner.list_vectorsets(shard_id), is_transient)
            .await
    }

    async fn remove_vectorset(
        &self,
        shard_id: &str,
        vectorset_id: &str,
    ) -> Result<(), ClusterError> {
        self.inner.remove_vectorset(shard_id, vectorset_id).await
    }

    async fn clean_and_upgrade_shard(&self, shard_id: &str) -> Result<(), ClusterError> {
        let op = self.op_name(NodeOp::CleanAndUpgrade);
        self.policy
            .run_when(
                &op,
                || self.inner.clean_and_upgrade_shard(shard_id),
                is_transient,
            )
            .await
    }

    async fn gc(&self, shard_id: &str) -> Result<(), ClusterError> {
        let op = self.op_name(NodeOp::Gc);
        self.policy
            .run_when(&op, || self.inner.gc(shard_id), is_transient)
            .await
    }

    async fn metadata(&self) -> Result<NodeMetadata, ClusterError> {
        let op = self.op_name(NodeOp::Metadata);
        self.policy
            .run_when(&op, || self.inner.metadata(), is_transient)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::node::local::LocalNode;
    use std::time::Duration;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(2),
            ..RetryPolicy::default()
        }
    }

    #[tokio::test]
    async fn test_reads_are_retried_up_to_budget() {
        let node = Arc::new(LocalNode::new("n0", "n0:1"));
        node.set_unreachable(true);
        let client = RetryingNodeClient::new("n0", node.clone(), fast_policy());

        assert!(client.list_shards().await.is_err());
        assert_eq!(node.calls("list_shards"), 4);
    }

    #[tokio::test]
    async fn test_new_shard_is_attempted_once() {
        let node = Arc::new(LocalNode::new("n0", "n0:1"));
        node.set_fail_new_shard(true);
        let client = RetryingNodeClient::new("n0", node.clone(), fast_policy());

        let result = client
            .new_shard("kb", ReleaseChannel::Stable, &SemanticModel::default())
            .await;
        assert!(result.is_err());
        assert_eq!(node.calls("new_shard"), 1);
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let node = Arc::new(LocalNode::new("n0", "n0:1"));
        let client = RetryingNodeClient::new("n0", node.clone(), fast_policy());

        let result = client.delete_shard("missing").await;
        assert!(matches!(result, Err(ClusterError::ShardNotFound(_))));
        assert_eq!(node.calls("delete_shard"), 1);
    }
}
