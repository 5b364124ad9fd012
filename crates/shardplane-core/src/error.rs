//! Error taxonomy
//!
//! Placement and creation failures propagate to the caller. Purge-time
//! conditions (`ShardsNotFound`, `ShardNotFound`, `Node`) are caught by the
//! purge jobs and retried on the next run.

use thiserror::Error;

/// Errors raised by the metadata store.
#[derive(Debug, Error)]
pub enum MaindbError {
    #[error("metadata backend error: {0}")]
    Backend(String),

    /// Another transaction committed a write to a key this one touched.
    #[error("transaction conflict on key {key}")]
    Conflict { key: String },

    #[error("transaction already finished")]
    Closed,
}

/// Errors raised by the blob storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage object not found: {0}")]
    NotFound(String),

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("storage payload could not be decoded: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound(err.to_string())
        } else {
            StorageError::Backend(err.to_string())
        }
    }
}

/// Errors raised by placement, shard management and node communication.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// None of the replicas of a shard resolve to a registered node.
    #[error("no healthy node available: {0}")]
    NoHealthyNodeAvailable(String),

    /// No candidate node accepted a new shard for the full replication factor.
    #[error("could not create shard replicas: exhausted {attempts} candidate nodes")]
    ExhaustedNodes { attempts: usize },

    #[error("node cluster too small: {0}")]
    NodeClusterSmall(String),

    /// Removal of an id unknown to a registry or hash ring.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("knowledge box already exists: {0}")]
    KnowledgeBoxConflict(String),

    #[error("shards not found for knowledge box {0}")]
    ShardsNotFound(String),

    #[error("shard not found: {0}")]
    ShardNotFound(String),

    #[error("node error: {0}")]
    Node(String),

    #[error("could not reach node: {0}")]
    NodeConnection(String),

    #[error("nodes out of sync: {0}")]
    NodesUnsync(String),

    #[error(transparent)]
    Maindb(#[from] MaindbError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("metadata record could not be decoded: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ClusterError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        ClusterError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Conditions the purge jobs keep for the next run instead of failing.
    pub fn is_retryable_purge_condition(&self) -> bool {
        matches!(
            self,
            ClusterError::ShardsNotFound(_)
                | ClusterError::ShardNotFound(_)
                | ClusterError::Node(_)
                | ClusterError::NodeConnection(_)
        )
    }

    /// Short, stable label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ClusterError::NoHealthyNodeAvailable(_) => "no_healthy_node",
            ClusterError::ExhaustedNodes { .. } => "exhausted_nodes",
            ClusterError::NodeClusterSmall(_) => "cluster_small",
            ClusterError::NotFound { .. } => "not_found",
            ClusterError::KnowledgeBoxConflict(_) => "kb_conflict",
            ClusterError::ShardsNotFound(_) => "shards_not_found",
            ClusterError::ShardNotFound(_) => "shard_not_found",
            ClusterError::Node(_) => "node",
            ClusterError::NodeConnection(_) => "node_connection",
            ClusterError::NodesUnsync(_) => "nodes_unsync",
            ClusterError::Maindb(_) => "maindb",
            ClusterError::Storage(_) => "storage",
            ClusterError::Serialization(_) => "serialization",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_purge_conditions() {
        assert!(ClusterError::ShardsNotFound("kb".into()).is_retryable_purge_condition());
        assert!(ClusterError::ShardNotFound("s".into()).is_retryable_purge_condition());
        assert!(ClusterError::Node("boom".into()).is_retryable_purge_condition());
        assert!(!ClusterError::ExhaustedNodes { attempts: 3 }.is_retryable_purge_condition());
        assert!(!ClusterError::Maindb(MaindbError::Closed).is_retryable_purge_condition());
    }

    #[test]
    fn test_io_not_found_maps_to_not_found() {
        let err: StorageError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, StorageError::NotFound(_)));
    }
}
