//! Failure policy table
//!
//! Every node call made by the shard manager and the purge jobs returns an
//! explicit `Result`. Whether a failure stops the surrounding operation is
//! decided here, per operation, instead of at each call site.

use crate::observability::{errors, metrics};
use shardplane_core::ClusterError;

/// Node-facing operations issued by this crate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeOp {
    Index,
    SetResource,
    RemoveResource,
    NewShard,
    GetCount,
    GetShard,
    ListShards,
    /// Replica deletion while purging a knowledge box
    PurgeShard,
    /// Replica deletion during the orphan sweep
    DeleteOrphan,
    /// Undoing replicas of a failed creation attempt
    RollbackShard,
    /// Best-effort deletion right after a knowledge box is deleted
    DeleteKbShard,
    CleanAndUpgrade,
    AddVectorSet,
    RemoveVectorSet,
    ListVectorSets,
    Gc,
    Metadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// The failure fails the operation it belongs to
    Fatal,
    /// The failure is captured and dropped
    BestEffort,
}

impl NodeOp {
    pub const fn as_str(self) -> &'static str {
        match self {
            NodeOp::Index => "index",
            NodeOp::SetResource => "set_resource",
            NodeOp::RemoveResource => "remove_resource",
            NodeOp::NewShard => "new_shard",
            NodeOp::GetCount => "get_count",
            NodeOp::GetShard => "get_shard",
            NodeOp::ListShards => "list_shards",
            NodeOp::PurgeShard => "purge_shard",
            NodeOp::DeleteOrphan => "delete_orphan",
            NodeOp::RollbackShard => "rollback_shard",
            NodeOp::DeleteKbShard => "delete_kb_shard",
            NodeOp::CleanAndUpgrade => "clean_and_upgrade",
            NodeOp::AddVectorSet => "add_vectorset",
            NodeOp::RemoveVectorSet => "remove_vectorset",
            NodeOp::ListVectorSets => "list_vectorsets",
            NodeOp::Gc => "gc",
            NodeOp::Metadata => "metadata",
        }
    }

    /// Safe to repeat after an ambiguous failure.
    pub const fn is_idempotent(self) -> bool {
        !matches!(
            self,
            NodeOp::Index
                | NodeOp::SetResource
                | NodeOp::RemoveResource
                | NodeOp::NewShard
                | NodeOp::AddVectorSet
                | NodeOp::RemoveVectorSet
        )
    }
}

impl FailurePolicy {
    pub const fn for_op(op: NodeOp) -> Self {
        match op {
            NodeOp::Index
            | NodeOp::SetResource
            | NodeOp::RemoveResource
            | NodeOp::NewShard
            | NodeOp::PurgeShard
            | NodeOp::Metadata => FailurePolicy::Fatal,
            NodeOp::GetCount
            | NodeOp::ListShards
            | NodeOp::GetShard
            | NodeOp::DeleteOrphan
            | NodeOp::RollbackShard
            | NodeOp::DeleteKbShard
            | NodeOp::CleanAndUpgrade
            | NodeOp::AddVectorSet
            | NodeOp::RemoveVectorSet
            | NodeOp::ListVectorSets
            | NodeOp::Gc => FailurePolicy::BestEffort,
        }
    }
}

/// Apply the policy of `op` to one node call result.
///
/// Fatal failures come back as `Err`. Best-effort failures are reported to
/// the error sink and turned into `Ok(None)`.
pub fn settle<T>(
    op: NodeOp,
    node_id: &str,
    result: Result<T, ClusterError>,
) -> Result<Option<T>, ClusterError> {
    match result {
        Ok(value) => {
            metrics::record_node_operation(op.as_str(), "ok");
            Ok(Some(value))
        }
        Err(err) => {
            metrics::record_node_operation(op.as_str(), "error");
            match FailurePolicy::for_op(op) {
                FailurePolicy::Fatal => Err(err),
                FailurePolicy::BestEffort => {
                    errors::capture(op.as_str(), node_id, &err);
                    Ok(None)
                }
            }
        }
    }
}
