//! Shard Management
//!
//! - `manager`: clustered shard manager (creation, selection, replica fan-out)
//! - `standalone`: embedded single-node variant with its own GC trigger
//! - `cache`: bounded shard set cache owned by the manager
//!
//! Callers write through [`ShardWriter`] and pick the variant at startup.

pub mod cache;
pub mod manager;
pub mod standalone;

pub use cache::ShardCache;
pub use manager::{Fanout, KbShardManager, ReplicaOutcome};
pub use standalone::StandaloneShardManager;

use crate::observability::errors;
use async_trait::async_trait;
use shardplane_core::{ClusterError, LogicalShard, Resource, ShardCounter};

#[async_trait]
pub trait ShardWriter: Send + Sync {
    /// The manager providing shard metadata for this writer
    fn manager(&self) -> &KbShardManager;

    /// Index `resource` into every replica of `shard`.
    ///
    /// `txid == -1` marks a write without an originating transaction; it is
    /// stored as a reindex and gets a fresh `reindex_id` when none is given.
    async fn add_resource(
        &self,
        shard: &LogicalShard,
        resource: &Resource,
        txid: i64,
        partition: Option<&str>,
        kb: &str,
        reindex_id: Option<&str>,
    ) -> Result<Option<ShardCounter>, ClusterError>;

    async fn delete_resource(
        &self,
        shard: &LogicalShard,
        uuid: &str,
        txid: i64,
        partition: Option<&str>,
        kb: &str,
    ) -> Result<(), ClusterError>;

    /// Write into the active shard of `kbid`, rolling over to a new shard
    /// when the returned counter crosses a threshold.
    async fn index_resource(
        &self,
        kbid: &str,
        resource: &Resource,
        txid: i64,
        partition: Option<&str>,
    ) -> Result<Option<ShardCounter>, ClusterError> {
        let shard = self.manager().active_shard(kbid).await?;
        let counter = self
            .add_resource(&shard, resource, txid, partition, kbid, None)
            .await?;
        if let Some(counter) = &counter {
            if let Err(e) = self
                .manager()
                .maybe_create_new_shard(kbid, counter.paragraphs, counter.fields)
                .await
            {
                errors::capture("maybe_create_new_shard", kbid, &e);
            }
        }
        Ok(counter)
    }
}
