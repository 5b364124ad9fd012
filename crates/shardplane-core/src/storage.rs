//! Blob storage collaborator
//!
//! The storage layer persists resource payloads for the index nodes and
//! hands back the index message that points at them.

use crate::error::StorageError;
use crate::models::{IndexMessage, Resource};
use async_trait::async_trait;

#[async_trait]
pub trait Storage: Send + Sync {
    /// Store the payload of a transactional write and build its index message.
    async fn indexing(
        &self,
        resource: &Resource,
        txid: i64,
        partition: Option<&str>,
        kb: &str,
        logical_shard: &str,
    ) -> Result<IndexMessage, StorageError>;

    /// Store the payload of a write that has no originating transaction.
    async fn reindexing(
        &self,
        resource: &Resource,
        reindex_id: &str,
        partition: Option<&str>,
        kb: &str,
        logical_shard: &str,
    ) -> Result<IndexMessage, StorageError>;

    /// Drop the stored payload of a transactional write.
    async fn delete_indexing(
        &self,
        resource_uid: &str,
        txid: i64,
        kb: &str,
        logical_shard: &str,
    ) -> Result<(), StorageError>;

    /// Load the payload an index message points at.
    async fn get_indexing(&self, storage_key: &str) -> Result<Resource, StorageError>;

    /// Mark the bucket of a knowledge box for deletion.
    async fn schedule_delete_kb(&self, kbid: &str) -> Result<bool, StorageError>;

    /// Delete the bucket of a knowledge box. Returns `true` once nothing is left.
    async fn delete_kb(&self, kbid: &str) -> Result<bool, StorageError>;
}
