//! Process-local blob storage

use super::{creation_message, indexing_key, kb_prefix};
use async_trait::async_trait;
use parking_lot::Mutex;
use shardplane_core::{IndexMessage, Resource, Storage, StorageError};
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Default)]
struct Inner {
    objects: BTreeMap<String, Vec<u8>>,
    scheduled: BTreeSet<String>,
    /// Passes of `delete_kb` that still report a non-empty bucket
    lagging: HashMap<String, u32>,
}

#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<Inner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `passes` calls to `delete_kb(kbid)` report leftovers,
    /// like an eventually consistent bucket listing would.
    pub fn lag_bucket_deletion(&self, kbid: &str, passes: u32) {
        self.inner.lock().lagging.insert(kbid.to_string(), passes);
    }

    pub fn object_count(&self, kbid: &str) -> usize {
        let prefix = kb_prefix(kbid);
        self.inner
            .lock()
            .objects
            .keys()
            .filter(|k| k.starts_with(&prefix))
            .count()
    }

    pub fn is_scheduled(&self, kbid: &str) -> bool {
        self.inner.lock().scheduled.contains(kbid)
    }

    fn put(&self, key: &str, resource: &Resource) -> Result<(), StorageError> {
        let payload = serde_json::to_vec(resource)?;
        self.inner.lock().objects.insert(key.to_string(), payload);
        Ok(())
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn indexing(
        &self,
        resource: &Resource,
        txid: i64,
        partition: Option<&str>,
        kb: &str,
        logical_shard: &str,
    ) -> Result<IndexMessage, StorageError> {
        let key = indexing_key(kb, logical_shard, &resource.uuid, &txid.to_string());
        self.put(&key, resource)?;
        Ok(creation_message(resource, txid, None, partition, kb, key))
    }

    async fn reindexing(
        &self,
        resource: &Resource,
        reindex_id: &str,
        partition: Option<&str>,
        kb: &str,
        logical_shard: &str,
    ) -> Result<IndexMessage, StorageError> {
        let key = indexing_key(kb, logical_shard, &resource.uuid, reindex_id);
        self.put(&key, resource)?;
        Ok(creation_message(
            resource,
            -1,
            Some(reindex_id),
            partition,
            kb,
            key,
        ))
    }

    async fn delete_indexing(
        &self,
        resource_uid: &str,
        txid: i64,
        kb: &str,
        logical_shard: &str,
    ) -> Result<(), StorageError> {
        let key = indexing_key(kb, logical_shard, resource_uid, &txid.to_string());
        self.inner.lock().objects.remove(&key);
        Ok(())
    }

    async fn get_indexing(&self, storage_key: &str) -> Result<Resource, StorageError> {
        let inner = self.inner.lock();
        let payload = inner
            .objects
            .get(storage_key)
            .ok_or_else(|| StorageError::NotFound(storage_key.to_string()))?;
        Ok(serde_json::from_slice(payload)?)
    }

    async fn schedule_delete_kb(&self, kbid: &str) -> Result<bool, StorageError> {
        self.inner.lock().scheduled.insert(kbid.to_string());
        Ok(true)
    }

    async fn delete_kb(&self, kbid: &str) -> Result<bool, StorageError> {
        let mut inner = self.inner.lock();
        let prefix = kb_prefix(kbid);
        inner.objects.retain(|k, _| !k.starts_with(&prefix));

        if let Some(passes) = inner.lagging.get_mut(kbid) {
            if *passes > 0 {
                *passes -= 1;
                return Ok(false);
            }
        }
        inner.lagging.remove(kbid);
        inner.scheduled.remove(kbid);
        Ok(true)
    }
}
