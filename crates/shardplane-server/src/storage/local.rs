//! Blob storage on the local filesystem
//!
//! Objects are JSON files under the storage root, one per key. A scheduled
//! bucket deletion is a marker file under `deletions/`.

use super::{creation_message, indexing_key, kb_prefix};
use async_trait::async_trait;
use shardplane_core::{IndexMessage, Resource, Storage, StorageError};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::debug;

pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(StorageError::Backend(format!("invalid storage key: {key}")));
        }
        Ok(self.root.join(relative))
    }

    fn marker_path(&self, kbid: &str) -> Result<PathBuf, StorageError> {
        self.path_for(&format!("deletions/{kbid}"))
    }

    async fn put(&self, key: &str, resource: &Resource) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, serde_json::to_vec(resource)?).await?;
        Ok(())
    }
}

fn remove_if_exists(result: std::io::Result<()>) -> Result<(), StorageError> {
    match result {
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        other => Ok(other?),
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn indexing(
        &self,
        resource: &Resource,
        txid: i64,
        partition: Option<&str>,
        kb: &str,
        logical_shard: &str,
    ) -> Result<IndexMessage, StorageError> {
        let key = indexing_key(kb, logical_shard, &resource.uuid, &txid.to_string());
        self.put(&key, resource).await?;
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
        self.put(&key, resource).await?;
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
        let path = self.path_for(&indexing_key(
            kb,
            logical_shard,
            resource_uid,
            &txid.to_string(),
        ))?;
        remove_if_exists(fs::remove_file(path).await)
    }

    async fn get_indexing(&self, storage_key: &str) -> Result<Resource, StorageError> {
        let bytes = fs::read(self.path_for(storage_key)?).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn schedule_delete_kb(&self, kbid: &str) -> Result<bool, StorageError> {
        let marker = self.marker_path(kbid)?;
        if let Some(parent) = marker.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&marker, kbid.as_bytes()).await?;
        Ok(true)
    }

    async fn delete_kb(&self, kbid: &str) -> Result<bool, StorageError> {
        let bucket = self.path_for(kb_prefix(kbid).trim_end_matches('/'))?;
        remove_if_exists(fs::remove_dir_all(&bucket).await)?;
        if fs::try_exists(&bucket).await? {
            debug!(kbid = %kbid, "Bucket still has objects after deletion pass");
            return Ok(false);
        }
        remove_if_exists(fs::remove_file(self.marker_path(kbid)?).await)?;
        Ok(true)
    }
}
