//! Blob storage backends
//!
//! Payload layout shared by every backend:
//!
//! ```text
//! index/{kbid}/{logical_shard}/{resource}/{txid|reindex_id}
//! ```

pub mod local;
pub mod memory;

pub use local::LocalStorage;
pub use memory::MemoryStorage;

use crate::config::ClusterSettings;
use shardplane_core::{IndexMessage, Resource, Storage, TypeMessage};
use std::sync::Arc;

pub fn indexing_key(kb: &str, logical_shard: &str, resource: &str, id: &str) -> String {
    format!("index/{kb}/{logical_shard}/{resource}/{id}")
}

pub fn kb_prefix(kb: &str) -> String {
    format!("index/{kb}/")
}

/// Local storage when a root is configured, memory otherwise.
pub fn from_settings(settings: &ClusterSettings) -> Arc<dyn Storage> {
    match &settings.storage_path {
        Some(root) => Arc::new(LocalStorage::new(root.clone())),
        None => Arc::new(MemoryStorage::new()),
    }
}

pub(crate) fn creation_message(
    resource: &Resource,
    txid: i64,
    reindex_id: Option<&str>,
    partition: Option<&str>,
    kb: &str,
    storage_key: String,
) -> IndexMessage {
    IndexMessage {
        node: String::new(),
        shard: String::new(),
        txid,
        resource: resource.uuid.clone(),
        typemessage: TypeMessage::Creation,
        reindex_id: reindex_id.map(str::to_string),
        partition: partition.map(str::to_string),
        kbid: kb.to_string(),
        storage_key,
    }
}
