//! Metadata drivers
//!
//! - `memory`: process-local store for standalone mode and tests
//! - `etcd`: etcd-backed store for clustered deployments
//!
//! Plus typed JSON helpers used by every metadata record in the crate.

pub mod etcd;
pub mod memory;

pub use self::etcd::EtcdDriver;
pub use memory::MemoryDriver;

use crate::config::{ClusterSettings, MaindbBackend};
use anyhow::Result;
use serde::{de::DeserializeOwned, Serialize};
use shardplane_core::{ClusterError, Driver, Transaction};
use std::sync::Arc;

/// Build the driver selected by the settings.
pub async fn connect(settings: &ClusterSettings) -> Result<Arc<dyn Driver>> {
    match settings.maindb {
        MaindbBackend::Memory => Ok(Arc::new(MemoryDriver::new())),
        MaindbBackend::Etcd => Ok(Arc::new(EtcdDriver::connect(settings).await?)),
    }
}

pub async fn get_json<T: DeserializeOwned>(
    txn: &mut dyn Transaction,
    key: &str,
) -> Result<Option<T>, ClusterError> {
    match txn.get(key).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

pub async fn set_json<T: Serialize>(
    txn: &mut dyn Transaction,
    key: &str,
    value: &T,
) -> Result<(), ClusterError> {
    txn.set(key, serde_json::to_vec(value)?).await?;
    Ok(())
}

/// Merge a backend key listing with a transaction's pending writes.
pub(crate) fn merge_keys<'a>(
    stored: impl IntoIterator<Item = String>,
    pending: impl IntoIterator<Item = (&'a String, &'a Option<Vec<u8>>)>,
    prefix: &str,
    count: Option<usize>,
    include_start: bool,
) -> Vec<String> {
    let mut keys: std::collections::BTreeSet<String> = stored.into_iter().collect();
    for (key, value) in pending {
        if !key.starts_with(prefix) {
            continue;
        }
        match value {
            Some(_) => keys.insert(key.clone()),
            None => keys.remove(key),
        };
    }
    keys.into_iter()
        .filter(|k| include_start || k != prefix)
        .take(count.unwrap_or(usize::MAX))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_merge_keys() {
        let mut pending: BTreeMap<String, Option<Vec<u8>>> = BTreeMap::new();
        pending.insert("/kbs/a/new".into(), Some(vec![1]));
        pending.insert("/kbs/a/gone".into(), None);
        pending.insert("/other".into(), Some(vec![1]));

        let stored = vec!["/kbs/a/".to_string(), "/kbs/a/gone".into(), "/kbs/a/x".into()];
        let keys = merge_keys(stored.clone(), &pending, "/kbs/a/", None, true);
        assert_eq!(keys, vec!["/kbs/a/", "/kbs/a/new", "/kbs/a/x"]);

        let keys = merge_keys(stored, &pending, "/kbs/a/", Some(1), false);
        assert_eq!(keys, vec!["/kbs/a/new"]);
    }
}
