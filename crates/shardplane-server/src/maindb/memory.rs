//! In-memory metadata driver
//!
//! Each transaction works on a snapshot taken at `begin`. Commit applies the
//! write set atomically unless another transaction committed one of the same
//! keys after the snapshot was taken (first committer wins).

use super::merge_keys;
use async_trait::async_trait;
use parking_lot::Mutex;
use shardplane_core::{Driver, MaindbError, Transaction};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

#[derive(Default)]
struct Store {
    data: BTreeMap<String, Vec<u8>>,
    /// Revision of the last commit that touched each key
    versions: HashMap<String, u64>,
    revision: u64,
}

#[derive(Clone, Default)]
pub struct MemoryDriver {
    store: Arc<Mutex<Store>>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Driver for MemoryDriver {
    async fn begin(&self, read_only: bool) -> Result<Box<dyn Transaction>, MaindbError> {
        let store = self.store.lock();
        Ok(Box::new(MemoryTransaction {
            store: self.store.clone(),
            snapshot: store.data.clone(),
            start_revision: store.revision,
            writes: BTreeMap::new(),
            read_only,
        }))
    }

    async fn check(&self) -> Result<(), MaindbError> {
        Ok(())
    }
}

pub struct MemoryTransaction {
    store: Arc<Mutex<Store>>,
    snapshot: BTreeMap<String, Vec<u8>>,
    start_revision: u64,
    /// `None` marks a deletion
    writes: BTreeMap<String, Option<Vec<u8>>>,
    read_only: bool,
}

impl MemoryTransaction {
    fn check_writable(&self) -> Result<(), MaindbError> {
        if self.read_only {
            Err(MaindbError::Backend("write in read-only transaction".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>, MaindbError> {
        match self.writes.get(key) {
            Some(pending) => Ok(pending.clone()),
            None => Ok(self.snapshot.get(key).cloned()),
        }
    }

    async fn set(&mut self, key: &str, value: Vec<u8>) -> Result<(), MaindbError> {
        self.check_writable()?;
        self.writes.insert(key.to_string(), Some(value));
        Ok(())
    }

    async fn delete(&mut self, key: &str) -> Result<(), MaindbError> {
        self.check_writable()?;
        self.writes.insert(key.to_string(), None);
        Ok(())
    }

    async fn keys(
        &mut self,
        prefix: &str,
        count: Option<usize>,
        include_start: bool,
    ) -> Result<Vec<String>, MaindbError> {
        let stored = self
            .snapshot
            .range(prefix.to_string()..)
            .map(|(k, _)| k)
            .take_while(|k| k.starts_with(prefix))
            .cloned();
        Ok(merge_keys(
            stored,
            &self.writes,
            prefix,
            count,
            include_start,
        ))
    }

    async fn commit(self: Box<Self>) -> Result<(), MaindbError> {
        if self.writes.is_empty() {
            return Ok(());
        }
        let mut store = self.store.lock();
        for key in self.writes.keys() {
            if store.versions.get(key).copied().unwrap_or(0) > self.start_revision {
                return Err(MaindbError::Conflict { key: key.clone() });
            }
        }

        store.revision += 1;
        let revision = store.revision;
        for (key, value) in self.writes {
            match value {
                Some(value) => store.data.insert(key.clone(), value),
                None => store.data.remove(&key),
            };
            store.versions.insert(key, revision);
        }
        Ok(())
    }

    async fn abort(self: Box<Self>) -> Result<(), MaindbError> {
        Ok(())
    }
}
