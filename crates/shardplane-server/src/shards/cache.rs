//! Bounded cache of shard sets, keyed by kbid

use lru::LruCache;
use parking_lot::Mutex;
use shardplane_core::ShardSet;
use std::num::NonZeroUsize;

pub struct ShardCache {
    inner: Mutex<LruCache<String, ShardSet>>,
}

impl ShardCache {
    /// A zero capacity is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, kbid: &str) -> Option<ShardSet> {
        self.inner.lock().get(kbid).cloned()
    }

    pub fn put(&self, shards: ShardSet) {
        self.inner.lock().put(shards.kbid.clone(), shards);
    }

    pub fn invalidate(&self, kbid: &str) {
        self.inner.lock().pop(kbid);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
