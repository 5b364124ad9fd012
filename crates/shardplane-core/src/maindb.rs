//! Transactional key-value metadata store
//!
//! Transactions are snapshot isolated: reads observe the state at `begin`
//! plus the transaction's own pending writes, and nothing is visible to
//! other transactions until `commit`. Dropping a transaction without
//! committing discards its writes.

use crate::error::MaindbError;
use async_trait::async_trait;

#[async_trait]
pub trait Driver: Send + Sync {
    /// Open a new transaction. Read-only transactions reject writes.
    async fn begin(&self, read_only: bool) -> Result<Box<dyn Transaction>, MaindbError>;

    /// Cheap liveness probe of the backend.
    async fn check(&self) -> Result<(), MaindbError>;
}

#[async_trait]
pub trait Transaction: Send {
    async fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>, MaindbError>;

    async fn set(&mut self, key: &str, value: Vec<u8>) -> Result<(), MaindbError>;

    async fn delete(&mut self, key: &str) -> Result<(), MaindbError>;

    /// Keys starting with `prefix`, in lexicographic order.
    ///
    /// `count` limits the number of keys returned; `include_start` controls
    /// whether a key exactly equal to `prefix` is part of the result.
    async fn keys(
        &mut self,
        prefix: &str,
        count: Option<usize>,
        include_start: bool,
    ) -> Result<Vec<String>, MaindbError>;

    async fn commit(self: Box<Self>) -> Result<(), MaindbError>;

    async fn abort(self: Box<Self>) -> Result<(), MaindbError>;
}
