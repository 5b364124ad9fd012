//! Core shared types for shardplane
//!
//! This crate contains the data model, error taxonomy, metadata key layout
//! and the collaborator traits (metadata store and blob storage) shared by
//! the shardplane server and anything embedding it.

pub mod error;
pub mod keys;
pub mod maindb;
pub mod models;
pub mod storage;

pub use error::{ClusterError, MaindbError, StorageError};
pub use maindb::{Driver, Transaction};
pub use models::*;
pub use storage::Storage;
