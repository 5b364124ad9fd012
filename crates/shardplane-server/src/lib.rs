//! Shardplane Server Library
//!
//! Shard placement, replication and indexing coordination for a fleet of
//! index nodes:
//! - `cluster`: node registry, rendezvous hashing, placement, discovery, node clients
//! - `shards`: shard creation and the write path (clustered and standalone)
//! - `kb`: knowledge box lifecycle
//! - `purge`: deletion purge jobs and the orphan shard sweep
//! - `maindb`, `storage`: metadata and blob storage backends
//! - `api`: admin HTTP surface

pub mod api;
pub mod cluster;
pub mod config;
pub mod context;
pub mod indexing;
pub mod kb;
pub mod maindb;
pub mod observability;
pub mod policy;
pub mod purge;
pub mod retry;
pub mod shards;
pub mod storage;
pub mod version;
