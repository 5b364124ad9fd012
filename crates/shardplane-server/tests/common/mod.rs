//! Shared fixtures: in-memory metadata, in-memory storage and in-process
//! index nodes registered through discovery.

#![allow(dead_code)]

use shardplane_core::{Driver, MemberReport, Storage};
use shardplane_server::cluster::discovery::ClusterDiscovery;
use shardplane_server::cluster::node::{LocalConnector, LocalNode};
use shardplane_server::config::{ClusterSettings, DiscoveryMode};
use shardplane_server::context::ClusterContext;
use shardplane_server::maindb::MemoryDriver;
use shardplane_server::storage::MemoryStorage;
use std::sync::Arc;

pub struct Cluster {
    pub ctx: ClusterContext,
    pub connector: Arc<LocalConnector>,
    pub storage: Arc<MemoryStorage>,
    pub discovery: ClusterDiscovery,
}

pub fn member(id: &str) -> MemberReport {
    MemberReport {
        node_id: id.to_string(),
        address: format!("{id}:10009"),
        shard_count: 0,
        available_disk: 1 << 30,
        primary_id: None,
    }
}

impl Cluster {
    pub async fn start(nodes: &[&str], settings: ClusterSettings) -> Self {
        let storage = Arc::new(MemoryStorage::new());
        let connector = Arc::new(LocalConnector::with_storage(storage.clone()));
        let driver: Arc<dyn Driver> = Arc::new(MemoryDriver::new());
        let settings = ClusterSettings {
            discovery: DiscoveryMode::Seeds(Vec::new()),
            ..settings
        };
        let ctx = ClusterContext::from_parts(
            settings,
            connector.clone(),
            driver,
            storage.clone() as Arc<dyn Storage>,
        )
        .await
        .unwrap();
        let discovery = ClusterDiscovery::new(ctx.registry.clone());
        let cluster = Self {
            ctx,
            connector,
            storage,
            discovery,
        };
        cluster.report(nodes).await;
        cluster
    }

    /// Reconcile the registry against exactly `nodes`.
    pub async fn report(&self, nodes: &[&str]) {
        self.discovery
            .update_members(nodes.iter().map(|id| member(id)).collect())
            .await;
    }

    pub fn node(&self, id: &str) -> Arc<LocalNode> {
        self.connector.get(id).unwrap()
    }
}
