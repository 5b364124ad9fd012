//! Process-wide wiring
//!
//! Builds the registry, metadata driver, storage and shard managers from
//! [`ClusterSettings`] and hands them to the admin server and the jobs.

use crate::cluster::discovery::{
    ClusterDiscovery, DiscoveryController, EtcdMembershipSource, MembershipSource,
    ReconcileSummary, SeedListSource,
};
use crate::cluster::node::{GrpcConnector, LocalConnector};
use crate::cluster::{NodeConnector, NodeRegistry};
use crate::config::{ClusterSettings, DiscoveryMode};
use crate::indexing::NodeIndexing;
use crate::kb::KnowledgeBox;
use crate::shards::{KbShardManager, ShardWriter, StandaloneShardManager};
use crate::{maindb, storage};
use anyhow::{Context as _, Result};
use shardplane_core::{Driver, Storage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Address the embedded node is registered under
const STANDALONE_ADDRESS: &str = "localhost";

/// Shared context for the admin server and the maintenance jobs.
#[derive(Clone)]
pub struct ClusterContext {
    pub settings: Arc<ClusterSettings>,
    pub registry: NodeRegistry,
    pub driver: Arc<dyn Driver>,
    pub storage: Arc<dyn Storage>,
    pub manager: KbShardManager,
    /// Clustered or standalone write path, picked from the settings
    pub writer: Arc<dyn ShardWriter>,
    pub kb: KnowledgeBox,
    /// Set once the registry reflects the cluster
    pub readiness: Arc<AtomicBool>,
}

impl ClusterContext {
    /// Connect every backend named by `settings`.
    pub async fn build(settings: ClusterSettings) -> Result<Self> {
        let driver = maindb::connect(&settings)
            .await
            .context("Failed to connect the metadata store")?;
        let storage = storage::from_settings(&settings);
        let connector: Arc<dyn NodeConnector> = if settings.standalone_mode {
            Arc::new(LocalConnector::with_storage(storage.clone()))
        } else {
            Arc::new(GrpcConnector::new(settings.retry))
        };
        Self::from_parts(settings, connector, driver, storage).await
    }

    /// Wire already built backends together.
    ///
    /// In standalone mode the embedded node is registered right away and the
    /// context is ready immediately.
    pub async fn from_parts(
        settings: ClusterSettings,
        connector: Arc<dyn NodeConnector>,
        driver: Arc<dyn Driver>,
        storage: Arc<dyn Storage>,
    ) -> Result<Self> {
        let settings = Arc::new(settings);
        let registry = NodeRegistry::new(connector);
        let readiness = Arc::new(AtomicBool::new(false));

        if settings.standalone_mode {
            registry
                .add_node(&settings.standalone_node_id, STANDALONE_ADDRESS, 0, 0, None)
                .await
                .context("Failed to register the embedded index node")?;
            readiness.store(true, Ordering::SeqCst);
        }

        let manager = KbShardManager::new(
            registry.clone(),
            driver.clone(),
            storage.clone(),
            Arc::new(NodeIndexing::new(registry.clone())),
            settings.clone(),
        );
        let writer: Arc<dyn ShardWriter> = if settings.standalone_mode {
            Arc::new(StandaloneShardManager::new(manager.clone()))
        } else {
            Arc::new(manager.clone())
        };
        info!(
            standalone = settings.standalone_mode,
            node_replicas = settings.node_replicas,
            "Cluster context ready"
        );

        Ok(Self {
            kb: KnowledgeBox::new(manager.clone()),
            settings,
            registry,
            driver,
            storage,
            manager,
            writer,
            readiness,
        })
    }

    /// The membership source configured for this deployment, if any.
    pub async fn membership_source(&self) -> Result<Option<Box<dyn MembershipSource>>> {
        let source: Box<dyn MembershipSource> = match &self.settings.discovery {
            DiscoveryMode::Seeds(seeds) => Box::new(SeedListSource::new(
                seeds.clone(),
                self.registry.connector().clone(),
                self.settings.retry,
            )),
            DiscoveryMode::Etcd { prefix } => Box::new(
                EtcdMembershipSource::connect(&self.settings, prefix)
                    .await
                    .context("Failed to connect the etcd membership source")?,
            ),
            DiscoveryMode::Standalone => return Ok(None),
        };
        Ok(Some(source))
    }

    /// Discovery loop over the configured source, stopped through `shutdown_rx`.
    pub async fn discovery_controller(
        &self,
        shutdown_rx: mpsc::UnboundedReceiver<()>,
    ) -> Result<Option<DiscoveryController>> {
        let Some(source) = self.membership_source().await? else {
            return Ok(None);
        };
        Ok(Some(DiscoveryController::new(
            ClusterDiscovery::new(self.registry.clone()),
            source,
            self.settings.discovery_interval,
            self.readiness.clone(),
            shutdown_rx,
        )))
    }

    /// A single reconciliation pass, for jobs that do not run the loop.
    pub async fn discover_once(&self) -> Result<ReconcileSummary> {
        let (_shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();
        match self.discovery_controller(shutdown_rx).await? {
            Some(mut controller) => controller.run_once().await,
            None => {
                debug!("No membership source configured, registry left as is");
                Ok(ReconcileSummary::default())
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        self.readiness.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::maindb::MemoryDriver;
    use crate::storage::MemoryStorage;
    use shardplane_core::{ReleaseChannel, Resource, SemanticModel};

    #[tokio::test]
    async fn test_standalone_context_writes_through_embedded_node() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let connector = Arc::new(LocalConnector::with_storage(storage.clone()));
        let settings = ClusterSettings {
            standalone_mode: true,
            discovery: DiscoveryMode::Standalone,
            node_replicas: 1,
            ..ClusterSettings::default()
        };
        let ctx = ClusterContext::from_parts(
            settings,
            connector.clone(),
            Arc::new(MemoryDriver::new()),
            storage,
        )
        .await
        .unwrap();

        assert!(ctx.is_ready());
        assert!(ctx.membership_source().await.unwrap().is_none());
        assert!(ctx.discover_once().await.unwrap().is_noop());

        ctx.kb
            .create("kb1", "kb1", SemanticModel::default(), ReleaseChannel::Stable)
            .await
            .unwrap();
        ctx.writer
            .index_resource("kb1", &Resource::new("r1"), 1, None)
            .await
            .unwrap();

        let shard = ctx.manager.active_shard("kb1").await.unwrap();
        let node = connector.get("standalone").unwrap();
        assert!(node.has_resource(&shard.replicas[0].id, "r1"));
    }

    #[tokio::test]
    async fn test_seed_discovery_pass_marks_ready() {
        let connector = Arc::new(LocalConnector::new());
        connector.node("n0", "n0:10009");
        let settings = ClusterSettings {
            discovery: DiscoveryMode::Seeds(crate::config::parse_seeds("n0:10009")),
            ..ClusterSettings::default()
        };
        let ctx = ClusterContext::from_parts(
            settings,
            connector,
            Arc::new(MemoryDriver::new()),
            Arc::new(MemoryStorage::new()),
        )
        .await
        .unwrap();
        assert!(!ctx.is_ready());

        let summary = ctx.discover_once().await.unwrap();
        assert_eq!(summary.added, vec!["n0".to_string()]);
        assert!(ctx.is_ready());
    }
}
