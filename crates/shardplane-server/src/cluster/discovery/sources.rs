//! Membership sources
//!
//! A source produces the full list of live index nodes on every poll.
//! - `SeedListSource` asks each configured address for its metadata
//! - `EtcdMembershipSource` reads the registrations index nodes keep in etcd

use crate::cluster::node::NodeConnector;
use crate::config::{ClusterSettings, SeedNode};
use crate::maindb::etcd::connect_client;
use crate::retry::RetryPolicy;
use anyhow::{Context, Result};
use async_trait::async_trait;
use etcd_client::{Client, GetOptions};
use futures::future::join_all;
use shardplane_core::{ClusterError, MemberReport};
use std::sync::Arc;
use tracing::{trace, warn};

/// Default etcd prefix under which index nodes register themselves
pub const DEFAULT_NODES_PREFIX: &str = "/shardplane/nodes/";

#[async_trait]
pub trait MembershipSource: Send {
    /// Current full membership. An error skips the reconciliation tick.
    async fn poll(&mut self) -> Result<Vec<MemberReport>>;
}

/// Polls the metadata endpoint of every seed address
pub struct SeedListSource {
    seeds: Vec<SeedNode>,
    connector: Arc<dyn NodeConnector>,
    retry: RetryPolicy,
}

impl SeedListSource {
    pub fn new(seeds: Vec<SeedNode>, connector: Arc<dyn NodeConnector>, retry: RetryPolicy) -> Self {
        Self {
            seeds,
            connector,
            retry,
        }
    }

    /// Fetch one node's metadata.
    ///
    /// Every attempt goes through `probe`, which opens a new connection, so a
    /// node restarted behind the same address is picked up on the next try.
    pub async fn query_node_metadata(&self, seed: &SeedNode) -> Result<MemberReport, ClusterError> {
        self.retry
            .run("node_metadata", || async {
                let metadata = self.connector.probe(&seed.address).await?;
                if seed.read_replica && metadata.primary_node_id.is_none() {
                    return Err(ClusterError::Node(format!(
                        "read replica at {} did not report its primary",
                        seed.address
                    )));
                }
                Ok(MemberReport {
                    node_id: metadata.node_id,
                    address: seed.address.clone(),
                    shard_count: metadata.shard_count,
                    available_disk: metadata.available_disk,
                    primary_id: metadata.primary_node_id,
                })
            })
            .await
    }
}

#[async_trait]
impl MembershipSource for SeedListSource {
    async fn poll(&mut self) -> Result<Vec<MemberReport>> {
        let results = join_all(self.seeds.iter().map(|seed| self.query_node_metadata(seed))).await;

        let mut members = Vec::with_capacity(results.len());
        for (seed, result) in self.seeds.iter().zip(results) {
            match result {
                Ok(member) => members.push(member),
                Err(e) => {
                    warn!(address = %seed.address, error = %e, "Seed unreachable, leaving it out of membership");
                }
            }
        }
        Ok(members)
    }
}

/// Reads `MemberReport` JSON values registered under a key prefix
pub struct EtcdMembershipSource {
    client: Client,
    prefix: String,
}

impl EtcdMembershipSource {
    pub fn new(client: Client, prefix: impl Into<String>) -> Self {
        Self {
            client,
            prefix: prefix.into(),
        }
    }

    pub async fn connect(settings: &ClusterSettings, prefix: &str) -> Result<Self> {
        let client = connect_client(settings).await?;
        Ok(Self::new(client, prefix))
    }

    /// Key an index node registers under
    pub fn node_key(&self, node_id: &str) -> String {
        format!("{}{node_id}", self.prefix)
    }
}

#[async_trait]
impl MembershipSource for EtcdMembershipSource {
    async fn poll(&mut self) -> Result<Vec<MemberReport>> {
        let response = self
            .client
            .get(self.prefix.as_str(), Some(GetOptions::new().with_prefix()))
            .await
            .context("Failed to list node registrations")?;

        let mut members = Vec::new();
        for kv in response.kvs() {
            match serde_json::from_slice::<MemberReport>(kv.value()) {
                Ok(member) => members.push(member),
                Err(e) => {
                    warn!(
                        key = %String::from_utf8_lossy(kv.key()),
                        error = %e,
                        "Skipping malformed node registration"
                    );
                }
            }
        }
        trace!(count = members.len(), prefix = %self.prefix, "Read node registrations");
        Ok(members)
    }
}
