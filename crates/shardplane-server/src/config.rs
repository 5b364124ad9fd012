//! Cluster Configuration
//!
//! Centralized settings for placement, discovery, metadata and storage with
//! environment variable overrides (`SHARDPLANE_*`, plus `ETCD_ENDPOINTS`).

use crate::retry::RetryPolicy;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// How candidate nodes are ordered when placing new replicas
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PlacementStrategy {
    /// Most free disk first
    #[default]
    MostAvailableDisk,
    /// Fewest hosted shards first
    LeastShards,
}

impl FromStr for PlacementStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "most-available-disk" | "disk" => Ok(PlacementStrategy::MostAvailableDisk),
            "least-shards" | "shards" => Ok(PlacementStrategy::LeastShards),
            other => Err(format!("unknown placement strategy: {other}")),
        }
    }
}

/// A seed address polled by the seed-list discovery source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedNode {
    pub address: String,
    /// The node at this address is expected to be a read replica
    pub read_replica: bool,
}

impl FromStr for SeedNode {
    type Err = String;

    /// `host:port`, or `host:port#replica` for read replicas.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (address, read_replica) = match s.split_once('#') {
            Some((address, "replica")) => (address, true),
            Some((_, flag)) => return Err(format!("unknown seed flag: {flag}")),
            None => (s, false),
        };
        if address.is_empty() {
            return Err("empty seed address".to_string());
        }
        Ok(SeedNode {
            address: address.to_string(),
            read_replica,
        })
    }
}

/// Where membership reports come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryMode {
    /// Poll the metadata endpoint of each seed address
    Seeds(Vec<SeedNode>),
    /// Read node registrations from etcd
    Etcd { prefix: String },
    /// Single embedded node, no discovery loop
    Standalone,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaindbBackend {
    Memory,
    Etcd,
}

/// Shardplane configuration with sensible defaults
#[derive(Debug, Clone)]
pub struct ClusterSettings {
    // Placement
    /// Replicas per logical shard (env: SHARDPLANE_NODE_REPLICAS)
    pub node_replicas: usize,

    /// Paragraphs after which a new shard is created
    pub max_shard_paragraphs: u64,

    /// Fields after which a new shard is created
    pub max_shard_fields: u64,

    /// Nodes hosting this many shards or more are not placement candidates
    pub max_node_replicas: Option<u64>,

    pub placement_strategy: PlacementStrategy,

    /// Seed mixed into every rendezvous score
    pub hash_seed: u32,

    /// Capacity of the per-manager ShardSet cache
    pub shard_cache_capacity: usize,

    /// Overall deadline of a fan-out to all replicas of a knowledge box
    pub fanout_timeout: Duration,

    // Standalone
    pub standalone_mode: bool,

    /// Id of the embedded node in standalone mode
    pub standalone_node_id: String,

    /// Index operations on a shard between two capacity checks
    pub max_ops_before_checks: u64,

    // Discovery
    pub discovery: DiscoveryMode,

    /// Time between two reconciliation passes
    pub discovery_interval: Duration,

    /// Retry applied to idempotent node RPCs and metadata fetches
    pub retry: RetryPolicy,

    // Metadata store
    pub maindb: MaindbBackend,

    /// Etcd endpoints (env: ETCD_ENDPOINTS, comma-separated)
    pub etcd_endpoints: Vec<String>,

    /// Initial interval for etcd connection retry
    pub etcd_backoff_initial: Duration,

    /// Maximum interval for etcd connection retry
    pub etcd_backoff_max: Duration,

    /// Maximum elapsed time for etcd connection retries
    pub etcd_backoff_max_elapsed: Duration,

    // Storage
    /// Root of the local blob storage; in-memory storage when unset
    pub storage_path: Option<PathBuf>,

    // Admin HTTP
    pub http_bind: String,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            node_replicas: 2,
            max_shard_paragraphs: 500_000,
            max_shard_fields: 200_000,
            max_node_replicas: None,
            placement_strategy: PlacementStrategy::default(),
            hash_seed: 0,
            shard_cache_capacity: 100,
            fanout_timeout: Duration::from_secs(10),

            standalone_mode: false,
            standalone_node_id: "standalone".to_string(),
            max_ops_before_checks: 200,

            discovery: DiscoveryMode::Seeds(Vec::new()),
            discovery_interval: Duration::from_secs(10),
            retry: RetryPolicy::default(),

            maindb: MaindbBackend::Memory,
            etcd_endpoints: vec!["http://127.0.0.1:2379".to_string()],
            etcd_backoff_initial: Duration::from_secs(1),
            etcd_backoff_max: Duration::from_secs(10),
            etcd_backoff_max_elapsed: Duration::from_secs(60),

            storage_path: None,
            http_bind: "0.0.0.0:8080".to_string(),
        }
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

impl ClusterSettings {
    /// Create configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(replicas) = env_parse("SHARDPLANE_NODE_REPLICAS") {
            config.node_replicas = replicas;
        }
        if let Some(max) = env_parse("SHARDPLANE_MAX_SHARD_PARAGRAPHS") {
            config.max_shard_paragraphs = max;
        }
        if let Some(max) = env_parse("SHARDPLANE_MAX_SHARD_FIELDS") {
            config.max_shard_fields = max;
        }
        if let Some(max) = env_parse::<i64>("SHARDPLANE_MAX_NODE_REPLICAS") {
            // Negative disables the cap
            config.max_node_replicas = u64::try_from(max).ok();
        }
        if let Some(strategy) = env_parse("SHARDPLANE_PLACEMENT_STRATEGY") {
            config.placement_strategy = strategy;
        }
        if let Some(seed) = env_parse("SHARDPLANE_HASH_SEED") {
            config.hash_seed = seed;
        }
        if let Some(capacity) = env_parse("SHARDPLANE_SHARD_CACHE_CAPACITY") {
            config.shard_cache_capacity = capacity;
        }
        if let Some(ms) = env_parse("SHARDPLANE_FANOUT_TIMEOUT_MS") {
            config.fanout_timeout = Duration::from_millis(ms);
        }

        if let Some(standalone) = env_parse("SHARDPLANE_STANDALONE") {
            config.standalone_mode = standalone;
        }
        if let Ok(node_id) = std::env::var("SHARDPLANE_STANDALONE_NODE_ID") {
            config.standalone_node_id = node_id;
        }
        if let Some(ops) = env_parse("SHARDPLANE_MAX_OPS_BEFORE_CHECKS") {
            config.max_ops_before_checks = ops;
        }

        if let Ok(seeds) = std::env::var("SHARDPLANE_DISCOVERY_SEEDS") {
            config.discovery = DiscoveryMode::Seeds(parse_seeds(&seeds));
        }
        if let Ok(prefix) = std::env::var("SHARDPLANE_DISCOVERY_ETCD_PREFIX") {
            config.discovery = DiscoveryMode::Etcd { prefix };
        }
        if config.standalone_mode {
            config.discovery = DiscoveryMode::Standalone;
        }
        if let Some(secs) = env_parse("SHARDPLANE_DISCOVERY_INTERVAL_SECS") {
            config.discovery_interval = Duration::from_secs(secs);
        }
        if let Some(attempts) = env_parse("SHARDPLANE_RETRY_MAX_ATTEMPTS") {
            config.retry.max_attempts = attempts;
        }

        if let Ok(backend) = std::env::var("SHARDPLANE_MAINDB") {
            config.maindb = match backend.as_str() {
                "etcd" => MaindbBackend::Etcd,
                _ => MaindbBackend::Memory,
            };
        }
        if let Ok(endpoints) = std::env::var("ETCD_ENDPOINTS") {
            config.etcd_endpoints = endpoints.split(',').map(String::from).collect();
        }

        if let Ok(path) = std::env::var("SHARDPLANE_STORAGE_PATH") {
            config.storage_path = Some(PathBuf::from(path));
        }
        if let Ok(bind) = std::env::var("SHARDPLANE_HTTP_BIND") {
            config.http_bind = bind;
        }

        config
    }
}

/// Parse a comma-separated seed list, skipping malformed entries.
pub fn parse_seeds(raw: &str) -> Vec<SeedNode> {
    raw.split(',')
        .filter(|s| !s.trim().is_empty())
        .filter_map(|s| match s.parse() {
            Ok(seed) => Some(seed),
            Err(e) => {
                tracing::warn!(seed = %s, error = %e, "Ignoring malformed discovery seed");
                None
            }
        })
        .collect()
}
