//! Data models for shardplane

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// An index node as seen by the placement layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexNode {
    /// Stable node identity
    pub id: String,
    /// host:port of the node's gRPC endpoint
    pub address: String,
    /// Number of shard replicas currently hosted
    pub shard_count: u64,
    /// Free disk in bytes
    pub available_disk: u64,
    /// Set when this node is a read replica of another node
    pub primary_id: Option<String>,
}

impl IndexNode {
    pub fn is_read_replica(&self) -> bool {
        self.primary_id.is_some()
    }
}

/// One membership entry delivered by a discovery source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberReport {
    pub node_id: String,
    pub address: String,
    #[serde(default)]
    pub shard_count: u64,
    #[serde(default)]
    pub available_disk: u64,
    #[serde(default)]
    pub primary_id: Option<String>,
}

/// Metadata an index node reports about itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMetadata {
    pub node_id: String,
    pub shard_count: u64,
    pub available_disk: u64,
    pub primary_node_id: Option<String>,
}

/// A physical copy of a logical shard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardReplica {
    /// Id assigned by the node when the replica was created
    pub id: String,
    /// Owning node id
    pub node_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalShard {
    pub shard_id: String,
    pub kbid: String,
    /// Insertion order matters: it breaks placement ties.
    pub replicas: Vec<ShardReplica>,
    #[serde(default)]
    pub read_only: bool,
}

impl LogicalShard {
    pub fn replica_on(&self, node_id: &str) -> Option<&ShardReplica> {
        self.replicas.iter().find(|r| r.node_id == node_id)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseChannel {
    #[default]
    Stable,
    Experimental,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Similarity {
    #[default]
    Cosine,
    Dot,
}

/// Vector configuration a new shard is created with
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SemanticModel {
    pub similarity: Similarity,
    pub vector_dimension: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorSetConfig {
    pub vectorset_id: String,
    pub dimension: u32,
    #[serde(default)]
    pub similarity: Similarity,
}

/// All logical shards of a knowledge box, oldest first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardSet {
    pub kbid: String,
    /// Append-only.
    pub shards: Vec<LogicalShard>,
    /// Always `shards.len() - 1`, -1 when empty.
    pub actual: i64,
    #[serde(default)]
    pub release_channel: ReleaseChannel,
    #[serde(default)]
    pub semantic_model: Option<SemanticModel>,
}

impl ShardSet {
    pub fn new(kbid: impl Into<String>) -> Self {
        Self {
            kbid: kbid.into(),
            shards: Vec::new(),
            actual: -1,
            release_channel: ReleaseChannel::default(),
            semantic_model: None,
        }
    }

    /// The writable shard, if any.
    pub fn active(&self) -> Option<&LogicalShard> {
        usize::try_from(self.actual)
            .ok()
            .and_then(|idx| self.shards.get(idx))
    }

    /// Append a new active shard, freezing the previous one.
    pub fn push_shard(&mut self, mut shard: LogicalShard) {
        if let Some(last) = self.shards.last_mut() {
            last.read_only = true;
        }
        shard.read_only = false;
        self.shards.push(shard);
        self.actual = self.shards.len() as i64 - 1;
    }

    pub fn find_shard(&self, shard_id: &str) -> Option<&LogicalShard> {
        self.shards.iter().find(|s| s.shard_id == shard_id)
    }

    /// Node ids hosting at least one replica of this set.
    pub fn node_ids(&self) -> BTreeSet<String> {
        self.shards
            .iter()
            .flat_map(|s| s.replicas.iter().map(|r| r.node_id.clone()))
            .collect()
    }

    /// Every shard id this set references: replica ids and logical ids.
    pub fn referenced_ids(&self) -> BTreeSet<String> {
        let mut ids = BTreeSet::new();
        for shard in &self.shards {
            ids.insert(shard.shard_id.clone());
            for replica in &shard.replicas {
                ids.insert(replica.id.clone());
            }
        }
        ids
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Snapshot of one replica's counts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardCounter {
    pub shard: String,
    pub fields: u64,
    pub paragraphs: u64,
}

/// GetCount reply
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counter {
    pub resources: u64,
    pub paragraphs: u64,
    pub fields: u64,
}

/// GetShard reply
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardStats {
    pub shard_id: String,
    pub resources: u64,
    pub fields: u64,
    pub paragraphs: u64,
}

/// A document as far as routing is concerned: fields and their paragraphs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub uuid: String,
    /// field id -> paragraphs
    #[serde(default)]
    pub fields: BTreeMap<String, Vec<String>>,
}

impl Resource {
    pub fn new(uuid: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, field: impl Into<String>, paragraphs: Vec<String>) -> Self {
        self.fields.insert(field.into(), paragraphs);
        self
    }

    pub fn field_count(&self) -> u64 {
        self.fields.len() as u64
    }

    pub fn paragraph_count(&self) -> u64 {
        self.fields.values().map(|p| p.len() as u64).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TypeMessage {
    Creation,
    Deletion,
}

/// What an index node receives for each write or delete
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMessage {
    /// Target node id, filled in per replica on dispatch
    #[serde(default)]
    pub node: String,
    /// Target replica id, filled in per replica on dispatch
    #[serde(default)]
    pub shard: String,
    pub txid: i64,
    pub resource: String,
    pub typemessage: TypeMessage,
    #[serde(default)]
    pub reindex_id: Option<String>,
    #[serde(default)]
    pub partition: Option<String>,
    pub kbid: String,
    /// Where the payload lives in storage; empty for deletions
    #[serde(default)]
    pub storage_key: String,
}

impl IndexMessage {
    pub fn deletion(uuid: &str, txid: i64, partition: Option<&str>, kbid: &str) -> Self {
        Self {
            node: String::new(),
            shard: String::new(),
            txid,
            resource: uuid.to_string(),
            typemessage: TypeMessage::Deletion,
            reindex_id: None,
            partition: partition.map(str::to_string),
            kbid: kbid.to_string(),
            storage_key: String::new(),
        }
    }

    /// Copy of this message addressed to one replica.
    pub fn for_replica(&self, node_id: &str, replica_id: &str) -> Self {
        let mut msg = self.clone();
        msg.node = node_id.to_string();
        msg.shard = replica_id.to_string();
        msg
    }
}

/// Stored configuration of a knowledge box
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeBoxConfig {
    pub kbid: String,
    pub slug: String,
    #[serde(default)]
    pub release_channel: ReleaseChannel,
    #[serde(default)]
    pub semantic_model: SemanticModel,
}

/// Lifecycle of a knowledge box deletion intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeletionState {
    /// Metadata and node shards still need to go
    PendingMetadataPurge,
    /// Only the storage bucket is left
    PendingStoragePurge,
    Done,
}

impl DeletionState {
    pub fn next(self) -> Self {
        match self {
            DeletionState::PendingMetadataPurge => DeletionState::PendingStoragePurge,
            DeletionState::PendingStoragePurge | DeletionState::Done => DeletionState::Done,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KbDeletion {
    pub kbid: String,
    pub state: DeletionState,
    pub requested_at: DateTime<Utc>,
    /// Failed purge attempts in the current state
    #[serde(default)]
    pub attempts: u32,
}

impl KbDeletion {
    pub fn new(kbid: impl Into<String>) -> Self {
        Self {
            kbid: kbid.into(),
            state: DeletionState::PendingMetadataPurge,
            requested_at: Utc::now(),
            attempts: 0,
        }
    }

    pub fn advance(&mut self) {
        self.state = self.state.next();
        self.attempts = 0;
    }

    pub fn is_done(&self) -> bool {
        self.state == DeletionState::Done
    }
}

/// Generate an opaque id for shards and reindex operations.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
