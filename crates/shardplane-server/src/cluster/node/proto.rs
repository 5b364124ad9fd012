//! Wire messages of the index node gRPC services
//!
//! Kept by hand so the build does not need `protoc`. Tags are part of the
//! node protocol and must not be renumbered.

use shardplane_core as core;

pub const NEW_SHARD: &str = "/nodewriter.NodeWriter/NewShard";
pub const DELETE_SHARD: &str = "/nodewriter.NodeWriter/DeleteShard";
pub const LIST_SHARDS: &str = "/nodewriter.NodeWriter/ListShards";
pub const INDEX: &str = "/nodewriter.NodeWriter/Index";
pub const SET_RESOURCE: &str = "/nodewriter.NodeWriter/SetResource";
pub const REMOVE_RESOURCE: &str = "/nodewriter.NodeWriter/RemoveResource";
pub const ADD_VECTORSET: &str = "/nodewriter.NodeWriter/AddVectorSet";
pub const LIST_VECTORSETS: &str = "/nodewriter.NodeWriter/ListVectorSets";
pub const REMOVE_VECTORSET: &str = "/nodewriter.NodeWriter/RemoveVectorSet";
pub const CLEAN_AND_UPGRADE_SHARD: &str = "/nodewriter.NodeWriter/CleanAndUpgradeShard";
pub const GC: &str = "/nodewriter.NodeWriter/GC";
pub const GET_METADATA: &str = "/nodewriter.NodeWriter/GetMetadata";
pub const GET_SHARD: &str = "/nodereader.NodeReader/GetShard";
pub const GET_COUNT: &str = "/nodesidecar.NodeSidecar/GetCount";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ReleaseChannel {
    Stable = 0,
    Experimental = 1,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum VectorSimilarity {
    Cosine = 0,
    Dot = 1,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum TypeMessage {
    Creation = 0,
    Deletion = 1,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EmptyQuery {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EmptyResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ShardId {
    #[prost(string, tag = "1")]
    pub id: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ShardIds {
    #[prost(message, repeated, tag = "1")]
    pub ids: ::prost::alloc::vec::Vec<ShardId>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NewShardRequest {
    #[prost(string, tag = "1")]
    pub kbid: ::prost::alloc::string::String,
    #[prost(enumeration = "ReleaseChannel", tag = "2")]
    pub release_channel: i32,
    #[prost(enumeration = "VectorSimilarity", tag = "3")]
    pub similarity: i32,
    #[prost(uint32, optional, tag = "4")]
    pub vector_dimension: ::core::option::Option<u32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ShardCreated {
    #[prost(string, tag = "1")]
    pub id: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetShardRequest {
    #[prost(message, optional, tag = "1")]
    pub shard_id: ::core::option::Option<ShardId>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Shard {
    #[prost(string, tag = "1")]
    pub shard_id: ::prost::alloc::string::String,
    #[prost(uint64, tag = "2")]
    pub fields: u64,
    #[prost(uint64, tag = "3")]
    pub paragraphs: u64,
    #[prost(uint64, tag = "4")]
    pub resources: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Count {
    #[prost(uint64, tag = "1")]
    pub resources: u64,
    #[prost(uint64, tag = "2")]
    pub paragraphs: u64,
    #[prost(uint64, tag = "3")]
    pub fields: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct IndexMessage {
    #[prost(string, tag = "1")]
    pub node: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub shard: ::prost::alloc::string::String,
    #[prost(int64, tag = "3")]
    pub txid: i64,
    #[prost(string, tag = "4")]
    pub resource: ::prost::alloc::string::String,
    #[prost(enumeration = "TypeMessage", tag = "5")]
    pub typemessage: i32,
    #[prost(string, optional, tag = "6")]
    pub reindex_id: ::core::option::Option<::prost::alloc::string::String>,
    #[prost(string, optional, tag = "7")]
    pub partition: ::core::option::Option<::prost::alloc::string::String>,
    #[prost(string, tag = "8")]
    pub kbid: ::prost::alloc::string::String,
    #[prost(string, tag = "9")]
    pub storage_key: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Field {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(string, repeated, tag = "2")]
    pub paragraphs: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Resource {
    #[prost(message, optional, tag = "1")]
    pub shard_id: ::core::option::Option<ShardId>,
    #[prost(string, tag = "2")]
    pub uuid: ::prost::alloc::string::String,
    #[prost(message, repeated, tag = "3")]
    pub fields: ::prost::alloc::vec::Vec<Field>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ResourceId {
    #[prost(string, tag = "1")]
    pub shard_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub uuid: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VectorSetId {
    #[prost(message, optional, tag = "1")]
    pub shard: ::core::option::Option<ShardId>,
    #[prost(string, tag = "2")]
    pub vectorset: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NewVectorSetRequest {
    #[prost(message, optional, tag = "1")]
    pub id: ::core::option::Option<VectorSetId>,
    #[prost(uint32, tag = "2")]
    pub dimension: u32,
    #[prost(enumeration = "VectorSimilarity", tag = "3")]
    pub similarity: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct VectorSetList {
    #[prost(message, optional, tag = "1")]
    pub shard: ::core::option::Option<ShardId>,
    #[prost(string, repeated, tag = "2")]
    pub vectorsets: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NodeMetadata {
    #[prost(uint64, tag = "2")]
    pub shard_count: u64,
    #[prost(string, tag = "4")]
    pub node_id: ::prost::alloc::string::String,
    #[prost(string, optional, tag = "5")]
    pub primary_node_id: ::core::option::Option<::prost::alloc::string::String>,
    #[prost(uint64, tag = "6")]
    pub available_disk: u64,
}

pub fn shard_id(id: &str) -> ShardId {
    ShardId { id: id.to_string() }
}

impl From<core::ReleaseChannel> for ReleaseChannel {
    fn from(channel: core::ReleaseChannel) -> Self {
        match channel {
            core::ReleaseChannel::Stable => ReleaseChannel::Stable,
            core::ReleaseChannel::Experimental => ReleaseChannel::Experimental,
        }
    }
}

impl From<core::Similarity> for VectorSimilarity {
    fn from(similarity: core::Similarity) -> Self {
        match similarity {
            core::Similarity::Cosine => VectorSimilarity::Cosine,
            core::Similarity::Dot => VectorSimilarity::Dot,
        }
    }
}

impl From<&core::IndexMessage> for IndexMessage {
    fn from(msg: &core::IndexMessage) -> Self {
        let typemessage = match msg.typemessage {
            core::TypeMessage::Creation => TypeMessage::Creation,
            core::TypeMessage::Deletion => TypeMessage::Deletion,
        };
        IndexMessage {
            node: msg.node.clone(),
            shard: msg.shard.clone(),
            txid: msg.txid,
            resource: msg.resource.clone(),
            typemessage: typemessage as i32,
            reindex_id: msg.reindex_id.clone(),
            partition: msg.partition.clone(),
            kbid: msg.kbid.clone(),
            storage_key: msg.storage_key.clone(),
        }
    }
}

impl Resource {
    pub fn from_model(shard: &str, resource: &core::Resource) -> Self {
        Resource {
            shard_id: Some(shard_id(shard)),
            uuid: resource.uuid.clone(),
            fields: resource
                .fields
                .iter()
                .map(|(name, paragraphs)| Field {
                    name: name.clone(),
                    paragraphs: paragraphs.clone(),
                })
                .collect(),
        }
    }
}

impl From<Shard> for core::ShardStats {
    fn from(shard: Shard) -> Self {
        core::ShardStats {
            shard_id: shard.shard_id,
            resources: shard.resources,
            fields: shard.fields,
            paragraphs: shard.paragraphs,
        }
    }
}

impl From<Count> for core::Counter {
    fn from(count: Count) -> Self {
        core::Counter {
            resources: count.resources,
            paragraphs: count.paragraphs,
            fields: count.fields,
        }
    }
}

impl From<NodeMetadata> for core::NodeMetadata {
    fn from(meta: NodeMetadata) -> Self {
        core::NodeMetadata {
            node_id: meta.node_id,
            shard_count: meta.shard_count,
            available_disk: meta.available_disk,
            primary_node_id: meta.primary_node_id.filter(|id| !id.is_empty()),
        }
    }
}
