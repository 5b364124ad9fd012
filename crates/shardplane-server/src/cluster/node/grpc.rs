//! gRPC-backed index node client

use super::proto;
use super::retrying::RetryingNodeClient;
use super::{NodeClient, NodeConnector};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use http::uri::PathAndQuery;
use shardplane_core::{
    ClusterError, Counter, IndexMessage, NodeMetadata, ReleaseChannel, Resource, SemanticModel,
    ShardStats, VectorSetConfig,
};
use std::sync::Arc;
use std::time::Duration;
use tonic::transport::{Channel, Endpoint};
use tonic::Code;
use tracing::trace;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Map a node status onto the cluster error taxonomy.
pub fn status_to_error(address: &str, status: tonic::Status) -> ClusterError {
    let detail = format!("{} @ {address}", status.message());
    match status.code() {
        Code::NotFound => ClusterError::ShardNotFound(detail),
        Code::Unavailable | Code::DeadlineExceeded | Code::Cancelled => {
            ClusterError::NodeConnection(detail)
        }
        _ => ClusterError::Node(detail),
    }
}

fn endpoint(address: &str) -> Result<Endpoint, ClusterError> {
    let uri = if address.contains("://") {
        address.to_string()
    } else {
        format!("http://{address}")
    };
    Ok(Endpoint::from_shared(uri)
        .map_err(|e| ClusterError::NodeConnection(format!("invalid address {address}: {e}")))?
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT))
}

#[derive(Clone)]
pub struct GrpcNodeClient {
    address: String,
    inner: tonic::client::Grpc<Channel>,
}

impl GrpcNodeClient {
    /// Client whose connection is established on first use.
    pub fn connect_lazy(address: &str) -> Result<Self, ClusterError> {
        let channel = endpoint(address)?.connect_lazy();
        Ok(Self {
            address: address.to_string(),
            inner: tonic::client::Grpc::new(channel),
        })
    }

    /// Client over a connection established right now.
    pub async fn connect(address: &str) -> Result<Self, ClusterError> {
        let channel = endpoint(address)?
            .connect()
            .await
            .map_err(|e| ClusterError::NodeConnection(format!("{address}: {e}")))?;
        Ok(Self {
            address: address.to_string(),
            inner: tonic::client::Grpc::new(channel),
        })
    }

    async fn unary<Req, Resp>(&self, path: &'static str, request: Req) -> Result<Resp, ClusterError>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        trace!(address = %self.address, path = path, "Node call");
        let mut grpc = self.inner.clone();
        grpc.ready()
            .await
            .map_err(|e| ClusterError::NodeConnection(format!("{}: {e}", self.address)))?;
        let codec = tonic::codec::ProstCodec::<Req, Resp>::default();
        let response = grpc
            .unary(
                tonic::Request::new(request),
                PathAndQuery::from_static(path),
                codec,
            )
            .await
            .map_err(|status| status_to_error(&self.address, status))?;
        Ok(response.into_inner())
    }
}

#[async_trait]
impl NodeClient for GrpcNodeClient {
    async fn new_shard(
        &self,
        kbid: &str,
        release_channel: ReleaseChannel,
        model: &SemanticModel,
    ) -> Result<String, ClusterError> {
        let request = proto::NewShardRequest {
            kbid: kbid.to_string(),
            release_channel: proto::ReleaseChannel::from(release_channel) as i32,
            similarity: proto::VectorSimilarity::from(model.similarity) as i32,
            vector_dimension: model.vector_dimension,
        };
        let created: proto::ShardCreated = self.unary(proto::NEW_SHARD, request).await?;
        Ok(created.id)
    }

    async fn delete_shard(&self, shard_id: &str) -> Result<String, ClusterError> {
        let deleted: proto::ShardId = self
            .unary(proto::DELETE_SHARD, proto::shard_id(shard_id))
            .await?;
        Ok(deleted.id)
    }

    async fn list_shards(&self) -> Result<Vec<String>, ClusterError> {
        let ids: proto::ShardIds = self.unary(proto::LIST_SHARDS, proto::EmptyQuery {}).await?;
        Ok(ids.ids.into_iter().map(|s| s.id).collect())
    }

    async fn get_shard(&self, shard_id: &str) -> Result<ShardStats, ClusterError> {
        let request = proto::GetShardRequest {
            shard_id: Some(proto::shard_id(shard_id)),
        };
        let shard: proto::Shard = self.unary(proto::GET_SHARD, request).await?;
        Ok(shard.into())
    }

    async fn get_count(&self, shard_id: &str) -> Result<Counter, ClusterError> {
        let count: proto::Count = self.unary(proto::GET_COUNT, proto::shard_id(shard_id)).await?;
        Ok(count.into())
    }

    async fn index(&self, message: &IndexMessage) -> Result<(), ClusterError> {
        let _: proto::EmptyResponse = self
            .unary(proto::INDEX, proto::IndexMessage::from(message))
            .await?;
        Ok(())
    }

    async fn set_resource(&self, shard_id: &str, resource: &Resource) -> Result<(), ClusterError> {
        let _: proto::EmptyResponse = self
            .unary(
                proto::SET_RESOURCE,
                proto::Resource::from_model(shard_id, resource),
            )
            .await?;
        Ok(())
    }

    async fn remove_resource(&self, shard_id: &str, uuid: &str) -> Result<(), ClusterError> {
        let request = proto::ResourceId {
            shard_id: shard_id.to_string(),
            uuid: uuid.to_string(),
        };
        let _: proto::EmptyResponse = self.unary(proto::REMOVE_RESOURCE, request).await?;
        Ok(())
    }

    async fn add_vectorset(
        &self,
        shard_id: &str,
        config: &VectorSetConfig,
    ) -> Result<(), ClusterError> {
        let request = proto::NewVectorSetRequest {
            id: Some(proto::VectorSetId {
                shard: Some(proto::shard_id(shard_id)),
                vectorset: config.vectorset_id.clone(),
            }),
            dimension: config.dimension,
            similarity: proto::VectorSimilarity::from(config.similarity) as i32,
        };
        let _: proto::EmptyResponse = self.unary(proto::ADD_VECTORSET, request).await?;
        Ok(())
    }

    async fn list_vectorsets(&self, shard_id: &str) -> Result<Vec<String>, ClusterError> {
        let list: proto::VectorSetList = self
            .unary(proto::LIST_VECTORSETS, proto::shard_id(shard_id))
            .await?;
        Ok(list.vectorsets)
    }

    async fn remove_vectorset(
        &self,
        shard_id: &str,
        vectorset_id: &str,
    ) -> Result<(), ClusterError> {
        let request = proto::VectorSetId {
            shard: Some(proto::shard_id(shard_id)),
            vectorset: vectorset_id.to_string(),
        };
        let _: proto::EmptyResponse = self.unary(proto::REMOVE_VECTORSET, request).await?;
        Ok(())
    }

    async fn clean_and_upgrade_shard(&self, shard_id: &str) -> Result<(), ClusterError> {
        let _: proto::EmptyResponse = self
            .unary(proto::CLEAN_AND_UPGRADE_SHARD, proto::shard_id(shard_id))
            .await?;
        Ok(())
    }

    async fn gc(&self, shard_id: &str) -> Result<(), ClusterError> {
        let _: proto::EmptyResponse = self.unary(proto::GC, proto::shard_id(shard_id)).await?;
        Ok(())
    }

    async fn metadata(&self) -> Result<NodeMetadata, ClusterError> {
        let meta: proto::NodeMetadata = self
            .unary(proto::GET_METADATA, proto::EmptyQuery {})
            .await?;
        Ok(meta.into())
    }
}

/// Connector for remote index nodes.
pub struct GrpcConnector {
    retry: RetryPolicy,
}

impl GrpcConnector {
    pub fn new(retry: RetryPolicy) -> Self {
        Self { retry }
    }
}

#[async_trait]
impl NodeConnector for GrpcConnector {
    fn connect(&self, node_id: &str, address: &str) -> Result<Arc<dyn NodeClient>, ClusterError> {
        let client = GrpcNodeClient::connect_lazy(address)?;
        Ok(Arc::new(RetryingNodeClient::new(
            node_id,
            Arc::new(client),
            self.retry,
        )))
    }

    async fn probe(&self, address: &str) -> Result<NodeMetadata, ClusterError> {
        GrpcNodeClient::connect(address).await?.metadata().await
    }
}
