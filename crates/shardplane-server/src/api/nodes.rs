//! Cluster State Endpoints
//!
//! GET /nodes lists the registry, read replicas included.
//! GET /version reports build information.

use super::AppState;
use crate::version;
use axum::{extract::State, Json};
use serde::Serialize;

/// Response for GET /nodes
#[derive(Debug, Serialize)]
pub struct NodesResponse {
    pub ready: bool,
    pub nodes: Vec<NodeInfo>,
}

/// Information about a single registered node
#[derive(Debug, Serialize)]
pub struct NodeInfo {
    pub node_id: String,
    pub address: String,
    pub shard_count: u64,
    pub available_disk: u64,
    /// Set for read replicas
    pub primary_id: Option<String>,
}

#[tracing::instrument(skip(state))]
pub async fn list_nodes(State(state): State<AppState>) -> Json<NodesResponse> {
    let registry = &state.context.registry;
    let mut nodes = Vec::new();
    for (id, _) in registry.members().await {
        // Departed between the two reads
        let Some(node) = registry.get_node(&id).await else {
            continue;
        };
        nodes.push(NodeInfo {
            node_id: node.info.id,
            address: node.info.address,
            shard_count: node.info.shard_count,
            available_disk: node.info.available_disk,
            primary_id: node.info.primary_id,
        });
    }

    Json(NodesResponse {
        ready: state.context.is_ready(),
        nodes,
    })
}

/// Response for GET /version
#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub version: &'static str,
    pub git_sha: &'static str,
    pub git_branch: &'static str,
    pub build_timestamp: &'static str,
}

#[tracing::instrument]
pub async fn get_version() -> Json<VersionResponse> {
    Json(VersionResponse {
        version: version::VERSION,
        git_sha: version::GIT_SHA,
        git_branch: version::GIT_BRANCH,
        build_timestamp: version::BUILD_TIMESTAMP,
    })
}
