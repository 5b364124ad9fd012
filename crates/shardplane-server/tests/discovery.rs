mod common;

use common::{member, Cluster};
use shardplane_core::MemberReport;
use shardplane_server::config::ClusterSettings;
use std::collections::BTreeSet;

async fn listed(cluster: &Cluster) -> BTreeSet<String> {
    cluster
        .ctx
        .registry
        .list_nodes()
        .await
        .into_iter()
        .map(|n| n.info.id)
        .collect()
}

fn ids(ids: &[&str]) -> BTreeSet<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_reconciliation_converges_regardless_of_prior_state() {
    let cluster = Cluster::start(&["stale", "a"], ClusterSettings::default()).await;

    cluster.report(&["a", "b", "c"]).await;
    assert_eq!(listed(&cluster).await, ids(&["a", "b", "c"]));

    cluster.report(&["a", "c"]).await;
    assert_eq!(listed(&cluster).await, ids(&["a", "c"]));
}

#[tokio::test]
async fn test_read_replicas_are_tracked_apart() {
    let cluster = Cluster::start(&["a"], ClusterSettings::default()).await;
    let replica = MemberReport {
        primary_id: Some("a".to_string()),
        ..member("a-ro")
    };

    let summary = cluster
        .discovery
        .update_members(vec![member("a"), replica])
        .await;
    assert_eq!(summary.added, vec!["a-ro".to_string()]);

    assert_eq!(listed(&cluster).await, ids(&["a"]));
    let replicas = cluster.ctx.registry.get_read_replicas("a").await;
    assert_eq!(replicas.len(), 1);
    assert_eq!(replicas[0].info.id, "a-ro");

    cluster.report(&["a"]).await;
    assert!(cluster.ctx.registry.get_read_replicas("a").await.is_empty());
}
