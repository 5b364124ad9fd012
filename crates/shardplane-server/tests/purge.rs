mod common;

use common::Cluster;
use shardplane_core::{ReleaseChannel, SemanticModel};
use shardplane_server::config::ClusterSettings;
use shardplane_server::purge::{detect_orphan_shards, purge_kb, purge_kb_storage, purge_orphan_shards};
use std::collections::BTreeSet;

async fn create(cluster: &Cluster, kbid: &str) {
    cluster
        .ctx
        .kb
        .create(kbid, kbid, SemanticModel::default(), ReleaseChannel::Stable)
        .await
        .unwrap();
}

fn replica_ids(cluster: &Cluster, nodes: &[&str]) -> BTreeSet<String> {
    nodes
        .iter()
        .flat_map(|id| cluster.node(id).shard_ids())
        .collect()
}

#[tokio::test]
async fn test_unreachable_nodes_leave_orphans_that_the_sweep_removes() {
    let nodes = ["n0", "n1"];
    let cluster = Cluster::start(&nodes, ClusterSettings::default()).await;
    create(&cluster, "kept").await;
    create(&cluster, "doomed").await;
    let kept = cluster.ctx.manager.get_shards_by_kbid("kept").await.unwrap();
    let before = replica_ids(&cluster, &nodes);

    // Nodes drop out while the knowledge box is deleted and purged
    for id in nodes {
        cluster.node(id).set_unreachable(true);
    }
    cluster.ctx.kb.delete("doomed").await.unwrap();
    cluster.report(&[]).await;
    let report = purge_kb(&cluster.ctx.kb).await.unwrap();
    assert_eq!(report.purged, vec!["doomed".to_string()]);

    // and come back afterwards with the shards still on disk
    for id in nodes {
        cluster.node(id).set_unreachable(false);
    }
    cluster.report(&nodes).await;
    assert_eq!(replica_ids(&cluster, &nodes), before);

    let orphans = detect_orphan_shards(&cluster.ctx.registry, cluster.ctx.driver.as_ref())
        .await
        .unwrap();
    let expected: BTreeSet<String> = before
        .difference(&kept.referenced_ids())
        .cloned()
        .collect();
    assert_eq!(orphans.keys().cloned().collect::<BTreeSet<_>>(), expected);
    assert_eq!(expected.len(), 2);

    let first = purge_orphan_shards(&cluster.ctx.registry, cluster.ctx.driver.as_ref())
        .await
        .unwrap();
    assert_eq!(first.deleted.len(), 2);
    assert!(first.failed.is_empty());

    let second = purge_orphan_shards(&cluster.ctx.registry, cluster.ctx.driver.as_ref())
        .await
        .unwrap();
    assert!(second.deleted.is_empty());
    assert!(second.failed.is_empty());

    let remaining = replica_ids(&cluster, &nodes);
    assert_eq!(remaining.len(), 2);
    assert!(remaining.iter().all(|id| kept.referenced_ids().contains(id)));
}

#[tokio::test]
async fn test_deletion_record_walks_through_both_passes() {
    let nodes = ["n0", "n1"];
    let cluster = Cluster::start(&nodes, ClusterSettings::default()).await;
    create(&cluster, "kb1").await;
    cluster.storage.lag_bucket_deletion("kb1", 2);

    cluster.ctx.kb.delete("kb1").await.unwrap();
    assert!(replica_ids(&cluster, &nodes).is_empty());

    let report = purge_kb(&cluster.ctx.kb).await.unwrap();
    assert_eq!(report.purged, vec!["kb1".to_string()]);

    let driver = cluster.ctx.driver.as_ref();
    let storage = cluster.ctx.storage.as_ref();
    for _ in 0..2 {
        let report = purge_kb_storage(driver, storage).await.unwrap();
        assert_eq!(report.retained, vec!["kb1".to_string()]);
    }
    let report = purge_kb_storage(driver, storage).await.unwrap();
    assert_eq!(report.purged, vec!["kb1".to_string()]);

    let mut txn = driver.begin(true).await.unwrap();
    assert!(txn.keys("/", None, true).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_purge_is_retried_next_run() {
    let nodes = ["n0", "n1"];
    let cluster = Cluster::start(&nodes, ClusterSettings::default()).await;
    create(&cluster, "kb1").await;

    cluster.node("n0").set_unreachable(true);
    cluster.ctx.kb.delete("kb1").await.unwrap();

    let report = purge_kb(&cluster.ctx.kb).await.unwrap();
    assert_eq!(report.retained, vec!["kb1".to_string()]);
    assert_eq!(cluster.node("n0").shard_ids().len(), 1);

    cluster.node("n0").set_unreachable(false);
    let report = purge_kb(&cluster.ctx.kb).await.unwrap();
    assert_eq!(report.purged, vec!["kb1".to_string()]);
    assert!(replica_ids(&cluster, &nodes).is_empty());
}
