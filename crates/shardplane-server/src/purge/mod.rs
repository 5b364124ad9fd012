//! Deletion purge jobs
//!
//! A deleted knowledge box leaves a [`KbDeletion`] record behind. Two passes
//! move it forward:
//!
//! ```text
//! PENDING_METADATA_PURGE --purge_kb--> PENDING_STORAGE_PURGE --purge_kb_storage--> DONE (removed)
//! ```
//!
//! Both passes are safe to run repeatedly. A record whose step fails stays
//! where it is, with its attempt counter bumped, and is picked up again by
//! the next run.

pub mod orphans;

pub use orphans::{detect_orphan_shards, purge_orphan_shards, OrphanPurgeReport};

use crate::kb::KnowledgeBox;
use crate::maindb::{get_json, set_json};
use crate::observability::{errors, events};
use shardplane_core::{
    keys, ClusterError, DeletionState, Driver, KbDeletion, Storage,
};
use tracing::{debug, error, info, warn};

/// Outcome of one purge pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PurgeReport {
    /// Knowledge boxes whose record moved forward
    pub purged: Vec<String>,
    /// Knowledge boxes left for the next run
    pub retained: Vec<String>,
}

/// Deletion records currently in `state`.
pub async fn pending_deletions(
    driver: &dyn Driver,
    state: DeletionState,
) -> Result<Vec<KbDeletion>, ClusterError> {
    let mut txn = driver.begin(true).await?;
    let mut records = Vec::new();
    for key in txn.keys(keys::DELETIONS_PREFIX, None, false).await? {
        match get_json::<KbDeletion>(&mut *txn, &key).await {
            Ok(Some(record)) if record.state == state => records.push(record),
            Ok(_) => {}
            Err(e) => errors::capture("read_deletion", &key, &e),
        }
    }
    txn.abort().await?;
    Ok(records)
}

/// Persist `record`, removing it once it reached `DONE`.
async fn save(driver: &dyn Driver, record: &KbDeletion) -> Result<(), ClusterError> {
    let key = keys::kb_deletion(&record.kbid);
    let mut txn = driver.begin(false).await?;
    if record.is_done() {
        txn.delete(&key).await?;
    } else {
        set_json(&mut *txn, &key, record).await?;
    }
    txn.commit().await?;
    Ok(())
}

async fn retain(driver: &dyn Driver, mut record: KbDeletion, report: &mut PurgeReport) {
    record.attempts += 1;
    if let Err(e) = save(driver, &record).await {
        errors::capture("save_deletion", &record.kbid, &e);
    }
    report.retained.push(record.kbid);
}

/// Purge metadata and node shards of every knowledge box pending deletion,
/// then schedule its storage bucket for deletion.
pub async fn purge_kb(kb: &KnowledgeBox) -> Result<PurgeReport, ClusterError> {
    let driver = kb.manager().driver().as_ref();
    let storage = kb.manager().storage().as_ref();
    let mut report = PurgeReport::default();

    for mut record in pending_deletions(driver, DeletionState::PendingMetadataPurge).await? {
        let kbid = record.kbid.clone();
        debug!(kbid = %kbid, attempts = record.attempts, "Purging knowledge box");

        match kb.purge(&kbid).await {
            Ok(()) => {}
            Err(e) if e.is_retryable_purge_condition() => {
                warn!(
                    kbid = %kbid,
                    error = %e,
                    attempts = record.attempts + 1,
                    "Could not purge knowledge box, will retry on the next run"
                );
                retain(driver, record, &mut report).await;
                continue;
            }
            Err(e) => {
                errors::capture("purge_kb", &kbid, &e);
                retain(driver, record, &mut report).await;
                continue;
            }
        }

        match storage.schedule_delete_kb(&kbid).await {
            Ok(true) => {}
            Ok(false) => error!(kbid = %kbid, "Knowledge box does not exist on storage"),
            Err(e) => errors::capture_any("schedule_delete_kb", &kbid, &e),
        }

        record.advance();
        match save(driver, &record).await {
            Ok(()) => {
                events::kb_purged(&kbid);
                report.purged.push(kbid);
            }
            Err(e) => {
                errors::capture("save_deletion", &kbid, &e);
                report.retained.push(kbid);
            }
        }
    }

    info!(
        purged = report.purged.len(),
        retained = report.retained.len(),
        "Knowledge box purge pass finished"
    );
    Ok(report)
}

/// Delete the storage bucket of every knowledge box whose metadata is gone.
///
/// Buckets are emptied asynchronously by the storage layer, so a bucket
/// that still holds data keeps its record for the next run.
pub async fn purge_kb_storage(
    driver: &dyn Driver,
    storage: &dyn Storage,
) -> Result<PurgeReport, ClusterError> {
    let mut report = PurgeReport::default();

    for mut record in pending_deletions(driver, DeletionState::PendingStoragePurge).await? {
        let kbid = record.kbid.clone();
        match storage.delete_kb(&kbid).await {
            Ok(true) => {
                record.advance();
                match save(driver, &record).await {
                    Ok(()) => {
                        events::kb_storage_purged(&kbid);
                        report.purged.push(kbid);
                    }
                    Err(e) => {
                        errors::capture("save_deletion", &kbid, &e);
                        report.retained.push(kbid);
                    }
                }
            }
            Ok(false) => {
                debug!(kbid = %kbid, "Storage bucket not empty yet");
                retain(driver, record, &mut report).await;
            }
            Err(e) => {
                errors::capture_any("delete_kb", &kbid, &e);
                retain(driver, record, &mut report).await;
            }
        }
    }

    info!(
        purged = report.purged.len(),
        retained = report.retained.len(),
        "Storage purge pass finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::node::LocalConnector;
    use crate::cluster::NodeRegistry;
    use crate::config::ClusterSettings;
    use crate::indexing::NodeIndexing;
    use crate::maindb::MemoryDriver;
    use crate::shards::KbShardManager;
    use crate::storage::MemoryStorage;
    use shardplane_core::{ReleaseChannel, SemanticModel};
    use std::sync::Arc;

    struct Fixture {
        kb: KnowledgeBox,
        connector: Arc<LocalConnector>,
        storage: Arc<MemoryStorage>,
    }

    async fn fixture() -> Fixture {
        let storage = Arc::new(MemoryStorage::new());
        let connector = Arc::new(LocalConnector::new());
        let registry = NodeRegistry::new(connector.clone());
        for id in ["n0", "n1"] {
            registry
                .add_node(id, &format!("{id}:10009"), 0, 0, None)
                .await
                .unwrap();
        }
        let manager = KbShardManager::new(
            registry.clone(),
            Arc::new(MemoryDriver::new()),
            storage.clone(),
            Arc::new(NodeIndexing::new(registry)),
            Arc::new(ClusterSettings::default()),
        );
        let kb = KnowledgeBox::new(manager);
        kb.create("kb1", "kb1", SemanticModel::default(), ReleaseChannel::Stable)
            .await
            .unwrap();
        Fixture {
            kb,
            connector,
            storage,
        }
    }

    async fn record(driver: &dyn Driver, kbid: &str) -> Option<KbDeletion> {
        let mut txn = driver.begin(true).await.unwrap();
        get_json(&mut *txn, &keys::kb_deletion(kbid)).await.unwrap()
    }

    #[tokio::test]
    async fn test_full_deletion_lifecycle() {
        let f = fixture().await;
        let driver = f.kb.manager().driver().as_ref();
        f.kb.delete("kb1").await.unwrap();

        let report = purge_kb(&f.kb).await.unwrap();
        assert_eq!(report.purged, vec!["kb1".to_string()]);
        let pending = record(driver, "kb1").await.unwrap();
        assert_eq!(pending.state, DeletionState::PendingStoragePurge);
        assert!(f.storage.is_scheduled("kb1"));

        let report = purge_kb_storage(driver, f.storage.as_ref()).await.unwrap();
        assert_eq!(report.purged, vec!["kb1".to_string()]);
        assert!(record(driver, "kb1").await.is_none());

        let mut txn = driver.begin(true).await.unwrap();
        assert!(txn.keys("/", None, true).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_node_retains_record() {
        let f = fixture().await;
        let driver = f.kb.manager().driver().as_ref();
        f.connector.get("n1").unwrap().set_unreachable(true);
        f.kb.delete("kb1").await.unwrap();

        let report = purge_kb(&f.kb).await.unwrap();
        assert_eq!(report.retained, vec!["kb1".to_string()]);
        let pending = record(driver, "kb1").await.unwrap();
        assert_eq!(pending.state, DeletionState::PendingMetadataPurge);
        assert_eq!(pending.attempts, 1);

        f.connector.get("n1").unwrap().set_unreachable(false);
        let report = purge_kb(&f.kb).await.unwrap();
        assert_eq!(report.purged, vec!["kb1".to_string()]);
        assert!(f.connector.get("n1").unwrap().shard_ids().is_empty());
    }

    #[tokio::test]
    async fn test_lagging_bucket_retains_record() {
        let f = fixture().await;
        let driver = f.kb.manager().driver().as_ref();
        f.storage.lag_bucket_deletion("kb1", 1);
        f.kb.delete("kb1").await.unwrap();
        purge_kb(&f.kb).await.unwrap();

        let report = purge_kb_storage(driver, f.storage.as_ref()).await.unwrap();
        assert_eq!(report.retained, vec!["kb1".to_string()]);
        assert_eq!(record(driver, "kb1").await.unwrap().attempts, 1);

        let report = purge_kb_storage(driver, f.storage.as_ref()).await.unwrap();
        assert_eq!(report.purged, vec!["kb1".to_string()]);
        assert!(record(driver, "kb1").await.is_none());
    }

    #[tokio::test]
    async fn test_passes_only_pick_their_state() {
        let f = fixture().await;
        let driver = f.kb.manager().driver().as_ref();
        f.kb.delete("kb1").await.unwrap();

        let report = purge_kb_storage(driver, f.storage.as_ref()).await.unwrap();
        assert_eq!(report, PurgeReport::default());

        purge_kb(&f.kb).await.unwrap();
        let report = purge_kb(&f.kb).await.unwrap();
        assert_eq!(report, PurgeReport::default());
    }
}
