//! Discovery Controller
//!
//! Periodic reconciliation loop. Each tick polls the membership source and
//! applies the result; lists pushed through the optional channel are applied
//! as soon as they arrive. Readiness flips after the first successful pass.

use super::sources::MembershipSource;
use super::{ClusterDiscovery, ReconcileSummary};
use anyhow::{anyhow, Result};
use shardplane_core::MemberReport;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub struct DiscoveryController {
    discovery: ClusterDiscovery,
    source: Box<dyn MembershipSource>,
    interval: Duration,
    readiness: Arc<AtomicBool>,
    /// Taken by `run()`
    shutdown_rx: Option<mpsc::UnboundedReceiver<()>>,
    push_rx: Option<mpsc::Receiver<Vec<MemberReport>>>,
}

impl DiscoveryController {
    pub fn new(
        discovery: ClusterDiscovery,
        source: Box<dyn MembershipSource>,
        interval: Duration,
        readiness: Arc<AtomicBool>,
        shutdown_rx: mpsc::UnboundedReceiver<()>,
    ) -> Self {
        Self {
            discovery,
            source,
            interval,
            readiness,
            shutdown_rx: Some(shutdown_rx),
            push_rx: None,
        }
    }

    /// Also accept membership lists pushed by an external protocol.
    pub fn with_push(mut self, push_rx: mpsc::Receiver<Vec<MemberReport>>) -> Self {
        self.push_rx = Some(push_rx);
        self
    }

    /// Poll the source once and reconcile.
    pub async fn run_once(&mut self) -> Result<ReconcileSummary> {
        let members = self.source.poll().await?;
        Ok(self.apply(members).await)
    }

    async fn apply(&mut self, members: Vec<MemberReport>) -> ReconcileSummary {
        let summary = self.discovery.update_members(members).await;
        if !self.readiness.swap(true, Ordering::SeqCst) {
            let nodes = self.discovery.registry().len().await;
            info!(
                nodes,
                "Discovery: first reconciliation pass complete"
            );
        }
        summary
    }

    pub async fn run(mut self) -> Result<()> {
        let mut shutdown_rx = self
            .shutdown_rx
            .take()
            .ok_or_else(|| anyhow!("Shutdown receiver already consumed"))?;
        let mut push_rx = self.push_rx.take();

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        debug!(interval = ?self.interval, "Discovery loop started");

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Discovery: received shutdown signal");
                    return Ok(());
                }

                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        warn!(error = %e, "Membership poll failed, keeping current registry");
                    }
                }

                pushed = next_push(&mut push_rx) => {
                    match pushed {
                        Some(members) => {
                            self.apply(members).await;
                        }
                        None => {
                            debug!("Membership push channel closed");
                            push_rx = None;
                        }
                    }
                }
            }
        }
    }
}

async fn next_push(rx: &mut Option<mpsc::Receiver<Vec<MemberReport>>>) -> Option<Vec<MemberReport>> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::node::LocalConnector;
    use crate::cluster::registry::NodeRegistry;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Returns queued lists in order, then repeats the last one
    struct Scripted(Mutex<Vec<Vec<MemberReport>>>);

    #[async_trait]
    impl MembershipSource for Scripted {
        async fn poll(&mut self) -> Result<Vec<MemberReport>> {
            let mut queue = self.0.lock().map_err(|_| anyhow!("poisoned"))?;
            if queue.len() > 1 {
                Ok(queue.remove(0))
            } else {
                queue.first().cloned().ok_or_else(|| anyhow!("source down"))
            }
        }
    }

    fn member(id: &str) -> MemberReport {
        MemberReport {
            node_id: id.into(),
            address: format!("{id}:1"),
            shard_count: 0,
            available_disk: 0,
            primary_id: None,
        }
    }

    fn controller(
        script: Vec<Vec<MemberReport>>,
    ) -> (DiscoveryController, Arc<AtomicBool>, mpsc::UnboundedSender<()>) {
        let registry = NodeRegistry::new(Arc::new(LocalConnector::new()));
        let readiness = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::unbounded_channel();
        let controller = DiscoveryController::new(
            ClusterDiscovery::new(registry),
            Box::new(Scripted(Mutex::new(script))),
            Duration::from_millis(10),
            readiness.clone(),
            rx,
        );
        (controller, readiness, tx)
    }

    #[tokio::test]
    async fn test_failed_poll_keeps_not_ready() {
        let (mut controller, readiness, _tx) = controller(vec![]);
        assert!(controller.run_once().await.is_err());
        assert!(!readiness.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_run_once_sets_readiness() {
        let (mut controller, readiness, _tx) =
            controller(vec![vec![member("A"), member("B")], vec![member("A")]]);

        let summary = controller.run_once().await.unwrap();
        assert_eq!(summary.added.len(), 2);
        assert!(readiness.load(Ordering::SeqCst));

        let summary = controller.run_once().await.unwrap();
        assert_eq!(summary.removed, vec!["B"]);
    }

    #[tokio::test]
    async fn test_loop_applies_pushes_and_stops_on_shutdown() {
        let (controller, readiness, shutdown) = controller(vec![vec![member("A")]]);
        let registry = controller.discovery.registry().clone();
        let (push_tx, push_rx) = mpsc::channel(4);
        let handle = tokio::spawn(controller.with_push(push_rx).run());

        push_tx.send(vec![member("A"), member("Z")]).await.unwrap();
        for _ in 0..100 {
            if registry.get_node("Z").await.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(readiness.load(Ordering::SeqCst));

        shutdown.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }
}
