//! etcd metadata driver
//!
//! A transaction pins the etcd revision current at `begin` and reads at that
//! revision. Writes are buffered and committed in one etcd `Txn` guarded by a
//! `mod_revision` compare on every written key, which gives the same first
//! committer wins behaviour as the in-memory driver.

use super::merge_keys;
use crate::config::ClusterSettings;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use etcd_client::{Client, Compare, CompareOp, GetOptions, Txn, TxnOp};
use shardplane_core::{Driver, MaindbError, Transaction};
use std::collections::BTreeMap;
use tracing::{debug, warn};

fn backend(err: etcd_client::Error) -> MaindbError {
    MaindbError::Backend(err.to_string())
}

#[derive(Clone)]
pub struct EtcdDriver {
    client: Client,
}

impl EtcdDriver {
    /// Connect to etcd with exponential backoff
    pub async fn connect(settings: &ClusterSettings) -> Result<Self> {
        let client = connect_client(settings).await?;
        Ok(Self { client })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

/// Shared by the driver and the etcd membership source.
pub async fn connect_client(settings: &ClusterSettings) -> Result<Client> {
    let backoff = ExponentialBackoff {
        initial_interval: settings.etcd_backoff_initial,
        max_interval: settings.etcd_backoff_max,
        max_elapsed_time: Some(settings.etcd_backoff_max_elapsed),
        multiplier: settings.retry.multiplier,
        ..Default::default()
    };
    let endpoints = &settings.etcd_endpoints;

    retry(backoff, || async {
        match Client::connect(endpoints, None).await {
            Ok(client) => {
                debug!(endpoints = ?endpoints, "Connected to etcd");
                Ok(client)
            }
            Err(e) => {
                warn!(error = %e, "etcd connection failed, retrying");
                Err(backoff::Error::transient(e))
            }
        }
    })
    .await
    .map_err(|e| anyhow!("Failed to connect to etcd after retries: {e}"))
}

#[async_trait]
impl Driver for EtcdDriver {
    async fn begin(&self, read_only: bool) -> Result<Box<dyn Transaction>, MaindbError> {
        let mut client = self.client.clone();
        let response = client
            .get("/", Some(GetOptions::new().with_count_only()))
            .await
            .map_err(backend)?;
        let revision = response
            .header()
            .map(|h| h.revision())
            .ok_or_else(|| MaindbError::Backend("etcd response without header".into()))?;

        Ok(Box::new(EtcdTransaction {
            client,
            revision,
            writes: BTreeMap::new(),
            read_only,
        }))
    }

    async fn check(&self) -> Result<(), MaindbError> {
        let mut client = self.client.clone();
        client.status().await.map_err(backend)?;
        Ok(())
    }
}

pub struct EtcdTransaction {
    client: Client,
    revision: i64,
    writes: BTreeMap<String, Option<Vec<u8>>>,
    read_only: bool,
}

impl EtcdTransaction {
    fn check_writable(&self) -> Result<(), MaindbError> {
        if self.read_only {
            Err(MaindbError::Backend("write in read-only transaction".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Transaction for EtcdTransaction {
    async fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>, MaindbError> {
        if let Some(pending) = self.writes.get(key) {
            return Ok(pending.clone());
        }
        let response = self
            .client
            .get(key, Some(GetOptions::new().with_revision(self.revision)))
            .await
            .map_err(backend)?;
        Ok(response.kvs().first().map(|kv| kv.value().to_vec()))
    }

    async fn set(&mut self, key: &str, value: Vec<u8>) -> Result<(), MaindbError> {
        self.check_writable()?;
        self.writes.insert(key.to_string(), Some(value));
        Ok(())
    }

    async fn delete(&mut self, key: &str) -> Result<(), MaindbError> {
        self.check_writable()?;
        self.writes.insert(key.to_string(), None);
        Ok(())
    }

    async fn keys(
        &mut self,
        prefix: &str,
        count: Option<usize>,
        include_start: bool,
    ) -> Result<Vec<String>, MaindbError> {
        let response = self
            .client
            .get(
                prefix,
                Some(
                    GetOptions::new()
                        .with_prefix()
                        .with_keys_only()
                        .with_revision(self.revision),
                ),
            )
            .await
            .map_err(backend)?;
        let stored = response
            .kvs()
            .iter()
            .map(|kv| String::from_utf8_lossy(kv.key()).into_owned());
        Ok(merge_keys(
            stored,
            &self.writes,
            prefix,
            count,
            include_start,
        ))
    }

    async fn commit(self: Box<Self>) -> Result<(), MaindbError> {
        if self.writes.is_empty() {
            return Ok(());
        }
        let EtcdTransaction {
            mut client,
            revision,
            writes,
            ..
        } = *self;

        let compares: Vec<Compare> = writes
            .keys()
            .map(|key| Compare::mod_revision(key.as_str(), CompareOp::Less, revision + 1))
            .collect();
        let ops: Vec<TxnOp> = writes
            .iter()
            .map(|(key, value)| match value {
                Some(value) => TxnOp::put(key.as_str(), value.clone(), None),
                None => TxnOp::delete(key.as_str(), None),
            })
            .collect();

        let response = client
            .txn(Txn::new().when(compares).and_then(ops))
            .await
            .map_err(backend)?;
        if !response.succeeded() {
            let key = writes.keys().next().cloned().unwrap_or_default();
            return Err(MaindbError::Conflict { key });
        }
        Ok(())
    }

    async fn abort(self: Box<Self>) -> Result<(), MaindbError> {
        Ok(())
    }
}
