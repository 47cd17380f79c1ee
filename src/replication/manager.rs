// ===========================================
// Cirrux - Multi-Cloud Object Storage
// (c) 2025 Neo Qiss. All Rights Reserved.
// Created by Neo Qiss - Unleash the power of Rust.
// ===========================================
// Replication manager: policy store, status registry, sync entry points

use chrono::Utc;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::encryption::{EncrypterFactory, EncrypterRegistry};
use crate::errors::Result;
use crate::storage::factory::StorageFactory;

use super::fs::FileSystem;
use super::store::PolicyStore;
use super::syncer::{SyncResult, Syncer};
use super::{ReplicationPolicy, ReplicationStatus};

/// Aggregate outcome of a `sync_all` fan-out.
#[derive(Debug, Clone, Default)]
pub struct SyncSummary {
    pub synced: u64,
    pub bytes: u64,
    pub failed: u64,
    pub orphans_deleted: u64,
    /// Policy id → error message for cycles that aborted.
    pub errors: HashMap<String, String>,
    pub partial: bool,
}

/// Owns the persistent policy set and the per-policy status records,
/// and runs sync cycles. Cycles for the same policy are serialized;
/// different policies run in parallel.
pub struct ReplicationManager {
    store: PolicyStore,
    factory: Arc<StorageFactory>,
    encrypters: Arc<EncrypterRegistry>,
    statuses: RwLock<HashMap<String, ReplicationStatus>>,
    sync_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    workers: usize,
}

impl ReplicationManager {
    pub async fn open(
        policy_file: impl AsRef<Path>,
        fs: Arc<dyn FileSystem>,
        factory: Arc<StorageFactory>,
    ) -> Result<Self> {
        let store = PolicyStore::open(policy_file.as_ref(), fs).await?;
        Ok(Self {
            store,
            factory,
            encrypters: Arc::new(EncrypterRegistry::new()),
            statuses: RwLock::new(HashMap::new()),
            sync_locks: Mutex::new(HashMap::new()),
            workers: 8,
        })
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Register the encrypter factory a policy's `provider` fields
    /// refer to.
    pub fn set_encrypter_factory(&self, provider: &str, factory: Arc<dyn EncrypterFactory>) {
        self.encrypters.register(provider, factory);
    }

    pub async fn add_policy(&self, policy: ReplicationPolicy) -> Result<()> {
        policy.validate(&self.factory)?;
        info!(policy = %policy.id, "replication policy added");
        self.store.add(policy).await
    }

    pub async fn remove_policy(&self, id: &str) -> Result<()> {
        self.store.remove(id).await?;
        self.statuses.write().await.remove(id);
        info!(policy = %id, "replication policy removed");
        Ok(())
    }

    pub async fn get_policy(&self, id: &str) -> Result<ReplicationPolicy> {
        self.store.get(id).await
    }

    pub async fn list_policies(&self) -> Vec<ReplicationPolicy> {
        self.store.list().await
    }

    pub async fn status(&self, id: &str) -> Option<ReplicationStatus> {
        self.statuses.read().await.get(id).cloned()
    }

    pub async fn all_statuses(&self) -> HashMap<String, ReplicationStatus> {
        self.statuses.read().await.clone()
    }

    async fn policy_lock(&self, id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.sync_locks.lock().await;
        locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Run one cycle for `id` now. Concurrent calls for the same id are
    /// serialized; the status record is swapped in whole at the end.
    pub async fn sync_policy(&self, id: &str, cancel: &CancellationToken) -> Result<SyncResult> {
        let policy = self.store.get(id).await?;
        let lock = self.policy_lock(id).await;
        let _guard = lock.lock().await;

        let started = Instant::now();
        let syncer =
            Syncer::new(self.factory.clone(), self.encrypters.clone()).with_workers(self.workers);
        let outcome = syncer.sync(&policy, cancel).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let mut statuses = self.statuses.write().await;
        let previous = statuses.get(id).cloned().unwrap_or_default();
        let next = match &outcome {
            Ok(result) => ReplicationStatus {
                total_objects_synced: previous.total_objects_synced + result.synced,
                total_bytes_synced: previous.total_bytes_synced + result.bytes,
                total_failed: previous.total_failed + result.failed,
                last_sync_time: Some(Utc::now()),
                last_sync_duration_ms: elapsed_ms,
                last_sync_partial: result.partial,
                last_error: None,
            },
            Err(e) => ReplicationStatus {
                last_sync_time: Some(Utc::now()),
                last_sync_duration_ms: elapsed_ms,
                last_sync_partial: false,
                last_error: Some(e.to_string()),
                ..previous
            },
        };
        statuses.insert(id.to_string(), next);
        outcome
    }

    /// Fan out to all enabled policies and aggregate the results.
    pub async fn sync_all(&self, cancel: &CancellationToken) -> SyncSummary {
        let policies = self.store.list().await;
        let runs = policies
            .into_iter()
            .filter(|p| p.enabled)
            .map(|p| async move {
                let outcome = self.sync_policy(&p.id, cancel).await;
                (p.id, outcome)
            });
        let outcomes = futures_util::future::join_all(runs).await;

        let mut summary = SyncSummary::default();
        for (id, outcome) in outcomes {
            match outcome {
                Ok(result) => {
                    summary.synced += result.synced;
                    summary.bytes += result.bytes;
                    summary.failed += result.failed;
                    summary.orphans_deleted += result.orphans_deleted;
                    summary.partial |= result.partial;
                }
                Err(e) => {
                    warn!(policy = %id, error = %e, "sync cycle aborted");
                    summary.errors.insert(id, e.to_string());
                }
            }
        }
        summary
    }
}
