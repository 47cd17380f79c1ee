// ===========================================
// Cirrux - Multi-Cloud Object Storage
// (c) 2025 Neo Qiss. All Rights Reserved.
// Created by Neo Qiss - Unleash the power of Rust.
// ===========================================
// Background sync scheduler

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::CirruxError;

use super::manager::ReplicationManager;

/// One background loop per policy: sleep for the policy's check
/// interval, then run a sync. Policy mutations are picked up on the
/// next tick; a removed policy ends its loop.
pub struct Scheduler {
    cancel: CancellationToken,
    handles: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    /// Spawn loops for every policy currently in the store.
    pub async fn start(manager: Arc<ReplicationManager>) -> Self {
        let cancel = CancellationToken::new();
        let mut handles = Vec::new();
        for policy in manager.list_policies().await {
            handles.push(Self::spawn_loop(manager.clone(), policy.id, cancel.clone()));
        }
        info!(loops = handles.len(), "replication scheduler started");
        Self {
            cancel,
            handles: std::sync::Mutex::new(handles),
        }
    }

    /// Add a loop for a policy created after startup.
    pub fn watch(&self, manager: Arc<ReplicationManager>, policy_id: &str) {
        let handle = Self::spawn_loop(manager, policy_id.to_string(), self.cancel.clone());
        self.handles.lock().unwrap().push(handle);
    }

    fn spawn_loop(
        manager: Arc<ReplicationManager>,
        policy_id: String,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                // Re-read the policy each tick so interval changes and
                // enable/disable flips take effect without a restart.
                let policy = match manager.get_policy(&policy_id).await {
                    Ok(policy) => policy,
                    Err(CirruxError::PolicyNotFound { .. }) => {
                        debug!(policy = %policy_id, "policy removed; stopping loop");
                        break;
                    }
                    Err(e) => {
                        warn!(policy = %policy_id, error = %e, "policy read failed");
                        break;
                    }
                };

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(policy.check_interval()) => {}
                }
                if !policy.enabled {
                    continue;
                }
                match manager.sync_policy(&policy_id, &cancel).await {
                    Ok(result) => {
                        debug!(
                            policy = %policy_id,
                            synced = result.synced,
                            failed = result.failed,
                            partial = result.partial,
                            "scheduled sync finished"
                        );
                    }
                    Err(CirruxError::PolicyNotFound { .. }) => break,
                    Err(CirruxError::Cancelled) => break,
                    Err(e) => {
                        // Recorded in the status; retried next tick.
                        warn!(policy = %policy_id, error = %e, "scheduled sync failed");
                    }
                }
            }
        })
    }

    /// Stop all loops and wait for them to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock().unwrap());
        for handle in handles {
            let _ = handle.await;
        }
        info!("replication scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::fs::MemoryFileSystem;
    use crate::replication::ReplicationPolicy;
    use crate::storage::factory::{Settings, StorageFactory};
    use crate::storage::stream_from_bytes;

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_runs_cycles_on_interval() {
        let factory = Arc::new(StorageFactory::new());
        let manager = Arc::new(
            ReplicationManager::open(
                "policies.json",
                Arc::new(MemoryFileSystem::new()),
                factory.clone(),
            )
            .await
            .unwrap(),
        );

        let source = factory
            .create(
                "memory",
                &Settings::from([("name".to_string(), "sched-src".to_string())]),
            )
            .await
            .unwrap();
        source.put("k", stream_from_bytes("v")).await.unwrap();

        manager
            .add_policy(ReplicationPolicy {
                id: "tick".to_string(),
                source_backend: "memory".to_string(),
                source_settings: Settings::from([("name".to_string(), "sched-src".to_string())]),
                source_prefix: String::new(),
                destination_backend: "memory".to_string(),
                destination_settings: Settings::from([(
                    "name".to_string(),
                    "sched-dst".to_string(),
                )]),
                destination_prefix: String::new(),
                mode: Default::default(),
                check_interval_secs: 5,
                enabled: true,
                delete_orphans: false,
                encryption: None,
            })
            .await
            .unwrap();

        let scheduler = Scheduler::start(manager.clone()).await;
        // Let the paused clock advance past one interval.
        tokio::time::sleep(std::time::Duration::from_secs(6)).await;
        tokio::task::yield_now().await;

        let dest = factory
            .create(
                "memory",
                &Settings::from([("name".to_string(), "sched-dst".to_string())]),
            )
            .await
            .unwrap();
        assert!(dest.exists("k").await.unwrap());

        scheduler.shutdown().await;
    }
}
