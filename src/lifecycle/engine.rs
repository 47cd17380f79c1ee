// ===========================================
// Cirrux - Multi-Cloud Object Storage
// (c) 2025 Neo Qiss. All Rights Reserved.
// Created by Neo Qiss - Unleash the power of Rust.
// ===========================================
// Lifecycle applier for backends without native lifecycle support

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::{CirruxError, Result};
use crate::storage::{ListOptions, StorageBackend};

use super::{LifecycleAction, LifecyclePolicy};

/// Outcome of one applier run.
#[derive(Debug, Clone, Default)]
pub struct ApplyReport {
    pub examined: u64,
    pub deleted: u64,
    pub archived: u64,
    pub failed: u64,
    /// True when the run stopped early on cancellation.
    pub cancelled: bool,
}

/// Run every policy once against the backend's current keyspace. The
/// applier is stateless across runs; delete and archive are idempotent,
/// so re-running after a partial failure converges.
pub async fn apply_policies(
    store: &dyn StorageBackend,
    policies: &[LifecyclePolicy],
    cancel: &CancellationToken,
) -> Result<ApplyReport> {
    if cancel.is_cancelled() {
        return Err(CirruxError::Cancelled);
    }
    let mut report = ApplyReport::default();
    let now = Utc::now();

    'policies: for policy in policies {
        let mut token: Option<String> = None;
        loop {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break 'policies;
            }
            let page = store
                .list_with_options(ListOptions {
                    prefix: policy.prefix.clone(),
                    max_results: Some(1000),
                    continue_from: token.take(),
                    ..Default::default()
                })
                .await?;

            for object in &page.objects {
                if cancel.is_cancelled() {
                    report.cancelled = true;
                    break 'policies;
                }
                report.examined += 1;
                let age = now.signed_duration_since(object.last_modified);
                let retention = chrono::Duration::from_std(policy.retention)
                    .map_err(|e| CirruxError::InvalidPolicy(e.to_string()))?;
                if age <= retention {
                    continue;
                }
                match &policy.action {
                    LifecycleAction::Delete => match store.delete(&object.key).await {
                        Ok(()) => {
                            debug!(key = %object.key, policy = %policy.id, "expired object deleted");
                            report.deleted += 1;
                        }
                        Err(e) if e.is_not_found() => {
                            report.deleted += 1;
                        }
                        Err(e) => {
                            warn!(key = %object.key, policy = %policy.id, error = %e, "lifecycle delete failed");
                            report.failed += 1;
                        }
                    },
                    LifecycleAction::Archive { destination } => {
                        match store.archive(&object.key, destination.as_ref()).await {
                            Ok(()) => {
                                debug!(key = %object.key, policy = %policy.id, "object archived");
                                report.archived += 1;
                            }
                            Err(e) => {
                                warn!(key = %object.key, policy = %policy.id, error = %e, "lifecycle archive failed");
                                report.failed += 1;
                            }
                        }
                    }
                }
            }

            if !page.truncated {
                break;
            }
            token = page.next_token;
        }
    }

    info!(
        examined = report.examined,
        deleted = report.deleted,
        archived = report.archived,
        failed = report.failed,
        "lifecycle apply finished"
    );
    Ok(report)
}

/// Background applier loop. Runs the backend's own policy set every
/// `interval` until the token is cancelled. On-demand invocation stays
/// available through [`apply_policies`].
pub fn spawn_interval_applier(
    store: Arc<dyn StorageBackend>,
    interval: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            let policies = match store.get_policies().await {
                Ok(policies) => policies,
                Err(e) => {
                    warn!(error = %e, "could not load lifecycle policies");
                    continue;
                }
            };
            if let Err(e) = apply_policies(store.as_ref(), &policies, &cancel).await {
                warn!(error = %e, "lifecycle apply run failed");
            }
        }
    })
}
