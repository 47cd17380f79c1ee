// ===========================================
// Cirrux - Multi-Cloud Object Storage
// (c) 2025 Neo Qiss. All Rights Reserved.
// Created by Neo Qiss - Unleash the power of Rust.
// ===========================================
// Lifecycle policy model and in-memory policy set

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::archive::Archiver;
use crate::errors::{CirruxError, Result};

pub mod engine;
pub mod native;

pub use engine::{apply_policies, spawn_interval_applier, ApplyReport};
pub use native::{NativeAction, NativeLifecycle, NativeRule, RuleDocumentStore};

/// What to do with an object once it outlives its retention.
#[derive(Clone)]
pub enum LifecycleAction {
    /// Expire the object.
    Delete,
    /// Move the object bytes into an archive tier, keeping the key.
    Archive { destination: Arc<dyn Archiver> },
}

impl fmt::Debug for LifecycleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleAction::Delete => write!(f, "Delete"),
            LifecycleAction::Archive { .. } => write!(f, "Archive"),
        }
    }
}

impl LifecycleAction {
    pub fn kind(&self) -> &'static str {
        match self {
            LifecycleAction::Delete => "delete",
            LifecycleAction::Archive { .. } => "archive",
        }
    }
}

/// Rule selecting objects by prefix and age. The archive variant always
/// carries its destination sink, so a policy can never point nowhere.
#[derive(Debug, Clone)]
pub struct LifecyclePolicy {
    pub id: String,
    pub prefix: String,
    pub retention: Duration,
    pub action: LifecycleAction,
}

impl LifecyclePolicy {
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(CirruxError::InvalidPolicy("policy id must not be empty".to_string()));
        }
        if self.retention.is_zero() {
            return Err(CirruxError::InvalidPolicy(
                "retention duration must be greater than zero".to_string(),
            ));
        }
        crate::validate::validate_prefix(&self.prefix)
            .map_err(|e| CirruxError::InvalidPolicy(e.to_string()))?;
        Ok(())
    }
}

/// In-memory lifecycle policy set for backends without a native
/// lifecycle API. Single writer, many readers; adding an existing id
/// replaces the policy.
#[derive(Default)]
pub struct PolicySet {
    policies: RwLock<HashMap<String, LifecyclePolicy>>,
}

impl PolicySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, policy: LifecyclePolicy) -> Result<()> {
        policy.validate()?;
        self.policies.write().await.insert(policy.id.clone(), policy);
        Ok(())
    }

    pub async fn remove(&self, id: &str) -> Result<()> {
        self.policies
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| CirruxError::PolicyNotFound { id: id.to_string() })
    }

    pub async fn snapshot(&self) -> Vec<LifecyclePolicy> {
        let mut policies: Vec<LifecyclePolicy> = self.policies.read().await.values().cloned().collect();
        policies.sort_by(|a, b| a.id.cmp(&b.id));
        policies
    }
}
