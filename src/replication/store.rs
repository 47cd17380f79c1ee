// ===========================================
// Cirrux - Multi-Cloud Object Storage
// (c) 2025 Neo Qiss. All Rights Reserved.
// Created by Neo Qiss - Unleash the power of Rust.
// ===========================================
// Persistent replication policy store

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::errors::{CirruxError, Result};

use super::fs::FileSystem;
use super::ReplicationPolicy;

const DOCUMENT_VERSION: u32 = 1;

#[derive(Debug, Default, Serialize, Deserialize)]
struct PolicyDocument {
    #[serde(default)]
    policies: Vec<ReplicationPolicy>,
    #[serde(default)]
    version: u32,
}

/// JSON-backed policy set. Every mutation serializes the whole document
/// and renames it into place; the in-memory copy is only updated after
/// the write lands, so disk and memory never diverge. Reads hand out
/// deep copies.
pub struct PolicyStore {
    path: PathBuf,
    fs: Arc<dyn FileSystem>,
    policies: RwLock<Vec<ReplicationPolicy>>,
}

impl PolicyStore {
    /// Open the store, loading any existing document. A missing file is
    /// an empty store; unknown fields in the document are ignored.
    pub async fn open(path: impl Into<PathBuf>, fs: Arc<dyn FileSystem>) -> Result<Self> {
        let path = path.into();
        let policies = match fs.read(&path).await {
            Ok(raw) => {
                let doc: PolicyDocument = serde_json::from_slice(&raw)?;
                doc.policies
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(CirruxError::Backend(format!("policy file read failed: {}", e))),
        };
        Ok(Self {
            path,
            fs,
            policies: RwLock::new(policies),
        })
    }

    async fn persist(&self, policies: &[ReplicationPolicy]) -> Result<()> {
        let doc = PolicyDocument {
            policies: policies.to_vec(),
            version: DOCUMENT_VERSION,
        };
        let raw = serde_json::to_vec_pretty(&doc)?;
        self.fs
            .write_atomic(&self.path, &raw)
            .await
            .map_err(|e| CirruxError::Backend(format!("policy file write failed: {}", e)))
    }

    /// Insert or replace a policy. The store is only mutated once the
    /// document write succeeds.
    pub async fn add(&self, policy: ReplicationPolicy) -> Result<()> {
        let mut guard = self.policies.write().await;
        let mut next: Vec<ReplicationPolicy> = guard
            .iter()
            .filter(|p| p.id != policy.id)
            .cloned()
            .collect();
        next.push(policy);
        self.persist(&next).await?;
        *guard = next;
        Ok(())
    }

    pub async fn remove(&self, id: &str) -> Result<()> {
        let mut guard = self.policies.write().await;
        if !guard.iter().any(|p| p.id == id) {
            return Err(CirruxError::PolicyNotFound { id: id.to_string() });
        }
        let next: Vec<ReplicationPolicy> = guard.iter().filter(|p| p.id != id).cloned().collect();
        self.persist(&next).await?;
        *guard = next;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<ReplicationPolicy> {
        self.policies
            .read()
            .await
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| CirruxError::PolicyNotFound { id: id.to_string() })
    }

    pub async fn list(&self) -> Vec<ReplicationPolicy> {
        self.policies.read().await.clone()
    }
}
