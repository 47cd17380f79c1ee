// ===========================================
// Cirrux - Multi-Cloud Object Storage
// (c) 2025 Neo Qiss. All Rights Reserved.
// Created by Neo Qiss - Unleash the power of Rust.
// ===========================================
// Cross-backend replication: policies, store, syncer, scheduler

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::{CirruxError, Result};
use crate::storage::factory::{Settings, StorageFactory};
use crate::validate::validate_prefix;

pub mod fs;
pub mod manager;
pub mod scheduler;
pub mod store;
pub mod syncer;

// Re-export commonly used types
pub use fs::{FileSystem, MemoryFileSystem, OsFileSystem};
pub use manager::{ReplicationManager, SyncSummary};
pub use scheduler::Scheduler;
pub use store::PolicyStore;
pub use syncer::{SyncResult, Syncer};

/// How object bytes travel between the two DEK domains.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Decrypt with the source DEK, re-encrypt with the destination DEK.
    /// The destination is usable on its own.
    #[default]
    Transparent,
    /// Copy ciphertext unchanged. Faster; both sides must share a DEK.
    Opaque,
}

/// One optional encryption layer of a replication policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Name of a factory in the manager's encrypter registry.
    #[serde(default)]
    pub provider: String,
    /// Overrides the factory's own default key id when set.
    #[serde(default)]
    pub default_key_id: Option<String>,
}

impl EncryptionConfig {
    pub fn is_active(&self) -> bool {
        self.enabled
    }
}

/// The three independent layers, outermost first: at-rest on the
/// backends, the source DEK, the destination DEK.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationEncryption {
    #[serde(default)]
    pub backend: Option<EncryptionConfig>,
    #[serde(default)]
    pub source: Option<EncryptionConfig>,
    #[serde(default)]
    pub destination: Option<EncryptionConfig>,
}

impl ReplicationEncryption {
    fn layer(config: &Option<EncryptionConfig>) -> Option<&EncryptionConfig> {
        config.as_ref().filter(|c| c.is_active())
    }

    pub fn backend_layer(&self) -> Option<&EncryptionConfig> {
        Self::layer(&self.backend)
    }

    pub fn source_layer(&self) -> Option<&EncryptionConfig> {
        Self::layer(&self.source)
    }

    pub fn destination_layer(&self) -> Option<&EncryptionConfig> {
        Self::layer(&self.destination)
    }
}

fn default_enabled() -> bool {
    true
}

/// Rule defining a continuous mirror from one backend to another.
/// Unknown fields in the persisted form are tolerated for forward
/// compatibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationPolicy {
    pub id: String,
    pub source_backend: String,
    #[serde(default)]
    pub source_settings: Settings,
    #[serde(default)]
    pub source_prefix: String,
    pub destination_backend: String,
    #[serde(default)]
    pub destination_settings: Settings,
    #[serde(default)]
    pub destination_prefix: String,
    #[serde(default)]
    pub mode: SyncMode,
    /// Seconds between scheduled sync cycles.
    pub check_interval_secs: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Remove destination keys with no source counterpart. Off by
    /// default; never applied after an incomplete source listing.
    #[serde(default)]
    pub delete_orphans: bool,
    #[serde(default)]
    pub encryption: Option<ReplicationEncryption>,
}

impl ReplicationPolicy {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn encryption(&self) -> ReplicationEncryption {
        self.encryption.clone().unwrap_or_default()
    }

    /// Map a source key into the destination keyspace.
    pub fn destination_key(&self, source_key: &str) -> Option<String> {
        let stripped = source_key.strip_prefix(&self.source_prefix)?;
        Some(format!("{}{}", self.destination_prefix, stripped))
    }

    /// Map a destination key back into the source keyspace.
    pub fn source_key(&self, destination_key: &str) -> Option<String> {
        let stripped = destination_key.strip_prefix(&self.destination_prefix)?;
        Some(format!("{}{}", self.source_prefix, stripped))
    }

    pub fn validate(&self, factory: &StorageFactory) -> Result<()> {
        if self.id.is_empty() {
            return Err(CirruxError::InvalidPolicy(
                "replication policy id must not be empty".to_string(),
            ));
        }
        if self.check_interval_secs == 0 {
            return Err(CirruxError::InvalidPolicy(
                "check interval must be greater than zero".to_string(),
            ));
        }
        validate_prefix(&self.source_prefix)
            .map_err(|e| CirruxError::InvalidPolicy(e.to_string()))?;
        validate_prefix(&self.destination_prefix)
            .map_err(|e| CirruxError::InvalidPolicy(e.to_string()))?;
        for backend_type in [&self.source_backend, &self.destination_backend] {
            if !factory.has_type(backend_type) {
                return Err(CirruxError::InvalidPolicy(format!(
                    "backend type '{}' is not constructible",
                    backend_type
                )));
            }
        }
        Ok(())
    }
}

/// Per-policy replication counters, replaced wholesale at the end of
/// each cycle so readers never see a half-updated record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplicationStatus {
    pub total_objects_synced: u64,
    pub total_bytes_synced: u64,
    pub total_failed: u64,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub last_sync_duration_ms: u64,
    /// Set when the last cycle stopped early on cancellation.
    pub last_sync_partial: bool,
    pub last_error: Option<String>,
}
