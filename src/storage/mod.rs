// ===========================================
// Cirrux - Multi-Cloud Object Storage
// (c) 2025 Neo Qiss. All Rights Reserved.
// Created by Neo Qiss - Unleash the power of Rust.
// ===========================================
// Storage backend interface

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use crate::archive::Archiver;
use crate::errors::Result;
use crate::lifecycle::LifecyclePolicy;
use crate::replication::ReplicationManager;

pub mod encrypted;
pub mod factory;
pub mod local;
pub mod memory;

// Re-export commonly used types
pub use encrypted::EncryptedStorage;
pub use factory::{ArchiverFactory, StorageFactory};
pub use local::LocalStorage;
pub use memory::MemoryStorage;

/// A lazy, single-pass, finite stream of object bytes. Closing (dropping)
/// the stream releases any provider resources behind it.
pub type ByteStream = Pin<Box<dyn futures_util::Stream<Item = std::io::Result<Bytes>> + Send>>;

/// Wrap a fully materialized buffer as a [`ByteStream`].
pub fn stream_from_bytes(data: impl Into<Bytes>) -> ByteStream {
    let data = data.into();
    Box::pin(futures_util::stream::once(async move { Ok(data) }))
}

/// Drain a stream into memory. Engine code only uses this where a sink
/// demands a known content length; copies stay streaming.
pub async fn collect_stream(mut stream: ByteStream) -> std::io::Result<Bytes> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf.freeze())
}

/// Object metadata stored alongside the data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub key: String,
    pub size: u64,
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub last_modified: DateTime<Utc>,
    /// Provider-opaque entity tag. An identity hint, never parsed.
    pub etag: Option<String>,
    pub custom: HashMap<String, String>,
}

impl ObjectMetadata {
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            size: 0,
            content_type: None,
            content_encoding: None,
            last_modified: Utc::now(),
            etag: None,
            custom: HashMap::new(),
        }
    }
}

/// Options for the paginated listing variant
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub prefix: String,
    /// Groups keys sharing a prefix up to the next delimiter occurrence
    /// into `common_prefixes`.
    pub delimiter: Option<String>,
    pub max_results: Option<usize>,
    /// Opaque token echoed from a prior page's `next_token`.
    pub continue_from: Option<String>,
}

/// One page of a paginated listing
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectMetadata>,
    pub common_prefixes: Vec<String>,
    pub next_token: Option<String>,
    pub truncated: bool,
}

/// Post-construction replication wiring. Backends that can host a
/// replication manager expose this through
/// [`StorageBackend::replication`].
pub trait ReplicationBinding: Send + Sync {
    fn set_manager(&self, manager: Arc<ReplicationManager>);
    fn manager(&self) -> Option<Arc<ReplicationManager>>;
}

/// Storage backend trait for pluggable storage implementations
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Store an object, replacing any prior value atomically. The input
    /// stream is consumed fully; readers never observe a partial write.
    async fn put(&self, key: &str, data: ByteStream) -> Result<()> {
        let meta = ObjectMetadata::new(key);
        self.put_with_metadata(key, data, meta).await
    }

    /// Store an object together with caller-supplied metadata. Size,
    /// timestamp and etag are computed by the backend.
    async fn put_with_metadata(
        &self,
        key: &str,
        data: ByteStream,
        metadata: ObjectMetadata,
    ) -> Result<()>;

    /// Retrieve an object as a stream.
    async fn get(&self, key: &str) -> Result<ByteStream>;

    /// Delete an object. Deleting a missing key succeeds silently.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Flat enumeration of all keys beginning with `prefix`.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Check if an object exists. Never errors on absence.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Get object metadata without data.
    async fn get_metadata(&self, key: &str) -> Result<ObjectMetadata>;

    /// Replace the custom map and standard fields wholesale.
    async fn update_metadata(&self, key: &str, metadata: ObjectMetadata) -> Result<()>;

    /// Paginated listing with optional delimiter grouping.
    async fn list_with_options(&self, options: ListOptions) -> Result<ListPage>;

    /// Stream the object bytes into a write-only archive sink, keeping
    /// the key.
    async fn archive(&self, key: &str, sink: &dyn Archiver) -> Result<()> {
        let data = self.get(key).await?;
        sink.put(key, data).await
    }

    /// Register a lifecycle policy. Adding a policy with an existing id
    /// replaces it.
    async fn add_policy(&self, policy: LifecyclePolicy) -> Result<()>;

    /// Remove a lifecycle policy by id.
    async fn remove_policy(&self, id: &str) -> Result<()>;

    /// Snapshot of the current lifecycle policy set.
    async fn get_policies(&self) -> Result<Vec<LifecyclePolicy>>;

    /// Optional capability probe: backends that can carry a replication
    /// manager return their binding.
    fn replication(&self) -> Option<&dyn ReplicationBinding> {
        None
    }
}

/// Shared pagination for backends that materialize a sorted key set
/// (memory, local). Provider adapters page natively instead.
pub(crate) fn paginate_sorted_keys(
    keys: &[String],
    options: &ListOptions,
    mut lookup: impl FnMut(&str) -> Option<ObjectMetadata>,
) -> ListPage {
    let mut page = ListPage::default();
    let max = options.max_results.unwrap_or(1000).max(1);
    let mut seen_prefixes: Vec<String> = Vec::new();

    let start = match &options.continue_from {
        Some(token) => keys.partition_point(|k| k.as_str() <= token.as_str()),
        None => 0,
    };

    for key in &keys[start..] {
        if !key.starts_with(&options.prefix) {
            continue;
        }
        if page.objects.len() + seen_prefixes.len() >= max {
            page.truncated = true;
            page.next_token = page
                .objects
                .last()
                .map(|o| o.key.clone())
                .or_else(|| seen_prefixes.last().cloned());
            break;
        }
        let rest = &key[options.prefix.len()..];
        if let Some(delimiter) = options.delimiter.as_deref().filter(|d| !d.is_empty()) {
            if let Some(pos) = rest.find(delimiter) {
                let common = format!("{}{}", options.prefix, &rest[..pos + delimiter.len()]);
                if seen_prefixes.last() != Some(&common) {
                    seen_prefixes.push(common);
                }
                continue;
            }
        }
        if let Some(meta) = lookup(key) {
            page.objects.push(meta);
        }
    }

    page.common_prefixes = seen_prefixes;
    page
}
