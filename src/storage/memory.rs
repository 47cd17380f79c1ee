// ===========================================
// Cirrux - Multi-Cloud Object Storage
// (c) 2025 Neo Qiss. All Rights Reserved.
// Created by Neo Qiss - Unleash the power of Rust.
// ===========================================
// In-memory storage backend

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::errors::{CirruxError, Result};
use crate::lifecycle::{LifecyclePolicy, PolicySet};
use crate::replication::ReplicationManager;

use super::{
    paginate_sorted_keys, stream_from_bytes, ByteStream, ListOptions, ListPage, ObjectMetadata,
    ReplicationBinding, StorageBackend,
};

#[derive(Clone)]
struct StoredObject {
    data: Bytes,
    metadata: ObjectMetadata,
}

/// In-memory backend. Objects live in a sorted map behind a single
/// reader/writer lock; clones share the same underlying store, which is
/// how the factory hands out same-name handles that see one keyspace.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    objects: Arc<RwLock<BTreeMap<String, StoredObject>>>,
    policies: Arc<PolicySet>,
    replication: Arc<std::sync::RwLock<Option<Arc<ReplicationManager>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn put_with_metadata(
        &self,
        key: &str,
        data: ByteStream,
        metadata: ObjectMetadata,
    ) -> Result<()> {
        let data = super::collect_stream(data)
            .await
            .map_err(|e| CirruxError::Backend(format!("read of put stream failed: {}", e)))?;
        let stored = StoredObject {
            metadata: ObjectMetadata {
                key: key.to_string(),
                size: data.len() as u64,
                etag: Some(blake3::hash(&data).to_hex().to_string()),
                last_modified: Utc::now(),
                content_type: metadata.content_type,
                content_encoding: metadata.content_encoding,
                custom: metadata.custom,
            },
            data,
        };
        self.objects.write().await.insert(key.to_string(), stored);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<ByteStream> {
        let objects = self.objects.read().await;
        let stored = objects.get(key).ok_or_else(|| CirruxError::NotFound {
            key: key.to_string(),
        })?;
        Ok(stream_from_bytes(stored.data.clone()))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects.write().await.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let objects = self.objects.read().await;
        Ok(objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.objects.read().await.contains_key(key))
    }

    async fn get_metadata(&self, key: &str) -> Result<ObjectMetadata> {
        let objects = self.objects.read().await;
        objects
            .get(key)
            .map(|o| o.metadata.clone())
            .ok_or_else(|| CirruxError::NotFound {
                key: key.to_string(),
            })
    }

    async fn update_metadata(&self, key: &str, metadata: ObjectMetadata) -> Result<()> {
        let mut objects = self.objects.write().await;
        let stored = objects.get_mut(key).ok_or_else(|| CirruxError::NotFound {
            key: key.to_string(),
        })?;
        // Wholesale replacement of standard fields and the custom map.
        // Size, etag and key stay intrinsic to the stored bytes.
        stored.metadata.content_type = metadata.content_type;
        stored.metadata.content_encoding = metadata.content_encoding;
        stored.metadata.custom = metadata.custom;
        stored.metadata.last_modified = metadata.last_modified;
        Ok(())
    }

    async fn list_with_options(&self, options: ListOptions) -> Result<ListPage> {
        let objects = self.objects.read().await;
        let keys: Vec<String> = objects.keys().cloned().collect();
        Ok(paginate_sorted_keys(&keys, &options, |key| {
            objects.get(key).map(|o| o.metadata.clone())
        }))
    }

    async fn add_policy(&self, policy: LifecyclePolicy) -> Result<()> {
        self.policies.add(policy).await
    }

    async fn remove_policy(&self, id: &str) -> Result<()> {
        self.policies.remove(id).await
    }

    async fn get_policies(&self) -> Result<Vec<LifecyclePolicy>> {
        Ok(self.policies.snapshot().await)
    }

    fn replication(&self) -> Option<&dyn ReplicationBinding> {
        Some(self)
    }
}

impl ReplicationBinding for MemoryStorage {
    fn set_manager(&self, manager: Arc<ReplicationManager>) {
        *self.replication.write().unwrap() = Some(manager);
    }

    fn manager(&self) -> Option<Arc<ReplicationManager>> {
        self.replication.read().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::collect_stream;
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_put_get_delete_round_trip() {
        let store = MemoryStorage::new();
        store
            .put("hello/world.txt", stream_from_bytes("Hello"))
            .await
            .unwrap();
        assert!(store.exists("hello/world.txt").await.unwrap());

        let data = collect_stream(store.get("hello/world.txt").await.unwrap())
            .await
            .unwrap();
        assert_eq!(&data[..], b"Hello");

        store.delete("hello/world.txt").await.unwrap();
        assert!(!store.exists("hello/world.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_missing_key_is_silent() {
        let store = MemoryStorage::new();
        store.delete("never-there").await.unwrap();
    }

    #[tokio::test]
    async fn test_get_missing_key() {
        let store = MemoryStorage::new();
        let err = store.get("ghost").await.err().unwrap();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_list_prefix_semantics() {
        let store = MemoryStorage::new();
        for key in ["a/1", "a/2", "b/1"] {
            store.put(key, stream_from_bytes("x")).await.unwrap();
        }
        assert_eq!(store.list("a/").await.unwrap(), vec!["a/1", "a/2"]);
        assert_eq!(store.list("").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_list_with_delimiter_groups_prefixes() {
        let store = MemoryStorage::new();
        for key in ["a/1", "a/2", "b/1"] {
            store.put(key, stream_from_bytes("x")).await.unwrap();
        }
        let page = store
            .list_with_options(ListOptions {
                delimiter: Some("/".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(page.objects.is_empty());
        assert_eq!(page.common_prefixes, vec!["a/", "b/"]);
    }

    #[tokio::test]
    async fn test_metadata_round_trip() {
        let store = MemoryStorage::new();
        let mut meta = ObjectMetadata::new("doc.bin");
        meta.content_type = Some("application/octet-stream".to_string());
        meta.custom.insert("owner".to_string(), "ops".to_string());
        store
            .put_with_metadata("doc.bin", stream_from_bytes("abc"), meta)
            .await
            .unwrap();

        let stored = store.get_metadata("doc.bin").await.unwrap();
        assert_eq!(stored.size, 3);
        assert_eq!(stored.content_type.as_deref(), Some("application/octet-stream"));
        assert_eq!(stored.custom.get("owner").map(String::as_str), Some("ops"));
        assert!(stored.etag.is_some());
    }

    #[tokio::test]
    async fn test_update_metadata_replaces_custom_map() {
        let store = MemoryStorage::new();
        let mut meta = ObjectMetadata::new("doc.bin");
        meta.custom.insert("a".to_string(), "1".to_string());
        store
            .put_with_metadata("doc.bin", stream_from_bytes("abc"), meta)
            .await
            .unwrap();

        let mut replacement = store.get_metadata("doc.bin").await.unwrap();
        replacement.custom = HashMap::from([("b".to_string(), "2".to_string())]);
        store.update_metadata("doc.bin", replacement).await.unwrap();

        let stored = store.get_metadata("doc.bin").await.unwrap();
        assert!(!stored.custom.contains_key("a"));
        assert_eq!(stored.custom.get("b").map(String::as_str), Some("2"));
    }

    #[tokio::test]
    async fn test_put_replaces_atomically() {
        let store = MemoryStorage::new();
        store.put("k", stream_from_bytes("old")).await.unwrap();
        store.put("k", stream_from_bytes("new value")).await.unwrap();
        let data = collect_stream(store.get("k").await.unwrap()).await.unwrap();
        assert_eq!(&data[..], b"new value");
        assert_eq!(store.get_metadata("k").await.unwrap().size, 9);
    }

    #[tokio::test]
    async fn test_concurrent_distinct_key_puts() {
        let store = MemoryStorage::new();
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .put(&format!("w/{}", i), stream_from_bytes(format!("v{}", i)))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(store.list("w/").await.unwrap().len(), 16);
    }

    #[tokio::test]
    async fn test_clones_share_keyspace() {
        let store = MemoryStorage::new();
        let other = store.clone();
        store.put("shared", stream_from_bytes("x")).await.unwrap();
        assert!(other.exists("shared").await.unwrap());
    }
}
