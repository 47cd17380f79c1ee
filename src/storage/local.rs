// ===========================================
// Cirrux - Multi-Cloud Object Storage
// (c) 2025 Neo Qiss. All Rights Reserved.
// Created by Neo Qiss - Unleash the power of Rust.
// ===========================================
// Local filesystem storage backend

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use crate::errors::{CirruxError, Result};
use crate::lifecycle::{LifecyclePolicy, PolicySet};
use crate::replication::ReplicationManager;
use crate::validate::validate_key;

use super::{
    paginate_sorted_keys, ByteStream, ListOptions, ListPage, ObjectMetadata, ReplicationBinding,
    StorageBackend,
};

// Internal bookkeeping lives under this directory; it never shows up in
// listings and its name is not a valid object key prefix target.
const INTERNAL_DIR: &str = ".cirrux";

/// Filesystem-rooted backend. Object bytes land under the root with the
/// key as relative path; metadata sidecars live in a shadow tree under
/// `.cirrux/meta/`. Puts go through a temp file and a rename, so readers
/// never see partial content.
pub struct LocalStorage {
    root: PathBuf,
    policies: Arc<PolicySet>,
    replication: Arc<std::sync::RwLock<Option<Arc<ReplicationManager>>>>,
}

impl LocalStorage {
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(root.join(INTERNAL_DIR).join("meta"))
            .await
            .map_err(|e| CirruxError::Backend(format!("cannot prepare root: {}", e)))?;
        tokio::fs::create_dir_all(root.join(INTERNAL_DIR).join("tmp"))
            .await
            .map_err(|e| CirruxError::Backend(format!("cannot prepare root: {}", e)))?;
        Ok(Self {
            root,
            policies: Arc::new(PolicySet::new()),
            replication: Arc::new(std::sync::RwLock::new(None)),
        })
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.root
            .join(INTERNAL_DIR)
            .join("meta")
            .join(format!("{}.json", key))
    }

    fn tmp_path(&self) -> PathBuf {
        self.root
            .join(INTERNAL_DIR)
            .join("tmp")
            .join(Uuid::new_v4().to_string())
    }

    async fn write_sidecar(&self, key: &str, metadata: &ObjectMetadata) -> Result<()> {
        let path = self.meta_path(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CirruxError::Backend(format!("sidecar mkdir failed: {}", e)))?;
        }
        let tmp = self.tmp_path();
        tokio::fs::write(&tmp, serde_json::to_vec(metadata)?)
            .await
            .map_err(|e| CirruxError::Backend(format!("sidecar write failed: {}", e)))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| CirruxError::Backend(format!("sidecar rename failed: {}", e)))?;
        Ok(())
    }

    async fn read_sidecar(&self, key: &str) -> Result<Option<ObjectMetadata>> {
        match tokio::fs::read(self.meta_path(key)).await {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CirruxError::Backend(format!("sidecar read failed: {}", e))),
        }
    }

    async fn collect_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut stack = vec![self.root.clone()];
        while let Some(dir) = stack.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(CirruxError::Backend(format!("list failed: {}", e))),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| CirruxError::Backend(format!("list failed: {}", e)))?
            {
                let path = entry.path();
                if path.file_name().map(|n| n == INTERNAL_DIR).unwrap_or(false) {
                    continue;
                }
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| CirruxError::Backend(format!("list failed: {}", e)))?;
                if file_type.is_dir() {
                    stack.push(path);
                } else if let Some(key) = relative_key(&self.root, &path) {
                    if key.starts_with(prefix) {
                        keys.push(key);
                    }
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn stat_metadata(&self, key: &str) -> Result<ObjectMetadata> {
        let stat = match tokio::fs::metadata(self.object_path(key)).await {
            Ok(stat) => stat,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CirruxError::NotFound {
                    key: key.to_string(),
                })
            }
            Err(e) => return Err(CirruxError::Backend(format!("stat failed: {}", e))),
        };
        if let Some(mut sidecar) = self.read_sidecar(key).await? {
            sidecar.key = key.to_string();
            sidecar.size = stat.len();
            return Ok(sidecar);
        }
        let mut meta = ObjectMetadata::new(key);
        meta.size = stat.len();
        if let Ok(modified) = stat.modified() {
            meta.last_modified = DateTime::<Utc>::from(modified);
        }
        Ok(meta)
    }
}

fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in rel.components() {
        parts.push(component.as_os_str().to_str()?);
    }
    Some(parts.join("/"))
}

#[async_trait]
impl StorageBackend for LocalStorage {
    async fn put_with_metadata(
        &self,
        key: &str,
        mut data: ByteStream,
        metadata: ObjectMetadata,
    ) -> Result<()> {
        validate_key(key)?;
        let tmp = self.tmp_path();
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|e| CirruxError::Backend(format!("create failed: {}", e)))?;
        let mut hasher = blake3::Hasher::new();
        let mut size: u64 = 0;
        while let Some(chunk) = data.next().await {
            let chunk = chunk.map_err(|e| CirruxError::Backend(format!("stream read failed: {}", e)))?;
            hasher.update(&chunk);
            size += chunk.len() as u64;
            file.write_all(&chunk)
                .await
                .map_err(|e| CirruxError::Backend(format!("write failed: {}", e)))?;
        }
        file.flush()
            .await
            .map_err(|e| CirruxError::Backend(format!("flush failed: {}", e)))?;
        drop(file);

        let stored = ObjectMetadata {
            key: key.to_string(),
            size,
            etag: Some(hasher.finalize().to_hex().to_string()),
            last_modified: Utc::now(),
            content_type: metadata.content_type,
            content_encoding: metadata.content_encoding,
            custom: metadata.custom,
        };
        self.write_sidecar(key, &stored).await?;

        let target = self.object_path(key);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CirruxError::Backend(format!("mkdir failed: {}", e)))?;
        }
        tokio::fs::rename(&tmp, &target)
            .await
            .map_err(|e| CirruxError::Backend(format!("rename failed: {}", e)))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<ByteStream> {
        validate_key(key)?;
        let file = match tokio::fs::File::open(self.object_path(key)).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CirruxError::NotFound {
                    key: key.to_string(),
                })
            }
            Err(e) => return Err(CirruxError::Backend(format!("open failed: {}", e))),
        };
        Ok(Box::pin(ReaderStream::new(file)))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        match tokio::fs::remove_file(self.object_path(key)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(CirruxError::Backend(format!("delete failed: {}", e))),
        }
        let _ = tokio::fs::remove_file(self.meta_path(key)).await;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        crate::validate::validate_prefix(prefix)?;
        self.collect_keys(prefix).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        match tokio::fs::metadata(self.object_path(key)).await {
            Ok(stat) => Ok(stat.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CirruxError::Backend(format!("stat failed: {}", e))),
        }
    }

    async fn get_metadata(&self, key: &str) -> Result<ObjectMetadata> {
        validate_key(key)?;
        self.stat_metadata(key).await
    }

    async fn update_metadata(&self, key: &str, metadata: ObjectMetadata) -> Result<()> {
        validate_key(key)?;
        let mut current = self.stat_metadata(key).await?;
        current.content_type = metadata.content_type;
        current.content_encoding = metadata.content_encoding;
        current.custom = metadata.custom;
        current.last_modified = metadata.last_modified;
        self.write_sidecar(key, &current).await
    }

    async fn list_with_options(&self, options: ListOptions) -> Result<ListPage> {
        crate::validate::validate_prefix(&options.prefix)?;
        let keys = self.collect_keys("").await?;
        let mut page = paginate_sorted_keys(&keys, &options, |key| Some(ObjectMetadata::new(key)));
        let mut objects = Vec::with_capacity(page.objects.len());
        for placeholder in &page.objects {
            objects.push(self.stat_metadata(&placeholder.key).await?);
        }
        page.objects = objects;
        Ok(page)
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

impl ReplicationBinding for LocalStorage {
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
    use crate::storage::{collect_stream, stream_from_bytes};

    async fn fixture() -> (tempfile::TempDir, LocalStorage) {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStorage::new(dir.path()).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let (_dir, store) = fixture().await;
        store
            .put("nested/deep/file.bin", stream_from_bytes("contents"))
            .await
            .unwrap();
        let data = collect_stream(store.get("nested/deep/file.bin").await.unwrap())
            .await
            .unwrap();
        assert_eq!(&data[..], b"contents");
    }

    #[tokio::test]
    async fn test_missing_key_maps_to_not_found() {
        let (_dir, store) = fixture().await;
        assert!(store.get("nope").await.err().unwrap().is_not_found());
        assert!(!store.exists("nope").await.unwrap());
        store.delete("nope").await.unwrap();
    }

    #[tokio::test]
    async fn test_listing_skips_internal_tree() {
        let (_dir, store) = fixture().await;
        store.put("a/1", stream_from_bytes("x")).await.unwrap();
        store.put("b", stream_from_bytes("y")).await.unwrap();
        let keys = store.list("").await.unwrap();
        assert_eq!(keys, vec!["a/1", "b"]);
    }

    #[tokio::test]
    async fn test_metadata_sidecar_round_trip() {
        let (_dir, store) = fixture().await;
        let mut meta = ObjectMetadata::new("doc.txt");
        meta.content_type = Some("text/plain".to_string());
        meta.custom.insert("tier".to_string(), "hot".to_string());
        store
            .put_with_metadata("doc.txt", stream_from_bytes("hello"), meta)
            .await
            .unwrap();

        let stored = store.get_metadata("doc.txt").await.unwrap();
        assert_eq!(stored.size, 5);
        assert_eq!(stored.content_type.as_deref(), Some("text/plain"));
        assert_eq!(stored.custom.get("tier").map(String::as_str), Some("hot"));

        let mut update = stored.clone();
        update.custom.clear();
        update.content_type = Some("text/markdown".to_string());
        store.update_metadata("doc.txt", update).await.unwrap();
        let after = store.get_metadata("doc.txt").await.unwrap();
        assert!(after.custom.is_empty());
        assert_eq!(after.content_type.as_deref(), Some("text/markdown"));
    }

    #[tokio::test]
    async fn test_traversal_keys_rejected() {
        let (_dir, store) = fixture().await;
        let err = store.put("../escape", stream_from_bytes("x")).await.unwrap_err();
        assert!(matches!(err, CirruxError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_etag_tracks_content() {
        let (_dir, store) = fixture().await;
        store.put("k", stream_from_bytes("one")).await.unwrap();
        let first = store.get_metadata("k").await.unwrap().etag;
        store.put("k", stream_from_bytes("two")).await.unwrap();
        let second = store.get_metadata("k").await.unwrap().etag;
        assert_ne!(first, second);
    }
}
