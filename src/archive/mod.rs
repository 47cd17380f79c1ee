// ===========================================
// Cirrux - Multi-Cloud Object Storage
// (c) 2025 Neo Qiss. All Rights Reserved.
// Created by Neo Qiss - Unleash the power of Rust.
// ===========================================
// Write-only archive sinks for tier transitions

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::errors::{CirruxError, Result};
use crate::storage::ByteStream;

/// Write-only sink. Used as the destination for `archive` operations
/// and `archive` lifecycle actions. Keys are preserved as-is.
#[async_trait]
pub trait Archiver: Send + Sync {
    async fn put(&self, key: &str, data: ByteStream) -> Result<()>;
}

/// Archive sink writing into a local directory tree. Streams straight to
/// a temp file and renames, so nothing is buffered in memory.
pub struct LocalArchiver {
    root: PathBuf,
}

impl LocalArchiver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Archiver for LocalArchiver {
    async fn put(&self, key: &str, mut data: ByteStream) -> Result<()> {
        let path = self.root.join(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CirruxError::Backend(format!("archive mkdir failed: {}", e)))?;
        }
        let tmp = path.with_extension("cirrux-tmp");
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|e| CirruxError::Backend(format!("archive create failed: {}", e)))?;
        while let Some(chunk) = data.next().await {
            let chunk = chunk.map_err(|e| CirruxError::Backend(format!("archive read failed: {}", e)))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| CirruxError::Backend(format!("archive write failed: {}", e)))?;
        }
        file.flush()
            .await
            .map_err(|e| CirruxError::Backend(format!("archive flush failed: {}", e)))?;
        drop(file);
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| CirruxError::Backend(format!("archive rename failed: {}", e)))?;
        Ok(())
    }
}

/// In-memory archive sink. Buffers whole objects (the sink needs the
/// full content anyway), so it doubles as the length-demanding-provider
/// stand-in for tests.
#[derive(Default)]
pub struct MemoryArchiver {
    objects: Arc<RwLock<HashMap<String, Bytes>>>,
}

impl MemoryArchiver {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &str) -> Option<Bytes> {
        self.objects.read().await.get(key).cloned()
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl Archiver for MemoryArchiver {
    async fn put(&self, key: &str, data: ByteStream) -> Result<()> {
        let buf = crate::storage::collect_stream(data)
            .await
            .map_err(|e| CirruxError::Backend(format!("archive read failed: {}", e)))?;
        self.objects.write().await.insert(key.to_string(), buf);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::stream_from_bytes;

    #[tokio::test]
    async fn test_memory_archiver_preserves_key_and_bytes() {
        let sink = MemoryArchiver::new();
        sink.put("logs/old.txt", stream_from_bytes("payload")).await.unwrap();
        assert_eq!(sink.get("logs/old.txt").await.unwrap(), Bytes::from("payload"));
        assert_eq!(sink.keys().await, vec!["logs/old.txt"]);
    }

    #[tokio::test]
    async fn test_local_archiver_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LocalArchiver::new(dir.path());
        sink.put("a/b.txt", stream_from_bytes("cold data")).await.unwrap();
        let contents = tokio::fs::read(dir.path().join("a/b.txt")).await.unwrap();
        assert_eq!(contents, b"cold data");
    }
}
