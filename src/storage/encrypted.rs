// ===========================================
// Cirrux - Multi-Cloud Object Storage
// (c) 2025 Neo Qiss. All Rights Reserved.
// Created by Neo Qiss - Unleash the power of Rust.
// ===========================================
// Transparent at-rest encryption wrapper

use async_trait::async_trait;
use std::sync::Arc;

use crate::archive::Archiver;
use crate::encryption::{decrypt_stream, encrypt_stream, EncrypterFactory};
use crate::errors::Result;
use crate::lifecycle::LifecyclePolicy;

use super::{
    ByteStream, ListOptions, ListPage, ObjectMetadata, ReplicationBinding, StorageBackend,
};

/// Custom metadata annotation holding the DEK id an object was sealed with.
pub const META_KEY_ID: &str = "x-cirrux-key-id";
/// Custom metadata annotation holding the algorithm tag.
pub const META_ALGORITHM: &str = "x-cirrux-algorithm";

/// Wraps any backend so everything it stores is ciphertext. Keys and
/// metadata pass through unchanged apart from the key-id and algorithm
/// annotations; reported sizes are ciphertext sizes.
pub struct EncryptedStorage {
    inner: Arc<dyn StorageBackend>,
    factory: Arc<dyn EncrypterFactory>,
}

impl EncryptedStorage {
    pub fn new(inner: Arc<dyn StorageBackend>, factory: Arc<dyn EncrypterFactory>) -> Self {
        Self { inner, factory }
    }

    /// The key id recorded for an object, falling back to the factory
    /// default for objects written before annotations existed.
    async fn recorded_key_id(&self, key: &str) -> Result<String> {
        let meta = self.inner.get_metadata(key).await?;
        Ok(meta
            .custom
            .get(META_KEY_ID)
            .cloned()
            .unwrap_or_else(|| self.factory.default_key_id()))
    }
}

#[async_trait]
impl StorageBackend for EncryptedStorage {
    async fn put_with_metadata(
        &self,
        key: &str,
        data: ByteStream,
        mut metadata: ObjectMetadata,
    ) -> Result<()> {
        let encrypter = self.factory.encrypter_for(&self.factory.default_key_id())?;
        metadata
            .custom
            .insert(META_KEY_ID.to_string(), encrypter.key_id().to_string());
        metadata
            .custom
            .insert(META_ALGORITHM.to_string(), encrypter.algorithm().to_string());
        self.inner
            .put_with_metadata(key, encrypt_stream(encrypter, data), metadata)
            .await
    }

    async fn get(&self, key: &str) -> Result<ByteStream> {
        let key_id = self.recorded_key_id(key).await?;
        let encrypter = self.factory.encrypter_for(&key_id)?;
        let inner_stream = self.inner.get(key).await?;
        Ok(decrypt_stream(encrypter, inner_stream))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.inner.list(prefix).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.inner.exists(key).await
    }

    async fn get_metadata(&self, key: &str) -> Result<ObjectMetadata> {
        self.inner.get_metadata(key).await
    }

    async fn update_metadata(&self, key: &str, metadata: ObjectMetadata) -> Result<()> {
        self.inner.update_metadata(key, metadata).await
    }

    async fn list_with_options(&self, options: ListOptions) -> Result<ListPage> {
        self.inner.list_with_options(options).await
    }

    async fn archive(&self, key: &str, sink: &dyn Archiver) -> Result<()> {
        // Archive through the wrapper hands the sink plaintext, matching
        // what callers of this layer observe everywhere else.
        let data = self.get(key).await?;
        sink.put(key, data).await
    }

    async fn add_policy(&self, policy: LifecyclePolicy) -> Result<()> {
        self.inner.add_policy(policy).await
    }

    async fn remove_policy(&self, id: &str) -> Result<()> {
        self.inner.remove_policy(id).await
    }

    async fn get_policies(&self) -> Result<Vec<LifecyclePolicy>> {
        self.inner.get_policies().await
    }

    fn replication(&self) -> Option<&dyn ReplicationBinding> {
        self.inner.replication()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encryption::StaticKeyring;
    use crate::storage::{collect_stream, stream_from_bytes, MemoryStorage};

    fn wrapped() -> (Arc<MemoryStorage>, EncryptedStorage) {
        let inner = Arc::new(MemoryStorage::new());
        let factory = Arc::new(StaticKeyring::new("k1").with_random_key("k1"));
        (inner.clone(), EncryptedStorage::new(inner, factory))
    }

    #[tokio::test]
    async fn test_round_trip_is_transparent() {
        let (_inner, store) = wrapped();
        store.put("secret.txt", stream_from_bytes("plaintext")).await.unwrap();
        let data = collect_stream(store.get("secret.txt").await.unwrap())
            .await
            .unwrap();
        assert_eq!(&data[..], b"plaintext");
    }

    #[tokio::test]
    async fn test_inner_store_holds_ciphertext() {
        let (inner, store) = wrapped();
        store.put("secret.txt", stream_from_bytes("plaintext")).await.unwrap();
        let raw = collect_stream(inner.get("secret.txt").await.unwrap())
            .await
            .unwrap();
        assert_ne!(&raw[..], b"plaintext");
        assert!(raw.len() > b"plaintext".len());
    }

    #[tokio::test]
    async fn test_key_id_annotation_is_recorded() {
        let (inner, store) = wrapped();
        store.put("secret.txt", stream_from_bytes("plaintext")).await.unwrap();
        let meta = inner.get_metadata("secret.txt").await.unwrap();
        assert_eq!(meta.custom.get(META_KEY_ID).map(String::as_str), Some("k1"));
        assert_eq!(
            meta.custom.get(META_ALGORITHM).map(String::as_str),
            Some("AES256-GCM")
        );
    }

    #[tokio::test]
    async fn test_unknown_recorded_key_fails_closed() {
        let inner = Arc::new(MemoryStorage::new());
        let writer = EncryptedStorage::new(
            inner.clone(),
            Arc::new(StaticKeyring::new("k1").with_random_key("k1")),
        );
        writer.put("x", stream_from_bytes("data")).await.unwrap();

        // A reader whose keyring lacks k1 must refuse rather than emit garbage.
        let reader = EncryptedStorage::new(
            inner,
            Arc::new(StaticKeyring::new("other").with_random_key("other")),
        );
        let err = reader.get("x").await.err().unwrap();
        assert!(matches!(err, crate::errors::CirruxError::KeyUnavailable { .. }));
    }
}
