// ===========================================
// Cirrux - Multi-Cloud Object Storage
// (c) 2025 Neo Qiss. All Rights Reserved.
// Created by Neo Qiss - Unleash the power of Rust.
// ===========================================
// One replication cycle: list, diff, copy, prune

use futures_util::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::encryption::{decrypt_stream, encrypt_stream, EncrypterFactory, EncrypterRegistry};
use crate::errors::{CirruxError, Result};
use crate::storage::factory::{Settings, StorageFactory};
use crate::storage::{
    ByteStream, EncryptedStorage, ListOptions, ObjectMetadata, StorageBackend,
};

use super::{EncryptionConfig, ReplicationPolicy, SyncMode};

/// Destination-side annotation recording which source content an object
/// mirrors, so unchanged objects are not re-copied every cycle.
pub const META_SOURCE_ETAG: &str = "x-cirrux-source-etag";
/// Client-level DEK annotations. Deliberately distinct from the at-rest
/// wrapper's `x-cirrux-key-id`, which belongs to the storage layer and
/// would otherwise shadow the client's key id.
pub const META_DEK_ID: &str = "x-cirrux-dek-id";
pub const META_DEK_ALGORITHM: &str = "x-cirrux-dek-algorithm";

const PAGE_SIZE: usize = 1000;

/// Outcome of a single sync cycle.
#[derive(Debug, Clone, Default)]
pub struct SyncResult {
    pub synced: u64,
    pub bytes: u64,
    pub failed: u64,
    pub up_to_date: u64,
    pub orphans_deleted: u64,
    /// The cycle stopped early on cancellation.
    pub partial: bool,
}

/// One DEK layer resolved against the encrypter registry.
#[derive(Clone)]
struct DekLayer {
    factory: Arc<dyn EncrypterFactory>,
    key_override: Option<String>,
}

impl DekLayer {
    fn resolve(
        registry: &EncrypterRegistry,
        config: Option<&EncryptionConfig>,
    ) -> Result<Option<Self>> {
        match config {
            None => Ok(None),
            Some(config) => Ok(Some(DekLayer {
                factory: registry.get(&config.provider)?,
                key_override: config.default_key_id.clone(),
            })),
        }
    }

    fn default_key_id(&self) -> String {
        self.key_override
            .clone()
            .unwrap_or_else(|| self.factory.default_key_id())
    }
}

/// Executes sync cycles for replication policies. Stateless between
/// cycles; every cycle re-resolves its backends from policy settings,
/// so the syncer never shares instances with the facade registry.
pub struct Syncer {
    factory: Arc<StorageFactory>,
    encrypters: Arc<EncrypterRegistry>,
    workers: usize,
}

impl Syncer {
    pub fn new(factory: Arc<StorageFactory>, encrypters: Arc<EncrypterRegistry>) -> Self {
        Self {
            factory,
            encrypters,
            workers: 8,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    async fn resolve_backend(
        &self,
        backend_type: &str,
        settings: &Settings,
        at_rest: Option<&EncryptionConfig>,
    ) -> Result<Arc<dyn StorageBackend>> {
        let inner = self.factory.create(backend_type, settings).await?;
        match at_rest {
            None => Ok(inner),
            Some(config) => {
                let factory = self.encrypters.get(&config.provider)?;
                Ok(Arc::new(EncryptedStorage::new(inner, factory)))
            }
        }
    }

    /// Run one cycle for `policy`. Per-object failures are counted and
    /// the cycle continues; listing and backend-construction failures
    /// abort it (which also keeps orphan pruning from running on a
    /// half-seen keyspace).
    pub async fn sync(
        &self,
        policy: &ReplicationPolicy,
        cancel: &CancellationToken,
    ) -> Result<SyncResult> {
        if cancel.is_cancelled() {
            return Err(CirruxError::Cancelled);
        }

        let encryption = policy.encryption();
        let source = self
            .resolve_backend(
                &policy.source_backend,
                &policy.source_settings,
                encryption.backend_layer(),
            )
            .await?;
        let destination = self
            .resolve_backend(
                &policy.destination_backend,
                &policy.destination_settings,
                encryption.backend_layer(),
            )
            .await?;

        let source_dek = DekLayer::resolve(&self.encrypters, encryption.source_layer())?;
        let destination_dek = DekLayer::resolve(&self.encrypters, encryption.destination_layer())?;

        let policy = Arc::new(policy.clone());
        let mut result = SyncResult::default();
        let mut token: Option<String> = None;

        'pages: loop {
            let page = source
                .list_with_options(ListOptions {
                    prefix: policy.source_prefix.clone(),
                    max_results: Some(PAGE_SIZE),
                    continue_from: token.take(),
                    ..Default::default()
                })
                .await?;
            let truncated = page.truncated;
            let next_token = page.next_token.clone();

            let copies = futures_util::stream::iter(page.objects.into_iter().map(|meta| {
                let policy = policy.clone();
                let source = source.clone();
                let destination = destination.clone();
                let source_dek = source_dek.clone();
                let destination_dek = destination_dek.clone();
                async move {
                    let key = meta.key.clone();
                    let outcome = copy_object(
                        &policy,
                        source.as_ref(),
                        destination.as_ref(),
                        source_dek.as_ref(),
                        destination_dek.as_ref(),
                        meta,
                    )
                    .await;
                    (key, outcome)
                }
            }))
            .buffer_unordered(self.workers);
            futures_util::pin_mut!(copies);

            while let Some((key, outcome)) = copies.next().await {
                match outcome {
                    Ok(CopyOutcome::Copied(bytes)) => {
                        result.synced += 1;
                        result.bytes += bytes;
                    }
                    Ok(CopyOutcome::UpToDate) => result.up_to_date += 1,
                    Err(e) => {
                        warn!(policy = %policy.id, key = %key, error = %e, "object sync failed");
                        result.failed += 1;
                    }
                }
                if cancel.is_cancelled() {
                    // Remaining copies are abandoned; atomic puts keep
                    // the destination free of partial objects.
                    result.partial = true;
                    break 'pages;
                }
            }

            if cancel.is_cancelled() {
                result.partial = true;
                break;
            }
            if !truncated {
                break;
            }
            token = next_token;
        }

        if policy.delete_orphans && !result.partial {
            self.prune_orphans(&policy, source.as_ref(), destination.as_ref(), cancel, &mut result)
                .await?;
        }

        Ok(result)
    }

    /// Remove destination keys with no source counterpart. Only reached
    /// after a complete source listing; a failed existence probe keeps
    /// the key.
    async fn prune_orphans(
        &self,
        policy: &ReplicationPolicy,
        source: &dyn StorageBackend,
        destination: &dyn StorageBackend,
        cancel: &CancellationToken,
        result: &mut SyncResult,
    ) -> Result<()> {
        let mut token: Option<String> = None;
        loop {
            if cancel.is_cancelled() {
                result.partial = true;
                return Ok(());
            }
            let page = destination
                .list_with_options(ListOptions {
                    prefix: policy.destination_prefix.clone(),
                    max_results: Some(PAGE_SIZE),
                    continue_from: token.take(),
                    ..Default::default()
                })
                .await?;

            for object in &page.objects {
                if cancel.is_cancelled() {
                    result.partial = true;
                    return Ok(());
                }
                let Some(source_key) = policy.source_key(&object.key) else {
                    continue;
                };
                match source.exists(&source_key).await {
                    Ok(true) => {}
                    Ok(false) => match destination.delete(&object.key).await {
                        Ok(()) => {
                            debug!(policy = %policy.id, key = %object.key, "orphan removed");
                            result.orphans_deleted += 1;
                        }
                        Err(e) => {
                            warn!(policy = %policy.id, key = %object.key, error = %e, "orphan delete failed");
                            result.failed += 1;
                        }
                    },
                    Err(e) => {
                        warn!(policy = %policy.id, key = %object.key, error = %e, "orphan probe failed; keeping key");
                        result.failed += 1;
                    }
                }
            }

            if !page.truncated {
                return Ok(());
            }
            token = page.next_token;
        }
    }
}

enum CopyOutcome {
    Copied(u64),
    UpToDate,
}

async fn copy_object(
    policy: &ReplicationPolicy,
    source: &dyn StorageBackend,
    destination: &dyn StorageBackend,
    source_dek: Option<&DekLayer>,
    destination_dek: Option<&DekLayer>,
    meta: ObjectMetadata,
) -> Result<CopyOutcome> {
    let Some(dest_key) = policy.destination_key(&meta.key) else {
        // Listing is prefix-scoped, so this only trips on a racing
        // prefix rewrite; skip rather than guess.
        return Ok(CopyOutcome::UpToDate);
    };

    if let Some(source_etag) = meta.etag.as_deref() {
        if let Ok(existing) = destination.get_metadata(&dest_key).await {
            if existing.custom.get(META_SOURCE_ETAG).map(String::as_str) == Some(source_etag) {
                return Ok(CopyOutcome::UpToDate);
            }
        }
    }

    let mut stream: ByteStream = source.get(&meta.key).await?;
    let mut out_meta = ObjectMetadata::new(&dest_key);
    out_meta.content_type = meta.content_type.clone();
    out_meta.content_encoding = meta.content_encoding.clone();
    out_meta.custom = meta.custom.clone();

    if policy.mode == SyncMode::Transparent {
        if let Some(layer) = source_dek {
            // The stored bytes carry the source DEK; bring them back to
            // plaintext before the destination layer.
            let key_id = meta
                .custom
                .get(META_DEK_ID)
                .cloned()
                .unwrap_or_else(|| layer.default_key_id());
            let encrypter = layer.factory.encrypter_for(&key_id)?;
            stream = decrypt_stream(encrypter, stream);
            out_meta.custom.remove(META_DEK_ID);
            out_meta.custom.remove(META_DEK_ALGORITHM);
        }
        if let Some(layer) = destination_dek {
            let key_id = layer.default_key_id();
            let encrypter = layer.factory.encrypter_for(&key_id)?;
            out_meta
                .custom
                .insert(META_DEK_ID.to_string(), encrypter.key_id().to_string());
            out_meta
                .custom
                .insert(META_DEK_ALGORITHM.to_string(), encrypter.algorithm().to_string());
            stream = encrypt_stream(encrypter, stream);
        }
    }

    if let Some(source_etag) = meta.etag.as_deref() {
        out_meta
            .custom
            .insert(META_SOURCE_ETAG.to_string(), source_etag.to_string());
    }

    destination
        .put_with_metadata(&dest_key, stream, out_meta)
        .await?;
    Ok(CopyOutcome::Copied(meta.size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::Archiver;
    use crate::encryption::StaticKeyring;
    use crate::lifecycle::LifecyclePolicy;
    use crate::storage::{collect_stream, stream_from_bytes, ListPage, MemoryStorage};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn policy(source: &str, dest: &str) -> ReplicationPolicy {
        ReplicationPolicy {
            id: "mirror".to_string(),
            source_backend: "memory".to_string(),
            source_settings: Settings::from([("name".to_string(), source.to_string())]),
            source_prefix: String::new(),
            destination_backend: "memory".to_string(),
            destination_settings: Settings::from([("name".to_string(), dest.to_string())]),
            destination_prefix: String::new(),
            mode: SyncMode::Transparent,
            check_interval_secs: 60,
            enabled: true,
            delete_orphans: false,
            encryption: None,
        }
    }

    struct Fixture {
        factory: Arc<StorageFactory>,
        encrypters: Arc<EncrypterRegistry>,
        source: Arc<dyn StorageBackend>,
        destination: Arc<dyn StorageBackend>,
    }

    async fn fixture(source: &str, dest: &str) -> Fixture {
        let factory = Arc::new(StorageFactory::new());
        let encrypters = Arc::new(EncrypterRegistry::new());
        let source_store = factory
            .create(
                "memory",
                &Settings::from([("name".to_string(), source.to_string())]),
            )
            .await
            .unwrap();
        let dest_store = factory
            .create(
                "memory",
                &Settings::from([("name".to_string(), dest.to_string())]),
            )
            .await
            .unwrap();
        Fixture {
            factory,
            encrypters,
            source: source_store,
            destination: dest_store,
        }
    }

    #[tokio::test]
    async fn test_plain_round_trip_copies_everything() {
        let fx = fixture("s1", "d1").await;
        fx.source.put("x", stream_from_bytes("one")).await.unwrap();
        fx.source.put("y/z", stream_from_bytes("two")).await.unwrap();

        let syncer = Syncer::new(fx.factory.clone(), fx.encrypters.clone());
        let result = syncer
            .sync(&policy("s1", "d1"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.synced, 2);
        assert_eq!(result.failed, 0);
        for (key, expected) in [("x", "one"), ("y/z", "two")] {
            let data = collect_stream(fx.destination.get(key).await.unwrap())
                .await
                .unwrap();
            assert_eq!(&data[..], expected.as_bytes());
        }
    }

    #[tokio::test]
    async fn test_prefix_filter_and_remap() {
        let fx = fixture("s2", "d2").await;
        for key in ["logs/a", "logs/b", "data/c"] {
            fx.source.put(key, stream_from_bytes("v")).await.unwrap();
        }
        let mut p = policy("s2", "d2");
        p.source_prefix = "logs/".to_string();
        p.destination_prefix = "mirror/".to_string();

        let syncer = Syncer::new(fx.factory.clone(), fx.encrypters.clone());
        let result = syncer.sync(&p, &CancellationToken::new()).await.unwrap();

        assert_eq!(result.synced, 2);
        let keys = fx.destination.list("").await.unwrap();
        assert_eq!(keys, vec!["mirror/a", "mirror/b"]);
    }

    #[tokio::test]
    async fn test_second_cycle_skips_unchanged_objects() {
        let fx = fixture("s3", "d3").await;
        fx.source.put("k", stream_from_bytes("v")).await.unwrap();
        let syncer = Syncer::new(fx.factory.clone(), fx.encrypters.clone());
        let p = policy("s3", "d3");

        let first = syncer.sync(&p, &CancellationToken::new()).await.unwrap();
        assert_eq!(first.synced, 1);
        let second = syncer.sync(&p, &CancellationToken::new()).await.unwrap();
        assert_eq!(second.synced, 0);
        assert_eq!(second.up_to_date, 1);

        fx.source.put("k", stream_from_bytes("changed")).await.unwrap();
        let third = syncer.sync(&p, &CancellationToken::new()).await.unwrap();
        assert_eq!(third.synced, 1);
    }

    #[tokio::test]
    async fn test_triple_layer_encryption() {
        let fx = fixture("s4", "d4").await;
        fx.encrypters.register(
            "backend-keys",
            Arc::new(StaticKeyring::new("bk").with_random_key("bk")),
        );
        let deks = Arc::new(
            StaticKeyring::new("src-k")
                .with_random_key("src-k")
                .with_random_key("dst-k"),
        );
        fx.encrypters.register("deks", deks.clone());

        // Client data arrives sealed with the source DEK and is stored
        // through the at-rest wrapper, so the raw bytes carry both layers.
        let backend_factory = fx.encrypters.get("backend-keys").unwrap();
        let wrapped_source = EncryptedStorage::new(fx.source.clone(), backend_factory.clone());
        let src_enc = deks.encrypter_for("src-k").unwrap();
        wrapped_source
            .put_with_metadata(
                "secret",
                encrypt_stream(src_enc, stream_from_bytes("P")),
                {
                    let mut m = ObjectMetadata::new("secret");
                    m.custom.insert(META_DEK_ID.to_string(), "src-k".to_string());
                    m
                },
            )
            .await
            .unwrap();

        let mut p = policy("s4", "d4");
        p.encryption = Some(super::super::ReplicationEncryption {
            backend: Some(EncryptionConfig {
                enabled: true,
                provider: "backend-keys".to_string(),
                default_key_id: None,
            }),
            source: Some(EncryptionConfig {
                enabled: true,
                provider: "deks".to_string(),
                default_key_id: Some("src-k".to_string()),
            }),
            destination: Some(EncryptionConfig {
                enabled: true,
                provider: "deks".to_string(),
                default_key_id: Some("dst-k".to_string()),
            }),
        });

        let syncer = Syncer::new(fx.factory.clone(), fx.encrypters.clone());
        let result = syncer.sync(&p, &CancellationToken::new()).await.unwrap();
        assert_eq!(result.synced, 1);
        assert_eq!(result.failed, 0);

        // Raw destination bytes are neither the plaintext nor the source
        // ciphertext.
        let raw_dest = collect_stream(fx.destination.get("secret").await.unwrap())
            .await
            .unwrap();
        assert_ne!(&raw_dest[..], b"P");

        // Reading through backend decrypt + destination DEK yields P.
        let wrapped_dest = EncryptedStorage::new(fx.destination.clone(), backend_factory);
        let dest_ciphertext = collect_stream(wrapped_dest.get("secret").await.unwrap())
            .await
            .unwrap();
        assert_ne!(&dest_ciphertext[..], b"P");
        let dst_enc = deks.encrypter_for("dst-k").unwrap();
        let plain = collect_stream(decrypt_stream(dst_enc, stream_from_bytes(dest_ciphertext)))
            .await
            .unwrap();
        assert_eq!(&plain[..], b"P");
    }

    #[tokio::test]
    async fn test_missing_dek_counts_as_object_failure() {
        let fx = fixture("s5", "d5").await;
        fx.encrypters
            .register("deks", Arc::new(StaticKeyring::new("other").with_random_key("other")));
        fx.source.put("k", stream_from_bytes("v")).await.unwrap();

        let mut p = policy("s5", "d5");
        p.encryption = Some(super::super::ReplicationEncryption {
            backend: None,
            source: None,
            destination: Some(EncryptionConfig {
                enabled: true,
                provider: "deks".to_string(),
                default_key_id: Some("missing-key".to_string()),
            }),
        });

        let syncer = Syncer::new(fx.factory.clone(), fx.encrypters.clone());
        let result = syncer.sync(&p, &CancellationToken::new()).await.unwrap();
        assert_eq!(result.synced, 0);
        assert_eq!(result.failed, 1);
        assert!(!fx.destination.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_opaque_mode_copies_ciphertext_unchanged() {
        let fx = fixture("s6", "d6").await;
        let deks = Arc::new(StaticKeyring::new("shared").with_random_key("shared"));
        fx.encrypters.register("deks", deks.clone());

        let enc = deks.encrypter_for("shared").unwrap();
        fx.source
            .put("k", encrypt_stream(enc, stream_from_bytes("payload")))
            .await
            .unwrap();
        let source_bytes = collect_stream(fx.source.get("k").await.unwrap()).await.unwrap();

        let mut p = policy("s6", "d6");
        p.mode = SyncMode::Opaque;
        p.encryption = Some(super::super::ReplicationEncryption {
            backend: None,
            source: Some(EncryptionConfig {
                enabled: true,
                provider: "deks".to_string(),
                default_key_id: Some("shared".to_string()),
            }),
            destination: Some(EncryptionConfig {
                enabled: true,
                provider: "deks".to_string(),
                default_key_id: Some("shared".to_string()),
            }),
        });

        let syncer = Syncer::new(fx.factory.clone(), fx.encrypters.clone());
        syncer.sync(&p, &CancellationToken::new()).await.unwrap();

        let dest_bytes = collect_stream(fx.destination.get("k").await.unwrap())
            .await
            .unwrap();
        assert_eq!(source_bytes, dest_bytes);
    }

    #[tokio::test]
    async fn test_orphan_deletion_is_opt_in() {
        let fx = fixture("s7", "d7").await;
        fx.source.put("keep", stream_from_bytes("v")).await.unwrap();
        fx.destination
            .put("stale", stream_from_bytes("old"))
            .await
            .unwrap();

        let syncer = Syncer::new(fx.factory.clone(), fx.encrypters.clone());

        let p = policy("s7", "d7");
        syncer.sync(&p, &CancellationToken::new()).await.unwrap();
        assert!(fx.destination.exists("stale").await.unwrap());

        let mut p = policy("s7", "d7");
        p.delete_orphans = true;
        let result = syncer.sync(&p, &CancellationToken::new()).await.unwrap();
        assert_eq!(result.orphans_deleted, 1);
        assert!(!fx.destination.exists("stale").await.unwrap());
        assert!(fx.destination.exists("keep").await.unwrap());
    }

    /// Memory-backed double whose listing can be made to fail, for the
    /// source-outage path.
    struct FlakyStorage {
        inner: MemoryStorage,
        fail_listing: Arc<AtomicBool>,
    }

    #[async_trait]
    impl StorageBackend for FlakyStorage {
        async fn put_with_metadata(
            &self,
            key: &str,
            data: ByteStream,
            metadata: ObjectMetadata,
        ) -> Result<()> {
            self.inner.put_with_metadata(key, data, metadata).await
        }
        async fn get(&self, key: &str) -> Result<ByteStream> {
            self.inner.get(key).await
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
            if self.fail_listing.load(Ordering::SeqCst) {
                return Err(CirruxError::Backend("listing outage".to_string()));
            }
            self.inner.list_with_options(options).await
        }
        async fn archive(&self, key: &str, sink: &dyn Archiver) -> Result<()> {
            self.inner.archive(key, sink).await
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
    }

    #[tokio::test]
    async fn test_orphans_survive_source_listing_outage() {
        let fx = fixture("s8", "d8").await;
        let fail = Arc::new(AtomicBool::new(false));
        let flaky_inner = MemoryStorage::new();
        flaky_inner.put("keep", stream_from_bytes("v")).await.unwrap();
        fx.destination
            .put("stale", stream_from_bytes("old"))
            .await
            .unwrap();

        let fail_flag = fail.clone();
        fx.factory.register("flaky", move |_settings| {
            let store = FlakyStorage {
                inner: flaky_inner.clone(),
                fail_listing: fail_flag.clone(),
            };
            Box::pin(async move { Ok(Arc::new(store) as Arc<dyn StorageBackend>) })
        });

        let mut p = policy("unused", "d8");
        p.source_backend = "flaky".to_string();
        p.source_settings = Settings::new();
        p.delete_orphans = true;

        fail.store(true, Ordering::SeqCst);
        let syncer = Syncer::new(fx.factory.clone(), fx.encrypters.clone());
        let err = syncer.sync(&p, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, CirruxError::Backend(_)));
        // The stale key must survive a source outage.
        assert!(fx.destination.exists("stale").await.unwrap());

        fail.store(false, Ordering::SeqCst);
        let result = syncer.sync(&p, &CancellationToken::new()).await.unwrap();
        assert_eq!(result.orphans_deleted, 1);
        assert!(!fx.destination.exists("stale").await.unwrap());
    }

    #[tokio::test]
    async fn test_cancelled_at_entry() {
        let fx = fixture("s9", "d9").await;
        fx.source.put("k", stream_from_bytes("v")).await.unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let syncer = Syncer::new(fx.factory.clone(), fx.encrypters.clone());
        let err = syncer.sync(&policy("s9", "d9"), &cancel).await.unwrap_err();
        assert!(matches!(err, CirruxError::Cancelled));
        assert!(!fx.destination.exists("k").await.unwrap());
    }
}
