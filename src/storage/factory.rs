// ===========================================
// Cirrux - Multi-Cloud Object Storage
// (c) 2025 Neo Qiss. All Rights Reserved.
// Created by Neo Qiss - Unleash the power of Rust.
// ===========================================
// Backend and archiver construction from flat settings maps

use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::archive::{Archiver, LocalArchiver, MemoryArchiver};
use crate::errors::{CirruxError, Result};

use super::{LocalStorage, MemoryStorage, StorageBackend};

/// Flat string settings, the only configuration a constructor sees.
/// Unknown keys are ignored.
pub type Settings = HashMap<String, String>;

type StorageConstructor =
    Arc<dyn Fn(Settings) -> BoxFuture<'static, Result<Arc<dyn StorageBackend>>> + Send + Sync>;
type ArchiverConstructor =
    Arc<dyn Fn(Settings) -> BoxFuture<'static, Result<Arc<dyn Archiver>>> + Send + Sync>;

/// Builds storage backends from `{type, settings}`. `local` and
/// `memory` are built in; provider SDK wrappers register themselves
/// under their own type names. Memory stores are pooled by their `name`
/// setting so every handle with the same name shares one keyspace.
pub struct StorageFactory {
    constructors: std::sync::RwLock<HashMap<String, StorageConstructor>>,
}

impl StorageFactory {
    pub fn new() -> Self {
        let factory = Self {
            constructors: std::sync::RwLock::new(HashMap::new()),
        };

        let memory_pool: Arc<Mutex<HashMap<String, MemoryStorage>>> =
            Arc::new(Mutex::new(HashMap::new()));
        factory.register("memory", move |settings: Settings| {
            let pool = memory_pool.clone();
            Box::pin(async move {
                let name = settings
                    .get("name")
                    .cloned()
                    .unwrap_or_else(|| "default".to_string());
                let mut pool = pool.lock().await;
                let store = pool.entry(name).or_insert_with(MemoryStorage::new).clone();
                Ok(Arc::new(store) as Arc<dyn StorageBackend>)
            })
        });

        factory.register("local", |settings: Settings| {
            Box::pin(async move {
                let root = settings.get("root").cloned().ok_or_else(|| {
                    CirruxError::NotConfigured("local backend requires a 'root' setting".to_string())
                })?;
                let store = LocalStorage::new(root).await?;
                Ok(Arc::new(store) as Arc<dyn StorageBackend>)
            })
        });

        factory
    }

    /// Register a constructor for a backend type.
    pub fn register<F>(&self, backend_type: &str, constructor: F)
    where
        F: Fn(Settings) -> BoxFuture<'static, Result<Arc<dyn StorageBackend>>>
            + Send
            + Sync
            + 'static,
    {
        self.constructors
            .write()
            .unwrap()
            .insert(backend_type.to_string(), Arc::new(constructor));
    }

    pub fn has_type(&self, backend_type: &str) -> bool {
        self.constructors.read().unwrap().contains_key(backend_type)
    }

    pub async fn create(
        &self,
        backend_type: &str,
        settings: &Settings,
    ) -> Result<Arc<dyn StorageBackend>> {
        let constructor = self
            .constructors
            .read()
            .unwrap()
            .get(backend_type)
            .cloned()
            .ok_or_else(|| {
                CirruxError::NotConfigured(format!("unknown backend type '{}'", backend_type))
            })?;
        constructor(settings.clone()).await
    }
}

impl Default for StorageFactory {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds archive sinks from `{type, settings}`. `local` and `memory`
/// are built in; memory sinks are pooled by name for inspection.
pub struct ArchiverFactory {
    constructors: std::sync::RwLock<HashMap<String, ArchiverConstructor>>,
    memory_pool: Arc<Mutex<HashMap<String, Arc<MemoryArchiver>>>>,
}

impl ArchiverFactory {
    pub fn new() -> Self {
        let memory_pool: Arc<Mutex<HashMap<String, Arc<MemoryArchiver>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let factory = Self {
            constructors: std::sync::RwLock::new(HashMap::new()),
            memory_pool: memory_pool.clone(),
        };

        let pool = memory_pool;
        factory.register("memory", move |settings: Settings| {
            let pool = pool.clone();
            Box::pin(async move {
                let name = settings
                    .get("name")
                    .cloned()
                    .unwrap_or_else(|| "default".to_string());
                let mut pool = pool.lock().await;
                let sink = pool
                    .entry(name)
                    .or_insert_with(|| Arc::new(MemoryArchiver::new()))
                    .clone();
                Ok(sink as Arc<dyn Archiver>)
            })
        });

        factory.register("local", |settings: Settings| {
            Box::pin(async move {
                let root = settings.get("root").cloned().ok_or_else(|| {
                    CirruxError::NotConfigured("local archiver requires a 'root' setting".to_string())
                })?;
                Ok(Arc::new(LocalArchiver::new(root)) as Arc<dyn Archiver>)
            })
        });

        factory
    }

    pub fn register<F>(&self, archiver_type: &str, constructor: F)
    where
        F: Fn(Settings) -> BoxFuture<'static, Result<Arc<dyn Archiver>>> + Send + Sync + 'static,
    {
        self.constructors
            .write()
            .unwrap()
            .insert(archiver_type.to_string(), Arc::new(constructor));
    }

    pub async fn create(&self, archiver_type: &str, settings: &Settings) -> Result<Arc<dyn Archiver>> {
        let constructor = self
            .constructors
            .read()
            .unwrap()
            .get(archiver_type)
            .cloned()
            .ok_or_else(|| {
                CirruxError::NotConfigured(format!("unknown archiver type '{}'", archiver_type))
            })?;
        constructor(settings.clone()).await
    }

    /// Test hook: the shared memory sink registered under `name`.
    pub async fn memory_sink(&self, name: &str) -> Option<Arc<MemoryArchiver>> {
        self.memory_pool.lock().await.get(name).cloned()
    }
}

impl Default for ArchiverFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::stream_from_bytes;

    #[tokio::test]
    async fn test_memory_backends_share_by_name() {
        let factory = StorageFactory::new();
        let settings = Settings::from([("name".to_string(), "bucket-a".to_string())]);
        let first = factory.create("memory", &settings).await.unwrap();
        let second = factory.create("memory", &settings).await.unwrap();
        first.put("k", stream_from_bytes("v")).await.unwrap();
        assert!(second.exists("k").await.unwrap());

        let other = factory
            .create(
                "memory",
                &Settings::from([("name".to_string(), "bucket-b".to_string())]),
            )
            .await
            .unwrap();
        assert!(!other.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_type_fails() {
        let factory = StorageFactory::new();
        let err = factory.create("s3", &Settings::new()).await.err().unwrap();
        assert!(matches!(err, CirruxError::NotConfigured(_)));
        assert!(!factory.has_type("s3"));
        assert!(factory.has_type("local"));
    }

    #[tokio::test]
    async fn test_local_requires_root() {
        let factory = StorageFactory::new();
        let err = factory.create("local", &Settings::new()).await.err().unwrap();
        assert!(matches!(err, CirruxError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn test_registered_provider_is_constructible() {
        let factory = StorageFactory::new();
        factory.register("custom", |_settings| {
            Box::pin(async { Ok(Arc::new(MemoryStorage::new()) as Arc<dyn StorageBackend>) })
        });
        assert!(factory.has_type("custom"));
        factory.create("custom", &Settings::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_archiver_factory_memory_pool() {
        let factory = ArchiverFactory::new();
        let settings = Settings::from([("name".to_string(), "vault".to_string())]);
        let sink = factory.create("memory", &settings).await.unwrap();
        sink.put("k", stream_from_bytes("cold")).await.unwrap();
        let shared = factory.memory_sink("vault").await.unwrap();
        assert_eq!(shared.keys().await, vec!["k"]);
    }
}
