// ===========================================
// Cirrux - Multi-Cloud Object Storage
// (c) 2025 Neo Qiss. All Rights Reserved.
// Created by Neo Qiss - Unleash the power of Rust.
// ===========================================
// Storage engine facade: named backends, routing, audit, replication wiring

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::archive::Archiver;
use crate::audit::{AuditEvent, AuditEventType, AuditLogger};
use crate::auth::Principal;
use crate::errors::{CirruxError, Result};
use crate::lifecycle::{apply_policies as run_applier, ApplyReport, LifecyclePolicy};
use crate::replication::{OsFileSystem, ReplicationManager, Scheduler};
use crate::storage::factory::{ArchiverFactory, Settings, StorageFactory};
use crate::storage::{
    ByteStream, ListOptions, ListPage, ObjectMetadata, StorageBackend,
};
use crate::validate::{
    parse_object_ref, parse_prefix_ref, validate_backend_name, validate_metadata, ObjectRef,
};

/// Per-request context: who is calling and how to cancel. A default
/// context is anonymous and never cancelled.
#[derive(Clone, Default)]
pub struct OpContext {
    pub principal: Option<Principal>,
    pub request_id: Option<String>,
    pub ip_address: Option<String>,
    pub cancel: CancellationToken,
}

impl OpContext {
    fn check(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(CirruxError::Cancelled);
        }
        Ok(())
    }

    fn decorate(&self, mut event: AuditEvent) -> AuditEvent {
        event = event.with_principal(self.principal.clone());
        event.request_id = self.request_id.clone();
        event.ip_address = self.ip_address.clone();
        event
    }
}

/// Options for [`StorageEngine::enable_replication`].
#[derive(Debug, Clone)]
pub struct ReplicationOptions {
    pub policy_file: PathBuf,
    /// Start the background scheduler immediately.
    pub run_in_background: bool,
}

/// Storage engine that routes operations across named backends. Every
/// call validates its inputs before any backend is touched, and every
/// mutating call emits one audit event.
pub struct StorageEngine {
    backends: HashMap<String, Arc<dyn StorageBackend>>,
    default_backend: String,
    audit: Option<Arc<dyn AuditLogger>>,
    factory: Arc<StorageFactory>,
    archivers: Arc<ArchiverFactory>,
    schedulers: Mutex<HashMap<String, Arc<Scheduler>>>,
}

impl StorageEngine {
    pub fn new(default_backend: &str) -> Self {
        Self {
            backends: HashMap::new(),
            default_backend: default_backend.to_string(),
            audit: None,
            factory: Arc::new(StorageFactory::new()),
            archivers: Arc::new(ArchiverFactory::new()),
            schedulers: Mutex::new(HashMap::new()),
        }
    }

    /// Add a storage backend under a validated name. Names are fixed at
    /// init time.
    pub fn add_backend(&mut self, name: &str, backend: Arc<dyn StorageBackend>) -> Result<()> {
        validate_backend_name(name)?;
        self.backends.insert(name.to_string(), backend);
        Ok(())
    }

    pub fn with_audit(&mut self, audit: Arc<dyn AuditLogger>) {
        self.audit = Some(audit);
    }

    pub fn factory(&self) -> &Arc<StorageFactory> {
        &self.factory
    }

    pub fn archivers(&self) -> &Arc<ArchiverFactory> {
        &self.archivers
    }

    fn backend(&self, name: &str) -> Result<Arc<dyn StorageBackend>> {
        self.backends
            .get(name)
            .cloned()
            .ok_or_else(|| CirruxError::NotConfigured(format!("unknown backend '{}'", name)))
    }

    fn resolve(&self, reference: &str) -> Result<(Arc<dyn StorageBackend>, ObjectRef)> {
        let parsed = parse_object_ref(reference, &self.default_backend)?;
        let backend = self.backend(&parsed.backend)?;
        Ok((backend, parsed))
    }

    fn resolve_prefix(&self, reference: &str) -> Result<(Arc<dyn StorageBackend>, ObjectRef)> {
        let parsed = parse_prefix_ref(reference, &self.default_backend)?;
        let backend = self.backend(&parsed.backend)?;
        Ok((backend, parsed))
    }

    fn emit(&self, event: AuditEvent) {
        if let Some(audit) = &self.audit {
            if let Err(e) = audit.log(&event) {
                warn!(error = %e, "audit emit failed");
            }
        }
    }

    fn audit_outcome<T>(
        &self,
        ctx: &OpContext,
        event_type: AuditEventType,
        backend: &str,
        key: &str,
        action: &str,
        result: &Result<T>,
    ) {
        let mut event = ctx.decorate(AuditEvent::new(event_type, backend, key, action));
        if let Err(e) = result {
            event = event.failed(&e.to_string());
        }
        self.emit(event);
    }

    // --- Object operations ---------------------------------------------

    pub async fn put(&self, reference: &str, data: ByteStream, ctx: &OpContext) -> Result<()> {
        self.put_with_metadata(reference, data, None, ctx).await
    }

    pub async fn put_with_metadata(
        &self,
        reference: &str,
        data: ByteStream,
        metadata: Option<ObjectMetadata>,
        ctx: &OpContext,
    ) -> Result<()> {
        ctx.check()?;
        let (backend, parsed) = self.resolve(reference)?;
        if let Some(meta) = &metadata {
            validate_metadata(&meta.custom)?;
        }
        let metadata = metadata.unwrap_or_else(|| ObjectMetadata::new(&parsed.key));
        let result = backend
            .put_with_metadata(&parsed.key, data, metadata)
            .await;
        self.audit_outcome(
            ctx,
            AuditEventType::ObjectCreated,
            &parsed.backend,
            &parsed.key,
            "put",
            &result,
        );
        result
    }

    pub async fn get(&self, reference: &str, ctx: &OpContext) -> Result<ByteStream> {
        ctx.check()?;
        let (backend, parsed) = self.resolve(reference)?;
        backend.get(&parsed.key).await
    }

    pub async fn delete(&self, reference: &str, ctx: &OpContext) -> Result<()> {
        ctx.check()?;
        let (backend, parsed) = self.resolve(reference)?;
        let result = backend.delete(&parsed.key).await;
        self.audit_outcome(
            ctx,
            AuditEventType::ObjectDeleted,
            &parsed.backend,
            &parsed.key,
            "delete",
            &result,
        );
        result
    }

    pub async fn exists(&self, reference: &str, ctx: &OpContext) -> Result<bool> {
        ctx.check()?;
        let (backend, parsed) = self.resolve(reference)?;
        backend.exists(&parsed.key).await
    }

    pub async fn list(&self, reference: &str, ctx: &OpContext) -> Result<Vec<String>> {
        ctx.check()?;
        let (backend, parsed) = self.resolve_prefix(reference)?;
        backend.list(&parsed.key).await
    }

    pub async fn list_with_options(
        &self,
        reference: &str,
        mut options: ListOptions,
        ctx: &OpContext,
    ) -> Result<ListPage> {
        ctx.check()?;
        let (backend, parsed) = self.resolve_prefix(reference)?;
        options.prefix = parsed.key;
        backend.list_with_options(options).await
    }

    pub async fn get_metadata(&self, reference: &str, ctx: &OpContext) -> Result<ObjectMetadata> {
        ctx.check()?;
        let (backend, parsed) = self.resolve(reference)?;
        backend.get_metadata(&parsed.key).await
    }

    pub async fn update_metadata(
        &self,
        reference: &str,
        metadata: ObjectMetadata,
        ctx: &OpContext,
    ) -> Result<()> {
        ctx.check()?;
        let (backend, parsed) = self.resolve(reference)?;
        validate_metadata(&metadata.custom)?;
        let result = backend.update_metadata(&parsed.key, metadata).await;
        self.audit_outcome(
            ctx,
            AuditEventType::MetadataUpdated,
            &parsed.backend,
            &parsed.key,
            "update_metadata",
            &result,
        );
        result
    }

    pub async fn archive(
        &self,
        reference: &str,
        sink: &dyn Archiver,
        ctx: &OpContext,
    ) -> Result<()> {
        ctx.check()?;
        let (backend, parsed) = self.resolve(reference)?;
        let result = backend.archive(&parsed.key, sink).await;
        self.audit_outcome(
            ctx,
            AuditEventType::ObjectArchived,
            &parsed.backend,
            &parsed.key,
            "archive",
            &result,
        );
        result
    }

    /// Archive into a sink built from `{type, settings}`.
    pub async fn archive_to(
        &self,
        reference: &str,
        archiver_type: &str,
        settings: &Settings,
        ctx: &OpContext,
    ) -> Result<()> {
        let sink = self.archivers.create(archiver_type, settings).await?;
        self.archive(reference, sink.as_ref(), ctx).await
    }

    // --- Lifecycle operations ------------------------------------------

    pub async fn add_policy(
        &self,
        backend_name: &str,
        policy: LifecyclePolicy,
        ctx: &OpContext,
    ) -> Result<()> {
        ctx.check()?;
        let backend = self.backend(backend_name)?;
        let policy_id = policy.id.clone();
        let result = backend.add_policy(policy).await;
        self.audit_outcome(
            ctx,
            AuditEventType::PolicyAdded,
            backend_name,
            &policy_id,
            "add_policy",
            &result,
        );
        result
    }

    pub async fn remove_policy(&self, backend_name: &str, id: &str, ctx: &OpContext) -> Result<()> {
        ctx.check()?;
        let backend = self.backend(backend_name)?;
        let result = backend.remove_policy(id).await;
        self.audit_outcome(
            ctx,
            AuditEventType::PolicyRemoved,
            backend_name,
            id,
            "remove_policy",
            &result,
        );
        result
    }

    pub async fn get_policies(&self, backend_name: &str) -> Result<Vec<LifecyclePolicy>> {
        self.backend(backend_name)?.get_policies().await
    }

    /// Run the backend's lifecycle policies once, on demand.
    pub async fn apply_policies(&self, backend_name: &str, ctx: &OpContext) -> Result<ApplyReport> {
        ctx.check()?;
        let backend = self.backend(backend_name)?;
        let policies = backend.get_policies().await?;
        let result = run_applier(backend.as_ref(), &policies, &ctx.cancel).await;
        self.audit_outcome(
            ctx,
            AuditEventType::PoliciesApplied,
            backend_name,
            "",
            "apply_policies",
            &result,
        );
        result
    }

    // --- Replication wiring --------------------------------------------

    /// Attach a persistent replication manager to a backend and
    /// optionally start its background scheduler. Backends without the
    /// replication capability are rejected.
    pub async fn enable_replication(
        &self,
        backend_name: &str,
        options: ReplicationOptions,
    ) -> Result<Arc<ReplicationManager>> {
        let backend = self.backend(backend_name)?;
        let binding = backend
            .replication()
            .ok_or_else(|| CirruxError::ReplicationNotSupported {
                backend: backend_name.to_string(),
            })?;

        let manager = Arc::new(
            ReplicationManager::open(
                &options.policy_file,
                Arc::new(OsFileSystem),
                self.factory.clone(),
            )
            .await?,
        );
        binding.set_manager(manager.clone());

        if options.run_in_background {
            let scheduler = Arc::new(Scheduler::start(manager.clone()).await);
            self.schedulers
                .lock()
                .await
                .insert(backend_name.to_string(), scheduler);
        }
        Ok(manager)
    }

    /// The replication manager previously attached to a backend.
    pub fn replication_manager(&self, backend_name: &str) -> Result<Arc<ReplicationManager>> {
        let backend = self.backend(backend_name)?;
        let binding = backend
            .replication()
            .ok_or_else(|| CirruxError::ReplicationNotSupported {
                backend: backend_name.to_string(),
            })?;
        binding.manager().ok_or_else(|| {
            CirruxError::NotConfigured(format!(
                "replication is not enabled on backend '{}'",
                backend_name
            ))
        })
    }

    async fn shutdown_schedulers(&self) {
        let schedulers: Vec<Arc<Scheduler>> =
            self.schedulers.lock().await.drain().map(|(_, s)| s).collect();
        for scheduler in schedulers {
            scheduler.shutdown().await;
        }
    }
}

// --- Process-wide singleton --------------------------------------------

static ENGINE: Lazy<std::sync::RwLock<Option<Arc<StorageEngine>>>> =
    Lazy::new(|| std::sync::RwLock::new(None));

/// Install the engine as the process singleton. Fails while another
/// engine is installed; `reset` clears it.
pub fn initialize(engine: StorageEngine) -> Result<()> {
    if engine.backends.is_empty() {
        return Err(CirruxError::NotConfigured(
            "at least one backend is required".to_string(),
        ));
    }
    if !engine.backends.contains_key(&engine.default_backend) {
        return Err(CirruxError::NotConfigured(format!(
            "default backend '{}' is not registered",
            engine.default_backend
        )));
    }
    let mut guard = ENGINE.write().unwrap();
    if guard.is_some() {
        return Err(CirruxError::AlreadyInitialized);
    }
    *guard = Some(Arc::new(engine));
    Ok(())
}

/// The installed engine, or `NotInitialized`.
pub fn engine() -> Result<Arc<StorageEngine>> {
    ENGINE
        .read()
        .unwrap()
        .clone()
        .ok_or(CirruxError::NotInitialized)
}

pub fn is_initialized() -> bool {
    ENGINE.read().unwrap().is_some()
}

/// Clear the singleton and stop any background schedulers. Test hook.
pub async fn reset() {
    let engine = ENGINE.write().unwrap().take();
    if let Some(engine) = engine {
        engine.shutdown_schedulers().await;
    }
}
