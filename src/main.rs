// ===========================================
// Cirrux - Multi-Cloud Object Storage
// (c) 2025 Neo Qiss. All Rights Reserved.
// Created by Neo Qiss - Unleash the power of Rust.
// ===========================================

use std::path::PathBuf;
use std::sync::Arc;

use cirrux::audit::TracingAuditLogger;
use cirrux::errors::Result;
use cirrux::facade::{self, ReplicationOptions, StorageEngine};
use cirrux::network::HttpServer;
use cirrux::storage::{LocalStorage, MemoryStorage};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    tracing::info!("Starting Cirrux server...");

    let data_dir = std::env::var("CIRRUX_DATA_DIR").unwrap_or_else(|_| "./data".to_string());
    let port: u16 = std::env::var("CIRRUX_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);

    // Assemble the backend registry: a durable local backend as the
    // default plus a scratch memory backend.
    let mut engine = StorageEngine::new("default");
    engine.add_backend("default", Arc::new(LocalStorage::new(&data_dir).await?))?;
    engine.add_backend("scratch", Arc::new(MemoryStorage::new()))?;
    engine.with_audit(Arc::new(TracingAuditLogger));

    facade::initialize(engine)?;
    let engine = facade::engine()?;

    // Replication comes up when a policy file is configured.
    if let Ok(policy_file) = std::env::var("CIRRUX_REPLICATION_POLICIES") {
        let manager = engine
            .enable_replication(
                "default",
                ReplicationOptions {
                    policy_file: PathBuf::from(policy_file),
                    run_in_background: true,
                },
            )
            .await?;
        tracing::info!(
            policies = manager.list_policies().await.len(),
            "replication enabled on backend 'default'"
        );
    }

    tracing::info!("Cirrux server ready on http://localhost:{}", port);
    tracing::info!("API endpoints:");
    tracing::info!("  GET    /health - Health check");
    tracing::info!("  GET    /ping - Liveness probe");
    tracing::info!("  PUT    /objects/:key - Store an object");
    tracing::info!("  GET    /objects/:key - Fetch an object");
    tracing::info!("  DELETE /objects/:key - Delete an object");
    tracing::info!("  GET    /metadata/:key - Fetch object metadata");

    let http_server = HttpServer::new(engine, port);
    http_server.start().await?;

    Ok(())
}
