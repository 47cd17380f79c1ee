// ===========================================
// Cirrux - Multi-Cloud Object Storage
// (c) 2025 Neo Qiss. All Rights Reserved.
// Created by Neo Qiss - Unleash the power of Rust.
// ===========================================
// HTTP API server

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use futures_util::TryStreamExt;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::errors::{CirruxError, Result};
use crate::facade::{OpContext, StorageEngine};
use crate::storage::{ByteStream, ListOptions, ObjectMetadata};

/// HTTP server over the storage engine facade. Error bodies only ever
/// carry the sanitized message; details stay in the logs.
pub struct HttpServer {
    engine: Arc<StorageEngine>,
    port: u16,
}

impl HttpServer {
    /// Create a new HTTP server
    pub fn new(engine: Arc<StorageEngine>, port: u16) -> Self {
        Self { engine, port }
    }

    /// Start the HTTP server
    pub async fn start(&self) -> Result<()> {
        let app = self.create_router();

        let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", self.port))
            .await
            .map_err(|e| CirruxError::Backend(format!("failed to bind port {}: {}", self.port, e)))?;

        tracing::info!("HTTP server starting on port {}", self.port);

        axum::serve(listener, app)
            .await
            .map_err(|e| CirruxError::Backend(format!("HTTP server error: {}", e)))?;

        Ok(())
    }

    /// Create the API router
    pub fn create_router(&self) -> Router {
        Router::new()
            .route("/health", get(health_check))
            .route("/ping", get(ping))
            .route(
                "/objects/*key",
                get(get_object)
                    .put(put_object)
                    .delete(delete_object)
                    .head(head_object),
            )
            .route("/objects", get(list_objects))
            .route("/metadata/*key", get(get_metadata).put(update_metadata))
            .with_state(self.engine.clone())
    }
}

fn status_for(error: &CirruxError) -> StatusCode {
    match error {
        CirruxError::Validation { .. } => StatusCode::BAD_REQUEST,
        CirruxError::NotFound { .. } | CirruxError::PolicyNotFound { .. } => StatusCode::NOT_FOUND,
        CirruxError::Unauthorized(_)
        | CirruxError::InvalidCredentials(_)
        | CirruxError::MissingCredentials(_) => StatusCode::UNAUTHORIZED,
        CirruxError::InsufficientPermissions(_) => StatusCode::FORBIDDEN,
        CirruxError::Cancelled => StatusCode::REQUEST_TIMEOUT,
        CirruxError::Backend(_) | CirruxError::Io(_) | CirruxError::NotInitialized => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(error: CirruxError) -> Response {
    let status = status_for(&error);
    tracing::debug!(error = %error, status = %status, "request failed");
    (
        status,
        Json(json!({ "error": error.user_facing_message() })),
    )
        .into_response()
}

/// Health check endpoint
async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": "cirrux",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn ping() -> &'static str {
    "pong"
}

fn request_stream(body: Body) -> ByteStream {
    Box::pin(
        body.into_data_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
    )
}

async fn put_object(
    State(engine): State<Arc<StorageEngine>>,
    Path(key): Path<String>,
    body: Body,
) -> Response {
    match engine
        .put(&key, request_stream(body), &OpContext::default())
        .await
    {
        Ok(()) => StatusCode::CREATED.into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_object(
    State(engine): State<Arc<StorageEngine>>,
    Path(key): Path<String>,
) -> Response {
    match engine.get(&key, &OpContext::default()).await {
        Ok(stream) => Body::from_stream(stream).into_response(),
        Err(e) => error_response(e),
    }
}

async fn head_object(
    State(engine): State<Arc<StorageEngine>>,
    Path(key): Path<String>,
) -> Response {
    match engine.exists(&key, &OpContext::default()).await {
        Ok(true) => StatusCode::OK.into_response(),
        Ok(false) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => error_response(e),
    }
}

async fn delete_object(
    State(engine): State<Arc<StorageEngine>>,
    Path(key): Path<String>,
) -> Response {
    match engine.delete(&key, &OpContext::default()).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize, Default)]
struct ListParams {
    #[serde(default)]
    prefix: String,
    delimiter: Option<String>,
    max_results: Option<usize>,
    continue_from: Option<String>,
}

async fn list_objects(
    State(engine): State<Arc<StorageEngine>>,
    Query(params): Query<ListParams>,
) -> Response {
    let options = ListOptions {
        prefix: String::new(),
        delimiter: params.delimiter,
        max_results: params.max_results,
        continue_from: params.continue_from,
    };
    match engine
        .list_with_options(&params.prefix, options, &OpContext::default())
        .await
    {
        Ok(page) => Json(json!({
            "objects": page.objects,
            "common_prefixes": page.common_prefixes,
            "next_token": page.next_token,
            "truncated": page.truncated,
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_metadata(
    State(engine): State<Arc<StorageEngine>>,
    Path(key): Path<String>,
) -> Response {
    match engine.get_metadata(&key, &OpContext::default()).await {
        Ok(meta) => Json(meta).into_response(),
        Err(e) => error_response(e),
    }
}

async fn update_metadata(
    State(engine): State<Arc<StorageEngine>>,
    Path(key): Path<String>,
    Json(metadata): Json<ObjectMetadata>,
) -> Response {
    match engine
        .update_metadata(&key, metadata, &OpContext::default())
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}
