// ===========================================
// Cirrux - Multi-Cloud Object Storage
// (c) 2025 Neo Qiss. All Rights Reserved.
// Created by Neo Qiss - Unleash the power of Rust.
// ===========================================
// Custom error types

use thiserror::Error;

/// Core error types for Cirrux operations
#[derive(Error, Debug)]
pub enum CirruxError {
    #[error("Validation failed for {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("Object not found: {key}")]
    NotFound { key: String },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    #[error("Insufficient permissions: {0}")]
    InsufficientPermissions(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Not configured: {0}")]
    NotConfigured(String),

    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),

    #[error("Policy not found: {id}")]
    PolicyNotFound { id: String },

    #[error("Backend '{backend}' does not support replication")]
    ReplicationNotSupported { backend: String },

    #[error("No encryption key available for key id: {key_id}")]
    KeyUnavailable { key_id: String },

    #[error("Storage facade is not initialized")]
    NotInitialized,

    #[error("Storage facade is already initialized")]
    AlreadyInitialized,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CirruxError {
    /// Convenience constructor for validation failures.
    pub fn validation(field: &str, reason: impl Into<String>) -> Self {
        CirruxError::Validation {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// Stable, sanitized message for the RPC/HTTP boundary. Filesystem
    /// paths and provider internals never cross it.
    pub fn user_facing_message(&self) -> &'static str {
        match self {
            CirruxError::Validation { .. } => "invalid request",
            CirruxError::NotFound { .. } => "object not found",
            CirruxError::Unauthorized(_)
            | CirruxError::InvalidCredentials(_)
            | CirruxError::MissingCredentials(_)
            | CirruxError::InsufficientPermissions(_) => "access denied",
            CirruxError::Cancelled => "request timeout",
            CirruxError::Backend(_) | CirruxError::Io(_) => "service unavailable",
            CirruxError::InvalidPolicy(_) => "invalid policy",
            CirruxError::PolicyNotFound { .. } => "policy not found",
            CirruxError::ReplicationNotSupported { .. } => "replication not supported",
            _ => "internal server error",
        }
    }

    /// True for errors that mean "the object is gone" rather than a
    /// provider failure. Delete paths treat both as success.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CirruxError::NotFound { .. })
    }
}

/// Result type alias for Cirrux operations
pub type Result<T> = std::result::Result<T, CirruxError>;

/// Convert anyhow::Error to CirruxError
impl From<anyhow::Error> for CirruxError {
    fn from(err: anyhow::Error) -> Self {
        CirruxError::Internal(err.to_string())
    }
}
