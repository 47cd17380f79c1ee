// ===========================================
// Cirrux - Multi-Cloud Object Storage
// (c) 2025 Neo Qiss. All Rights Reserved.
// Created by Neo Qiss - Unleash the power of Rust.
// ===========================================
// Boundary authentication: principals and authenticator adapters

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::{CirruxError, Result};

pub mod token;

pub use token::TokenAuthority;

/// Who a request acts as. Built per request by an authenticator and
/// attached to audit events; never persisted by the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub name: String,
    pub principal_type: PrincipalType,
    pub roles: Vec<String>,
    pub attributes: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalType {
    User,
    Service,
}

impl Principal {
    pub fn user(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            principal_type: PrincipalType::User,
            roles: Vec::new(),
            attributes: HashMap::new(),
        }
    }

    pub fn service(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            principal_type: PrincipalType::Service,
            roles: Vec::new(),
            attributes: HashMap::new(),
        }
    }
}

/// Credential material extracted from a request before authentication.
#[derive(Debug, Clone, Default)]
pub struct RequestCredentials {
    /// `Authorization: Bearer <token>` value, if present.
    pub bearer_token: Option<String>,
    /// Verified TLS peer identity (certificate subject), if any.
    pub peer_identity: Option<String>,
}

/// Turns request credentials into a [`Principal`].
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, credentials: &RequestCredentials) -> Result<Principal>;
}

/// Validates HMAC-signed bearer tokens issued by a [`TokenAuthority`].
pub struct BearerAuthenticator {
    authority: Arc<TokenAuthority>,
}

impl BearerAuthenticator {
    pub fn new(authority: Arc<TokenAuthority>) -> Self {
        Self { authority }
    }
}

#[async_trait]
impl Authenticator for BearerAuthenticator {
    async fn authenticate(&self, credentials: &RequestCredentials) -> Result<Principal> {
        let token = credentials
            .bearer_token
            .as_deref()
            .ok_or_else(|| CirruxError::MissingCredentials("no bearer token".to_string()))?;
        self.authority.verify(token)
    }
}

/// Maps a verified TLS peer identity onto a service principal.
pub struct MtlsAuthenticator;

#[async_trait]
impl Authenticator for MtlsAuthenticator {
    async fn authenticate(&self, credentials: &RequestCredentials) -> Result<Principal> {
        let identity = credentials
            .peer_identity
            .as_deref()
            .ok_or_else(|| CirruxError::MissingCredentials("no client certificate".to_string()))?;
        Ok(Principal::service(identity))
    }
}

/// Tries each authenticator in order until one succeeds. The last
/// failure is surfaced when none do.
pub struct CompositeAuthenticator {
    authenticators: Vec<Arc<dyn Authenticator>>,
}

impl CompositeAuthenticator {
    pub fn new(authenticators: Vec<Arc<dyn Authenticator>>) -> Self {
        Self { authenticators }
    }
}

#[async_trait]
impl Authenticator for CompositeAuthenticator {
    async fn authenticate(&self, credentials: &RequestCredentials) -> Result<Principal> {
        let mut last_error =
            CirruxError::MissingCredentials("no authenticators configured".to_string());
        for authenticator in &self.authenticators {
            match authenticator.authenticate(credentials).await {
                Ok(principal) => return Ok(principal),
                Err(e) => last_error = e,
            }
        }
        Err(last_error)
    }
}
