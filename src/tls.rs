// ===========================================
// Cirrux - Multi-Cloud Object Storage
// (c) 2025 Neo Qiss. All Rights Reserved.
// Created by Neo Qiss - Unleash the power of Rust.
// ===========================================
// TLS configuration model for the service boundary

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::errors::{CirruxError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsMode {
    #[default]
    Disabled,
    ServerOnly,
    Mutual,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Serialize, Deserialize)]
pub enum TlsVersion {
    #[default]
    #[serde(rename = "1.2")]
    V1_2,
    #[serde(rename = "1.3")]
    V1_3,
}

/// Declarative TLS settings. The socket wiring lives with whichever
/// server embeds the crate; this model only validates coherence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    #[serde(default)]
    pub mode: TlsMode,
    #[serde(default)]
    pub cert_path: Option<PathBuf>,
    #[serde(default)]
    pub key_path: Option<PathBuf>,
    /// CA bundle used to verify client certificates in mutual mode.
    #[serde(default)]
    pub client_ca_path: Option<PathBuf>,
    #[serde(default)]
    pub min_version: TlsVersion,
}

impl TlsConfig {
    pub fn validate(&self) -> Result<()> {
        match self.mode {
            TlsMode::Disabled => Ok(()),
            TlsMode::ServerOnly | TlsMode::Mutual => {
                if self.cert_path.is_none() || self.key_path.is_none() {
                    return Err(CirruxError::NotConfigured(
                        "TLS requires both cert_path and key_path".to_string(),
                    ));
                }
                if self.mode == TlsMode::Mutual && self.client_ca_path.is_none() {
                    return Err(CirruxError::NotConfigured(
                        "mutual TLS requires client_ca_path".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }
}
