// ===========================================
// Cirrux - Multi-Cloud Object Storage
// (c) 2025 Neo Qiss. All Rights Reserved.
// Created by Neo Qiss - Unleash the power of Rust.
// ===========================================
// AES-256-GCM chunk transform

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use base64::Engine;
use rand::RngCore;

use crate::errors::{CirruxError, Result};

use super::{Encrypter, NONCE_SIZE};

/// Algorithm tag recorded in object metadata annotations.
pub const AES256_GCM: &str = "AES256-GCM";

/// AES-256-GCM encrypter bound to a single key id.
pub struct AesGcmEncrypter {
    key_id: String,
    cipher: Aes256Gcm,
}

impl AesGcmEncrypter {
    pub fn new(key_id: &str, key: [u8; 32]) -> Self {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        Self {
            key_id: key_id.to_string(),
            cipher,
        }
    }
}

impl Encrypter for AesGcmEncrypter {
    fn key_id(&self) -> &str {
        &self.key_id
    }

    fn algorithm(&self) -> &str {
        AES256_GCM
    }

    fn seal_chunk(&self, nonce: &[u8; NONCE_SIZE], plaintext: &[u8]) -> Result<Vec<u8>> {
        self.cipher
            .encrypt(Nonce::from_slice(nonce), plaintext)
            .map_err(|_| CirruxError::Internal("AES-GCM seal failed".to_string()))
    }

    fn open_chunk(&self, nonce: &[u8; NONCE_SIZE], ciphertext: &[u8]) -> Result<Vec<u8>> {
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CirruxError::Internal("AES-GCM open failed: bad key or corrupt data".to_string()))
    }
}

/// Fresh random 256-bit key.
pub fn random_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut key);
    key
}

/// Fresh random base nonce for one object stream.
pub fn random_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Decode a base64-encoded 32-byte key from a settings map value.
pub fn decode_key(encoded: &str) -> Result<[u8; 32]> {
    let raw = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| CirruxError::NotConfigured(format!("invalid base64 key: {}", e)))?;
    raw.try_into()
        .map_err(|_| CirruxError::NotConfigured("encryption key must be 32 bytes".to_string()))
}
