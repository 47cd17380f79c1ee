// ===========================================
// Cirrux - Multi-Cloud Object Storage
// (c) 2025 Neo Qiss. All Rights Reserved.
// Created by Neo Qiss - Unleash the power of Rust.
// ===========================================
// Streaming encrypter pipeline and key management

use bytes::{Buf, Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::errors::{CirruxError, Result};
use crate::storage::ByteStream;

pub mod aesgcm;

pub use aesgcm::AesGcmEncrypter;

/// Plaintext bytes sealed per frame.
pub const CHUNK_SIZE: usize = 64 * 1024;
/// Upper bound a reader will accept for a single ciphertext frame.
const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;
/// AES-GCM nonce width.
pub const NONCE_SIZE: usize = 12;

/// A pure chunk transform carrying its key id and algorithm tag. Nonce
/// scheduling and framing live in the stream adapters below.
pub trait Encrypter: Send + Sync {
    fn key_id(&self) -> &str;
    fn algorithm(&self) -> &str;
    fn seal_chunk(&self, nonce: &[u8; NONCE_SIZE], plaintext: &[u8]) -> Result<Vec<u8>>;
    fn open_chunk(&self, nonce: &[u8; NONCE_SIZE], ciphertext: &[u8]) -> Result<Vec<u8>>;
}

/// Hands out encrypters by key id and advertises the default key.
pub trait EncrypterFactory: Send + Sync {
    fn default_key_id(&self) -> String;

    /// Returns [`CirruxError::KeyUnavailable`] when no key material
    /// exists for `key_id`.
    fn encrypter_for(&self, key_id: &str) -> Result<Arc<dyn Encrypter>>;
}

/// In-memory keyring over AES-256 keys. Built directly or from a flat
/// settings map: `default_key_id` plus one `key.<id>` entry per key,
/// values base64-encoded 32-byte keys.
pub struct StaticKeyring {
    default_key_id: String,
    keys: HashMap<String, [u8; 32]>,
}

impl StaticKeyring {
    pub fn new(default_key_id: &str) -> Self {
        Self {
            default_key_id: default_key_id.to_string(),
            keys: HashMap::new(),
        }
    }

    pub fn with_key(mut self, key_id: &str, key: [u8; 32]) -> Self {
        self.keys.insert(key_id.to_string(), key);
        self
    }

    /// Generate and register a fresh random key.
    pub fn with_random_key(self, key_id: &str) -> Self {
        self.with_key(key_id, aesgcm::random_key())
    }

    pub fn from_settings(settings: &HashMap<String, String>) -> Result<Self> {
        let default_key_id = settings
            .get("default_key_id")
            .cloned()
            .ok_or_else(|| CirruxError::NotConfigured("default_key_id is not set".to_string()))?;
        let mut keyring = StaticKeyring::new(&default_key_id);
        for (name, value) in settings {
            if let Some(key_id) = name.strip_prefix("key.") {
                keyring = keyring.with_key(key_id, aesgcm::decode_key(value)?);
            }
        }
        if !keyring.keys.contains_key(&default_key_id) {
            return Err(CirruxError::KeyUnavailable {
                key_id: default_key_id,
            });
        }
        Ok(keyring)
    }
}

impl EncrypterFactory for StaticKeyring {
    fn default_key_id(&self) -> String {
        self.default_key_id.clone()
    }

    fn encrypter_for(&self, key_id: &str) -> Result<Arc<dyn Encrypter>> {
        let key = self.keys.get(key_id).ok_or_else(|| CirruxError::KeyUnavailable {
            key_id: key_id.to_string(),
        })?;
        Ok(Arc::new(AesGcmEncrypter::new(key_id, *key)))
    }
}

/// Named registry of encrypter factories. Replication policies select a
/// factory by provider name; the registry is shared by every syncer a
/// manager spawns.
#[derive(Default)]
pub struct EncrypterRegistry {
    factories: std::sync::RwLock<HashMap<String, Arc<dyn EncrypterFactory>>>,
}

impl EncrypterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, provider: &str, factory: Arc<dyn EncrypterFactory>) {
        self.factories
            .write()
            .unwrap()
            .insert(provider.to_string(), factory);
    }

    pub fn get(&self, provider: &str) -> Result<Arc<dyn EncrypterFactory>> {
        self.factories
            .read()
            .unwrap()
            .get(provider)
            .cloned()
            .ok_or_else(|| {
                CirruxError::NotConfigured(format!(
                    "no encrypter factory registered for provider '{}'",
                    provider
                ))
            })
    }
}

// Frame layout: a 12-byte random base nonce, then frames of
// [u32 BE ciphertext length][ciphertext]. The nonce for frame n is the
// base nonce with the frame counter XORed into its trailing 8 bytes, so
// a key/base-nonce pair never reuses a nonce within one object.
fn frame_nonce(base: &[u8; NONCE_SIZE], counter: u64) -> [u8; NONCE_SIZE] {
    let mut nonce = *base;
    let counter_bytes = counter.to_be_bytes();
    for (slot, byte) in nonce[NONCE_SIZE - 8..].iter_mut().zip(counter_bytes.iter()) {
        *slot ^= byte;
    }
    nonce
}

fn crypto_io_error(context: &str, err: CirruxError) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, format!("{}: {}", context, err))
}

/// Wrap a plaintext stream so the consumer reads framed ciphertext.
pub fn encrypt_stream(encrypter: Arc<dyn Encrypter>, inner: ByteStream) -> ByteStream {
    Box::pin(EncryptStream {
        encrypter,
        inner,
        base_nonce: aesgcm::random_nonce(),
        counter: 0,
        header_sent: false,
        carry: Bytes::new(),
        inner_done: false,
    })
}

/// Wrap a framed ciphertext stream so the consumer reads plaintext.
pub fn decrypt_stream(encrypter: Arc<dyn Encrypter>, inner: ByteStream) -> ByteStream {
    Box::pin(DecryptStream {
        encrypter,
        inner,
        buf: BytesMut::new(),
        base_nonce: None,
        counter: 0,
        inner_done: false,
    })
}

struct EncryptStream {
    encrypter: Arc<dyn Encrypter>,
    inner: ByteStream,
    base_nonce: [u8; NONCE_SIZE],
    counter: u64,
    header_sent: bool,
    carry: Bytes,
    inner_done: bool,
}

impl EncryptStream {
    fn seal_frame(&mut self) -> std::io::Result<Bytes> {
        let take = self.carry.len().min(CHUNK_SIZE);
        let chunk = self.carry.split_to(take);
        let nonce = frame_nonce(&self.base_nonce, self.counter);
        let ciphertext = self
            .encrypter
            .seal_chunk(&nonce, &chunk)
            .map_err(|e| crypto_io_error("seal failed", e))?;
        self.counter += 1;
        let mut frame = BytesMut::with_capacity(4 + ciphertext.len());
        frame.extend_from_slice(&(ciphertext.len() as u32).to_be_bytes());
        frame.extend_from_slice(&ciphertext);
        Ok(frame.freeze())
    }
}

impl Stream for EncryptStream {
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if !this.header_sent {
            this.header_sent = true;
            return Poll::Ready(Some(Ok(Bytes::copy_from_slice(&this.base_nonce))));
        }
        loop {
            if !this.carry.is_empty() {
                return Poll::Ready(Some(this.seal_frame()));
            }
            if this.inner_done {
                return Poll::Ready(None);
            }
            match this.inner.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    this.carry = chunk;
                }
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(Err(e))),
                Poll::Ready(None) => {
                    this.inner_done = true;
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

struct DecryptStream {
    encrypter: Arc<dyn Encrypter>,
    inner: ByteStream,
    buf: BytesMut,
    base_nonce: Option<[u8; NONCE_SIZE]>,
    counter: u64,
    inner_done: bool,
}

impl DecryptStream {
    fn try_decode_frame(&mut self) -> std::io::Result<Option<Bytes>> {
        if self.base_nonce.is_none() {
            if self.buf.len() < NONCE_SIZE {
                return Ok(None);
            }
            let header = self.buf.split_to(NONCE_SIZE);
            let mut nonce = [0u8; NONCE_SIZE];
            nonce.copy_from_slice(&header);
            self.base_nonce = Some(nonce);
        }
        if self.buf.len() < 4 {
            return Ok(None);
        }
        let frame_len = u32::from_be_bytes(self.buf[..4].try_into().unwrap()) as usize;
        if frame_len > MAX_FRAME_SIZE {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "ciphertext frame exceeds size limit",
            ));
        }
        if self.buf.len() < 4 + frame_len {
            return Ok(None);
        }
        self.buf.advance(4);
        let ciphertext = self.buf.split_to(frame_len);
        let nonce = frame_nonce(self.base_nonce.as_ref().unwrap(), self.counter);
        let plaintext = self
            .encrypter
            .open_chunk(&nonce, &ciphertext)
            .map_err(|e| crypto_io_error("open failed", e))?;
        self.counter += 1;
        Ok(Some(Bytes::from(plaintext)))
    }
}

impl Stream for DecryptStream {
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match this.try_decode_frame() {
                Ok(Some(plaintext)) => return Poll::Ready(Some(Ok(plaintext))),
                Ok(None) => {}
                Err(e) => return Poll::Ready(Some(Err(e))),
            }
            if this.inner_done {
                // A leftover partial frame means the ciphertext was cut off.
                if this.buf.is_empty() && this.base_nonce.is_some() {
                    return Poll::Ready(None);
                }
                if this.buf.is_empty() && this.base_nonce.is_none() {
                    // Zero-byte source object: nothing was ever framed.
                    return Poll::Ready(None);
                }
                return Poll::Ready(Some(Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "truncated ciphertext stream",
                ))));
            }
            match this.inner.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    this.buf.extend_from_slice(&chunk);
                }
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(Err(e))),
                Poll::Ready(None) => {
                    this.inner_done = true;
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{collect_stream, stream_from_bytes};

    fn keyring() -> StaticKeyring {
        StaticKeyring::new("k1").with_random_key("k1").with_random_key("k2")
    }

    #[tokio::test]
    async fn test_encrypt_decrypt_round_trip() {
        let factory = keyring();
        let enc = factory.encrypter_for("k1").unwrap();

        let plaintext = vec![7u8; 200_000]; // spans multiple frames
        let ciphertext = collect_stream(encrypt_stream(
            enc.clone(),
            stream_from_bytes(plaintext.clone()),
        ))
        .await
        .unwrap();
        assert_ne!(&ciphertext[..], &plaintext[..]);
        assert!(ciphertext.len() > plaintext.len());

        let decrypted = collect_stream(decrypt_stream(enc, stream_from_bytes(ciphertext)))
            .await
            .unwrap();
        assert_eq!(&decrypted[..], &plaintext[..]);
    }

    #[tokio::test]
    async fn test_decrypt_with_wrong_key_fails() {
        let factory = keyring();
        let enc = factory.encrypter_for("k1").unwrap();
        let other = factory.encrypter_for("k2").unwrap();

        let ciphertext = collect_stream(encrypt_stream(enc, stream_from_bytes("secret")))
            .await
            .unwrap();
        let result = collect_stream(decrypt_stream(other, stream_from_bytes(ciphertext))).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_truncated_ciphertext_is_detected() {
        let factory = keyring();
        let enc = factory.encrypter_for("k1").unwrap();
        let mut ciphertext = collect_stream(encrypt_stream(enc.clone(), stream_from_bytes("payload")))
            .await
            .unwrap()
            .to_vec();
        ciphertext.truncate(ciphertext.len() - 3);
        let result = collect_stream(decrypt_stream(enc, stream_from_bytes(ciphertext))).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_empty_object_round_trip() {
        let factory = keyring();
        let enc = factory.encrypter_for("k1").unwrap();
        let ciphertext = collect_stream(encrypt_stream(enc.clone(), stream_from_bytes("")))
            .await
            .unwrap();
        let decrypted = collect_stream(decrypt_stream(enc, stream_from_bytes(ciphertext)))
            .await
            .unwrap();
        assert!(decrypted.is_empty());
    }

    #[test]
    fn test_missing_key_id() {
        let factory = keyring();
        let err = factory.encrypter_for("nope").err().unwrap();
        assert!(matches!(err, CirruxError::KeyUnavailable { .. }));
    }

    #[test]
    fn test_keyring_from_settings() {
        use base64::Engine;
        let mut settings = HashMap::new();
        settings.insert("default_key_id".to_string(), "main".to_string());
        settings.insert(
            "key.main".to_string(),
            base64::engine::general_purpose::STANDARD.encode([9u8; 32]),
        );
        let keyring = StaticKeyring::from_settings(&settings).unwrap();
        assert_eq!(keyring.default_key_id(), "main");
        assert!(keyring.encrypter_for("main").is_ok());
    }
}
