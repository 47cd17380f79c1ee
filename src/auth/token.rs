// ===========================================
// Cirrux - Multi-Cloud Object Storage
// (c) 2025 Neo Qiss. All Rights Reserved.
// Created by Neo Qiss - Unleash the power of Rust.
// ===========================================
// HMAC-signed bearer tokens

use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::errors::{CirruxError, Result};

use super::Principal;

/// HMAC type for signature verification
type HmacSha256 = Hmac<Sha256>;

const B64: base64::engine::general_purpose::GeneralPurpose =
    base64::engine::general_purpose::URL_SAFE_NO_PAD;

#[derive(Serialize, Deserialize)]
struct TokenClaims {
    principal: Principal,
    expires_at: u64,
}

/// Issues and verifies signed bearer tokens: `base64(claims).base64(mac)`
/// with an HMAC-SHA256 signature over the claims bytes.
pub struct TokenAuthority {
    secret: Vec<u8>,
    ttl: Duration,
}

impl TokenAuthority {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        Self {
            secret: secret.to_vec(),
            ttl,
        }
    }

    fn now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }

    fn mac(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| CirruxError::Internal(format!("HMAC init failed: {}", e)))?;
        mac.update(payload);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    pub fn issue(&self, principal: &Principal) -> Result<String> {
        let claims = TokenClaims {
            principal: principal.clone(),
            expires_at: Self::now() + self.ttl.as_secs(),
        };
        let payload = serde_json::to_vec(&claims)?;
        let signature = self.mac(&payload)?;
        Ok(format!("{}.{}", B64.encode(&payload), B64.encode(signature)))
    }

    pub fn verify(&self, token: &str) -> Result<Principal> {
        let (payload_b64, signature_b64) = token
            .split_once('.')
            .ok_or_else(|| CirruxError::InvalidCredentials("malformed token".to_string()))?;
        let payload = B64
            .decode(payload_b64)
            .map_err(|_| CirruxError::InvalidCredentials("malformed token".to_string()))?;
        let signature = B64
            .decode(signature_b64)
            .map_err(|_| CirruxError::InvalidCredentials("malformed token".to_string()))?;

        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| CirruxError::Internal(format!("HMAC init failed: {}", e)))?;
        mac.update(&payload);
        mac.verify_slice(&signature)
            .map_err(|_| CirruxError::InvalidCredentials("bad signature".to_string()))?;

        let claims: TokenClaims = serde_json::from_slice(&payload)
            .map_err(|_| CirruxError::InvalidCredentials("malformed claims".to_string()))?;
        if claims.expires_at <= Self::now() {
            return Err(CirruxError::InvalidCredentials("token expired".to_string()));
        }
        Ok(claims.principal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_verify_round_trip() {
        let authority = TokenAuthority::new(b"secret", Duration::from_secs(60));
        let token = authority.issue(&Principal::user("u1", "alice")).unwrap();
        let principal = authority.verify(&token).unwrap();
        assert_eq!(principal.id, "u1");
        assert_eq!(principal.name, "alice");
    }

    #[test]
    fn test_tampered_token_rejected() {
        let authority = TokenAuthority::new(b"secret", Duration::from_secs(60));
        let token = authority.issue(&Principal::user("u1", "alice")).unwrap();
        let mut tampered = token.clone();
        tampered.replace_range(0..2, "zz");
        assert!(authority.verify(&tampered).is_err());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let issuer = TokenAuthority::new(b"secret-a", Duration::from_secs(60));
        let verifier = TokenAuthority::new(b"secret-b", Duration::from_secs(60));
        let token = issuer.issue(&Principal::user("u1", "alice")).unwrap();
        assert!(verifier.verify(&token).is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        let authority = TokenAuthority::new(b"secret", Duration::from_secs(0));
        let token = authority.issue(&Principal::user("u1", "alice")).unwrap();
        assert!(authority.verify(&token).is_err());
    }
}
