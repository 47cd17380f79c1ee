// ===========================================
// Cirrux - Multi-Cloud Object Storage
// (c) 2025 Neo Qiss. All Rights Reserved.
// Created by Neo Qiss - Unleash the power of Rust.
// ===========================================
// Input sanitation for keys, prefixes, backend names and metadata

use std::collections::HashMap;

use crate::errors::{CirruxError, Result};

/// Maximum key length in bytes.
pub const MAX_KEY_BYTES: usize = 1024;
/// Maximum backend name length.
pub const MAX_BACKEND_NAME_LEN: usize = 64;
/// Maximum number of custom metadata entries.
pub const MAX_METADATA_ENTRIES: usize = 100;
/// Maximum metadata key length in bytes.
pub const MAX_METADATA_KEY_BYTES: usize = 128;
/// Maximum metadata value length in bytes.
pub const MAX_METADATA_VALUE_BYTES: usize = 2048;

/// A parsed `"backend:key"` object reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    pub backend: String,
    pub key: String,
}

/// Validate an object key. Keys address provider paths, so everything
/// that could escape a root or smuggle separators is rejected here,
/// before any backend sees the request.
pub fn validate_key(key: &str) -> Result<()> {
    check_path_component("key", key, false)
}

/// Validate a listing prefix. Same rules as keys except empty is allowed.
pub fn validate_prefix(prefix: &str) -> Result<()> {
    check_path_component("prefix", prefix, true)
}

fn check_path_component(field: &str, value: &str, allow_empty: bool) -> Result<()> {
    if value.is_empty() {
        if allow_empty {
            return Ok(());
        }
        return Err(CirruxError::validation(field, "must not be empty"));
    }
    if value.len() > MAX_KEY_BYTES {
        return Err(CirruxError::validation(
            field,
            format!("exceeds {} bytes", MAX_KEY_BYTES),
        ));
    }
    for c in value.chars() {
        if c == '\0' || c == '\r' || c == '\n' || c == '\t' {
            return Err(CirruxError::validation(field, "contains control character"));
        }
        if c == '\\' {
            return Err(CirruxError::validation(field, "contains backslash"));
        }
    }
    if value.starts_with('/') {
        return Err(CirruxError::validation(field, "must not start with '/'"));
    }
    if has_drive_prefix(value) {
        return Err(CirruxError::validation(field, "contains drive prefix"));
    }
    if value.contains("//") {
        return Err(CirruxError::validation(field, "contains empty path segment"));
    }
    if value.split('/').any(|segment| segment == "..") {
        return Err(CirruxError::validation(field, "contains '..' path segment"));
    }
    Ok(())
}

// Windows-style `X:\` or `X:/` at the start. Backslashes are rejected
// outright, so this only needs the forward-slash form plus the bare
// two-character `X:` root.
fn has_drive_prefix(value: &str) -> bool {
    let bytes = value.as_bytes();
    if bytes.len() < 2 || !bytes[0].is_ascii_alphabetic() || bytes[1] != b':' {
        return false;
    }
    bytes.len() == 2 || bytes[2] == b'/' || bytes[2] == b'\\'
}

/// Validate a backend name: `[a-z0-9][a-z0-9_-]*`, at most 64 chars.
pub fn validate_backend_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(CirruxError::validation("backend", "must not be empty"));
    }
    if name.len() > MAX_BACKEND_NAME_LEN {
        return Err(CirruxError::validation(
            "backend",
            format!("exceeds {} characters", MAX_BACKEND_NAME_LEN),
        ));
    }
    let mut chars = name.chars();
    let first = chars.next().unwrap();
    if !(first.is_ascii_lowercase() || first.is_ascii_digit()) {
        return Err(CirruxError::validation(
            "backend",
            "must start with a lowercase letter or digit",
        ));
    }
    for c in chars {
        if !(c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-') {
            return Err(CirruxError::validation(
                "backend",
                format!("invalid character '{}'", c),
            ));
        }
    }
    Ok(())
}

/// Validate a custom metadata map.
pub fn validate_metadata(metadata: &HashMap<String, String>) -> Result<()> {
    if metadata.len() > MAX_METADATA_ENTRIES {
        return Err(CirruxError::validation(
            "metadata",
            format!("more than {} entries", MAX_METADATA_ENTRIES),
        ));
    }
    for (k, v) in metadata {
        if k.is_empty() {
            return Err(CirruxError::validation("metadata", "empty metadata key"));
        }
        if k.len() > MAX_METADATA_KEY_BYTES {
            return Err(CirruxError::validation(
                "metadata",
                format!("metadata key exceeds {} bytes", MAX_METADATA_KEY_BYTES),
            ));
        }
        if v.len() > MAX_METADATA_VALUE_BYTES {
            return Err(CirruxError::validation(
                "metadata",
                format!("metadata value exceeds {} bytes", MAX_METADATA_VALUE_BYTES),
            ));
        }
        if k.chars().chain(v.chars()).any(|c| c.is_control()) {
            return Err(CirruxError::validation(
                "metadata",
                "metadata contains control character",
            ));
        }
    }
    Ok(())
}

/// Parse a `"backend:key"` reference, splitting on the first `:`. A
/// reference without a colon addresses the default backend. Both halves
/// are validated before anything is dispatched.
pub fn parse_object_ref(reference: &str, default_backend: &str) -> Result<ObjectRef> {
    let (backend, key) = match reference.split_once(':') {
        Some((backend, key)) => (backend.to_string(), key.to_string()),
        None => (default_backend.to_string(), reference.to_string()),
    };
    validate_backend_name(&backend)?;
    validate_key(&key)?;
    Ok(ObjectRef { backend, key })
}

/// Parse a `"backend:prefix"` reference. Same contract as
/// [`parse_object_ref`] except the prefix half may be empty.
pub fn parse_prefix_ref(reference: &str, default_backend: &str) -> Result<ObjectRef> {
    let (backend, prefix) = match reference.split_once(':') {
        Some((backend, prefix)) => (backend.to_string(), prefix.to_string()),
        None => (default_backend.to_string(), reference.to_string()),
    };
    validate_backend_name(&backend)?;
    validate_prefix(&prefix)?;
    Ok(ObjectRef {
        backend,
        key: prefix,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_keys() {
        for key in ["a", "hello/world.txt", "logs/2025/01/app.log", "a:b", "weird name.bin"] {
            assert!(validate_key(key).is_ok(), "{key} should be valid");
        }
    }

    #[test]
    fn test_invalid_keys() {
        let cases = [
            "",
            "../x",
            "a/../b",
            "/abs",
            "a\0b",
            "a//b",
            "a\nb",
            "a\rb",
            "a\tb",
            "a\\b",
            "C:/windows",
            "c:",
        ];
        for key in cases {
            let err = validate_key(key).unwrap_err();
            assert!(
                matches!(err, CirruxError::Validation { .. }),
                "{key:?} should fail validation"
            );
        }
    }

    #[test]
    fn test_key_length_limit() {
        let long = "a".repeat(MAX_KEY_BYTES);
        assert!(validate_key(&long).is_ok());
        let too_long = "a".repeat(MAX_KEY_BYTES + 1);
        assert!(validate_key(&too_long).is_err());
    }

    #[test]
    fn test_prefix_allows_empty() {
        assert!(validate_prefix("").is_ok());
        assert!(validate_prefix("logs/").is_ok());
        assert!(validate_prefix("../").is_err());
    }

    #[test]
    fn test_backend_names() {
        assert!(validate_backend_name("default").is_ok());
        assert!(validate_backend_name("s3-archive_1").is_ok());
        assert!(validate_backend_name("0backend").is_ok());
        assert!(validate_backend_name("").is_err());
        assert!(validate_backend_name("Upper").is_err());
        assert!(validate_backend_name("-leading").is_err());
        assert!(validate_backend_name("has space").is_err());
        assert!(validate_backend_name(&"a".repeat(65)).is_err());
    }

    #[test]
    fn test_metadata_limits() {
        let mut meta = HashMap::new();
        meta.insert("content-class".to_string(), "hot".to_string());
        assert!(validate_metadata(&meta).is_ok());

        meta.insert("bad".to_string(), "a\0b".to_string());
        assert!(validate_metadata(&meta).is_err());
        meta.remove("bad");

        meta.insert("k".repeat(MAX_METADATA_KEY_BYTES + 1), "v".to_string());
        assert!(validate_metadata(&meta).is_err());
        meta.clear();

        for i in 0..MAX_METADATA_ENTRIES + 1 {
            meta.insert(format!("k{}", i), "v".to_string());
        }
        assert!(validate_metadata(&meta).is_err());
    }

    #[test]
    fn test_parse_object_ref() {
        let parsed = parse_object_ref("a:b:c", "default").unwrap();
        assert_eq!(parsed.backend, "a");
        assert_eq!(parsed.key, "b:c");

        let parsed = parse_object_ref("plain/key.txt", "default").unwrap();
        assert_eq!(parsed.backend, "default");
        assert_eq!(parsed.key, "plain/key.txt");

        assert!(parse_object_ref("Bad Backend:key", "default").is_err());
        assert!(parse_object_ref("ok:../escape", "default").is_err());
    }

    #[test]
    fn test_parse_prefix_ref_allows_empty_prefix() {
        let parsed = parse_prefix_ref("backup:", "default").unwrap();
        assert_eq!(parsed.backend, "backup");
        assert_eq!(parsed.key, "");

        let parsed = parse_prefix_ref("logs/", "default").unwrap();
        assert_eq!(parsed.backend, "default");
        assert_eq!(parsed.key, "logs/");
    }
}
