// ===========================================
// Cirrux - Multi-Cloud Object Storage
// (c) 2025 Neo Qiss. All Rights Reserved.
// Created by Neo Qiss - Unleash the power of Rust.
// ===========================================
// Structured audit events for mutating operations

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

use crate::auth::Principal;

/// Event category, inferred from the operation that emitted it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
    ObjectCreated,
    ObjectDeleted,
    ObjectArchived,
    MetadataUpdated,
    PolicyAdded,
    PolicyRemoved,
    PoliciesApplied,
    ReplicationPolicyAdded,
    ReplicationPolicyRemoved,
    ReplicationSynced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditResult {
    Success,
    Failure,
}

/// One audit record per mutating boundary call. Health probes are never
/// audited.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    pub user_id: Option<String>,
    pub principal: Option<Principal>,
    /// Backend name the operation was routed to.
    pub bucket: String,
    pub key: String,
    pub action: String,
    pub result: AuditResult,
    pub error_message: Option<String>,
    pub ip_address: Option<String>,
    pub request_id: Option<String>,
    pub method: Option<String>,
    pub status_code: Option<u16>,
    pub bytes_transferred: Option<u64>,
    pub duration_ms: Option<u64>,
    pub metadata: HashMap<String, String>,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType, bucket: &str, key: &str, action: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            user_id: None,
            principal: None,
            bucket: bucket.to_string(),
            key: key.to_string(),
            action: action.to_string(),
            result: AuditResult::Success,
            error_message: None,
            ip_address: None,
            request_id: None,
            method: None,
            status_code: None,
            bytes_transferred: None,
            duration_ms: None,
            metadata: HashMap::new(),
        }
    }

    pub fn failed(mut self, message: &str) -> Self {
        self.result = AuditResult::Failure;
        self.error_message = Some(message.to_string());
        self
    }

    pub fn with_principal(mut self, principal: Option<Principal>) -> Self {
        self.user_id = principal.as_ref().map(|p| p.id.clone());
        self.principal = principal;
        self
    }
}

/// Audit sink. Implementations must never panic; failures are reported
/// back and swallowed by the caller after logging.
pub trait AuditLogger: Send + Sync {
    fn log(&self, event: &AuditEvent) -> Result<(), String>;
}

/// Emits audit events as structured tracing records under the
/// `cirrux::audit` target.
pub struct TracingAuditLogger;

impl AuditLogger for TracingAuditLogger {
    fn log(&self, event: &AuditEvent) -> Result<(), String> {
        tracing::info!(
            target: "cirrux::audit",
            event_type = ?event.event_type,
            bucket = %event.bucket,
            key = %event.key,
            action = %event.action,
            result = ?event.result,
            user_id = event.user_id.as_deref().unwrap_or("-"),
            request_id = event.request_id.as_deref().unwrap_or("-"),
            error = event.error_message.as_deref().unwrap_or(""),
            "audit"
        );
        Ok(())
    }
}

/// Test sink capturing events in memory.
#[derive(Default)]
pub struct MemoryAuditLogger {
    events: std::sync::Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl AuditLogger for MemoryAuditLogger {
    fn log(&self, event: &AuditEvent) -> Result<(), String> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_construction_and_failure_marking() {
        let event = AuditEvent::new(AuditEventType::ObjectCreated, "default", "a/b", "put");
        assert_eq!(event.result, AuditResult::Success);

        let failed = event.failed("backend unavailable");
        assert_eq!(failed.result, AuditResult::Failure);
        assert_eq!(failed.error_message.as_deref(), Some("backend unavailable"));
    }

    #[test]
    fn test_memory_logger_captures_events() {
        let logger = MemoryAuditLogger::new();
        logger
            .log(&AuditEvent::new(
                AuditEventType::ObjectDeleted,
                "default",
                "k",
                "delete",
            ))
            .unwrap();
        let events = logger.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, AuditEventType::ObjectDeleted);
    }
}
