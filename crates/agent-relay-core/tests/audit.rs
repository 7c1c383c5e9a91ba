// crates/agent-relay-core/tests/audit.rs
// ============================================================================
// Module: Audit Tests
// Description: Unit tests for audit event payloads and sinks.
// Purpose: Validate event structure and fire-and-forget sink behavior.
// Dependencies: agent-relay-core, serde_json, tempfile
// ============================================================================

//! Audit event and sink tests.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions use unwrap for clarity."
)]

use std::collections::BTreeMap;
use std::fs;

use agent_relay_core::AgentKind;
use agent_relay_core::AuditEvent;
use agent_relay_core::AuditEventKind;
use agent_relay_core::AuditSink;
use agent_relay_core::CallerIdentity;
use agent_relay_core::FileAuditSink;
use agent_relay_core::MemoryAuditSink;
use serde_json::Value;
use serde_json::json;

/// Builds a sample event for a synthetic identity.
fn sample_event(kind: AuditEventKind, success: bool) -> AuditEvent {
    let mut detail = BTreeMap::new();
    detail.insert("reason".to_string(), json!("unit test"));
    AuditEvent::for_identity(
        kind,
        &CallerIdentity::synthetic(),
        Some(AgentKind::Dotnet),
        success,
        detail,
    )
}

#[test]
fn event_serializes_expected_fields() {
    let event = sample_event(AuditEventKind::AgentCallFailed, false);
    let payload = serde_json::to_value(&event).unwrap();
    assert_eq!(payload["kind"], json!("agent_call_failed"));
    assert_eq!(payload["subject_id"], json!("test-user-id"));
    assert_eq!(payload["subject_email"], json!("test@example.com"));
    assert_eq!(payload["agent"], json!("dotnet"));
    assert_eq!(payload["success"], json!(false));
    assert_eq!(payload["detail"]["reason"], json!("unit test"));
    assert!(payload["timestamp_ms"].is_number());
}

#[test]
fn anonymous_event_uses_placeholders() {
    let event = AuditEvent::anonymous(AuditEventKind::CredentialRejected, false, BTreeMap::new());
    assert_eq!(event.subject_id, "anonymous");
    assert_eq!(event.subject_name, "unknown");
    assert!(event.agent.is_none());
}

#[test]
fn memory_sink_records_in_order() {
    let sink = MemoryAuditSink::new();
    sink.record(&sample_event(AuditEventKind::CredentialValidated, true));
    sink.record(&sample_event(AuditEventKind::AgentSelected, true));
    sink.record(&sample_event(AuditEventKind::AgentCallSucceeded, true));
    assert_eq!(
        sink.kinds(),
        vec![
            AuditEventKind::CredentialValidated,
            AuditEventKind::AgentSelected,
            AuditEventKind::AgentCallSucceeded,
        ]
    );
}

#[test]
fn file_sink_appends_json_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.log");
    let sink = FileAuditSink::new(&path).unwrap();
    sink.record(&sample_event(AuditEventKind::ExchangeSucceeded, true));
    sink.record(&sample_event(AuditEventKind::ExchangeFailed, false));
    let contents = fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 2);
    let first: Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(first["kind"], json!("exchange_succeeded"));
    let second: Value = serde_json::from_str(lines[1]).unwrap();
    assert_eq!(second["kind"], json!("exchange_failed"));
}

#[test]
fn kind_labels_are_stable() {
    assert_eq!(AuditEventKind::AccessDenied.as_str(), "access_denied");
    assert_eq!(AuditEventKind::CredentialValidated.as_str(), "credential_validated");
    assert_eq!(AuditEventKind::ExchangeFailed.as_str(), "exchange_failed");
}
