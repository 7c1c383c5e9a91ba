// crates/agent-relay-core/src/audit.rs
// ============================================================================
// Module: Audit Events
// Description: Structured audit events for every pipeline stage.
// Purpose: Emit append-only JSON records without hard sink dependencies.
// Dependencies: crate::agent, crate::identity, serde, serde_json
// ============================================================================

//! ## Overview
//! Every authentication, authorization, exchange, and dispatch outcome emits
//! an audit event carrying enough identity and reason detail to reconstruct
//! who attempted what, against which agent, with what outcome. Sinks are
//! fire-and-forget: emission failures are swallowed and never fail the
//! enclosing request. Credential values never appear in events; only
//! scopes and outcomes do.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Serialize;
use serde_json::Value;

use crate::agent::AgentKind;
use crate::identity::CallerIdentity;

// ============================================================================
// SECTION: Event Kinds
// ============================================================================

/// Closed set of auditable event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    /// Inbound credential verified successfully.
    CredentialValidated,
    /// Inbound credential rejected.
    CredentialRejected,
    /// Delegated credential acquired for a downstream agent.
    ExchangeSucceeded,
    /// Delegated credential acquisition failed.
    ExchangeFailed,
    /// An agent was selected for the request.
    AgentSelected,
    /// Downstream agent call completed successfully.
    AgentCallSucceeded,
    /// Downstream agent call failed.
    AgentCallFailed,
    /// Authorization policy denied agent access.
    AccessDenied,
}

impl AuditEventKind {
    /// Returns a stable label for the event kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CredentialValidated => "credential_validated",
            Self::CredentialRejected => "credential_rejected",
            Self::ExchangeSucceeded => "exchange_succeeded",
            Self::ExchangeFailed => "exchange_failed",
            Self::AgentSelected => "agent_selected",
            Self::AgentCallSucceeded => "agent_call_succeeded",
            Self::AgentCallFailed => "agent_call_failed",
            Self::AccessDenied => "access_denied",
        }
    }
}

// ============================================================================
// SECTION: Event Payload
// ============================================================================

/// Audit event payload.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: u128,
    /// Event kind.
    pub kind: AuditEventKind,
    /// Caller subject identifier.
    pub subject_id: String,
    /// Caller display name.
    pub subject_name: String,
    /// Caller email or principal name.
    pub subject_email: String,
    /// Target agent when the event concerns one.
    pub agent: Option<AgentKind>,
    /// Whether the audited action succeeded.
    pub success: bool,
    /// Free-form reason and timing detail.
    pub detail: BTreeMap<String, Value>,
}

/// Inputs required to construct an audit event.
pub struct AuditEventParams {
    /// Event kind.
    pub kind: AuditEventKind,
    /// Caller subject identifier.
    pub subject_id: String,
    /// Caller display name.
    pub subject_name: String,
    /// Caller email or principal name.
    pub subject_email: String,
    /// Target agent when the event concerns one.
    pub agent: Option<AgentKind>,
    /// Whether the audited action succeeded.
    pub success: bool,
    /// Free-form reason and timing detail.
    pub detail: BTreeMap<String, Value>,
}

impl AuditEvent {
    /// Creates a new audit event with a consistent timestamp.
    #[must_use]
    pub fn new(params: AuditEventParams) -> Self {
        let timestamp_ms =
            SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
        Self {
            timestamp_ms,
            kind: params.kind,
            subject_id: params.subject_id,
            subject_name: params.subject_name,
            subject_email: params.subject_email,
            agent: params.agent,
            success: params.success,
            detail: params.detail,
        }
    }

    /// Creates an event for a verified caller identity.
    #[must_use]
    pub fn for_identity(
        kind: AuditEventKind,
        identity: &CallerIdentity,
        agent: Option<AgentKind>,
        success: bool,
        detail: BTreeMap<String, Value>,
    ) -> Self {
        Self::new(AuditEventParams {
            kind,
            subject_id: identity.subject.clone(),
            subject_name: identity.name_or_unknown().to_string(),
            subject_email: identity.email_or_unknown().to_string(),
            agent,
            success,
            detail,
        })
    }

    /// Creates an event for an unauthenticated or rejected caller.
    #[must_use]
    pub fn anonymous(
        kind: AuditEventKind,
        success: bool,
        detail: BTreeMap<String, Value>,
    ) -> Self {
        Self::new(AuditEventParams {
            kind,
            subject_id: "anonymous".to_string(),
            subject_name: "unknown".to_string(),
            subject_email: "unknown".to_string(),
            agent: None,
            success,
            detail,
        })
    }
}

// ============================================================================
// SECTION: Trait
// ============================================================================

/// Audit sink for relay events.
pub trait AuditSink: Send + Sync {
    /// Records an audit event. Must never block or fail the request path.
    fn record(&self, event: &AuditEvent);
}

// ============================================================================
// SECTION: Sinks
// ============================================================================

/// Audit sink that logs JSON lines to stderr.
pub struct StderrAuditSink;

impl AuditSink for StderrAuditSink {
    fn record(&self, event: &AuditEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            let _ = writeln!(io::stderr(), "{payload}");
        }
    }
}

/// Audit sink that logs JSON lines to a file.
pub struct FileAuditSink {
    /// File handle used for append-only logging.
    file: Mutex<std::fs::File>,
}

impl FileAuditSink {
    /// Opens the audit log file in append mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl AuditSink for FileAuditSink {
    fn record(&self, event: &AuditEvent) {
        if let Ok(payload) = serde_json::to_string(event)
            && let Ok(mut file) = self.file.lock()
        {
            let _ = writeln!(file, "{payload}");
            let _ = file.flush();
        }
    }
}

/// No-op audit sink.
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _event: &AuditEvent) {}
}

/// In-memory audit sink used by tests to assert recorded events.
#[derive(Default)]
pub struct MemoryAuditSink {
    /// Recorded events in arrival order.
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    /// Builds an empty in-memory sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }

    /// Returns the kinds of recorded events in arrival order.
    #[must_use]
    pub fn kinds(&self) -> Vec<AuditEventKind> {
        self.events().iter().map(|event| event.kind).collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: &AuditEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
