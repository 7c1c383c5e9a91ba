// crates/agent-relay-core/src/wire.rs
// ============================================================================
// Module: Wire Models
// Description: Inbound and outbound request/response payloads.
// Purpose: Fix the JSON contract between clients, relay, and agents.
// Dependencies: crate::agent, serde, serde_json
// ============================================================================

//! ## Overview
//! These models define the relay's JSON surface: the inbound request, the
//! aggregated relay response, the per-agent response embedded in it, and the
//! payload posted to downstream agents. Downstream failures are expressed in
//! band through [`ResponseStatus::Error`] rather than transport errors.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::agent::AgentKind;

// ============================================================================
// SECTION: Status
// ============================================================================

/// Outcome label carried by relay and agent responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    /// The request was handled successfully.
    Success,
    /// The request failed; the message carries a diagnostic.
    Error,
}

impl ResponseStatus {
    /// Returns a stable label for the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

// ============================================================================
// SECTION: Inbound
// ============================================================================

/// Inbound relay request.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayRequest {
    /// Caller message to route.
    pub message: String,
    /// Conversation identifier for downstream continuity.
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// Preferred agent, or auto-select.
    #[serde(default = "default_preference")]
    pub preferred_agent: AgentKind,
    /// Caller-supplied metadata forwarded downstream.
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

/// Default agent preference when the caller omits one.
const fn default_preference() -> AgentKind {
    AgentKind::Auto
}

// ============================================================================
// SECTION: Outbound
// ============================================================================

/// Payload posted to a downstream agent's `/agent` endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct AgentCallPayload {
    /// Caller message.
    pub message: String,
    /// Conversation identifier when continuing a conversation.
    pub conversation_id: Option<String>,
    /// Metadata forwarded from the inbound request.
    pub metadata: BTreeMap<String, Value>,
}

/// Response from one downstream agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    /// Agent that produced the response.
    pub agent: AgentKind,
    /// Response text or diagnostic.
    pub message: String,
    /// Outcome of the downstream call.
    pub status: ResponseStatus,
    /// Response metadata, including error detail on failure.
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

/// Aggregated relay response returned to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct RelayResponse {
    /// Primary response text.
    pub message: String,
    /// Relay-level outcome.
    pub status: ResponseStatus,
    /// Agent that handled the request.
    pub selected_agent: AgentKind,
    /// Conversation identifier echoed from the request.
    pub conversation_id: Option<String>,
    /// Individual agent responses backing this aggregate.
    pub agent_responses: Vec<AgentResponse>,
    /// Identity, authorization, and timing metadata.
    pub metadata: BTreeMap<String, Value>,
}
