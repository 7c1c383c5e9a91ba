// crates/agent-relay-dispatch/src/client.rs
// ============================================================================
// Module: Downstream Agent Client
// Description: HTTP dispatch and liveness probes for backend agents.
// Purpose: Convert every transport failure into an in-band error response.
// Dependencies: agent-relay-config, agent-relay-core, agent-relay-identity, reqwest
// ============================================================================

//! ## Overview
//! The agent client posts relay payloads to a backend agent's `/agent`
//! endpoint and probes `/health` for liveness. Dispatch never surfaces an
//! error to its caller: non-2xx statuses, timeouts, and connection failures
//! all become an [`AgentResponse`] with `status = error` and a diagnostic
//! message, preserving the relay's partial-success contract. The delegated
//! credential is attached as a bearer header only when one is present and
//! delegated auth is administratively enabled; otherwise the call runs in the
//! explicitly unauthenticated testing mode.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::time::Duration;

use agent_relay_config::AgentsConfig;
use agent_relay_config::TimeoutConfig;
use agent_relay_core::AgentCallPayload;
use agent_relay_core::AgentKind;
use agent_relay_core::AgentResponse;
use agent_relay_core::ResponseStatus;
use agent_relay_identity::DelegatedCredential;
use serde::Deserialize;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;
use url::Url;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Path segment for agent dispatch endpoints.
pub const AGENT_CALL_PATH: &str = "agent";

/// Path segment for agent health endpoints.
pub const AGENT_HEALTH_PATH: &str = "health";

/// Label recorded when calls carry a delegated credential.
pub const AUTH_MODE_DELEGATED: &str = "delegated";

/// Label recorded for the unauthenticated testing-mode path.
pub const AUTH_MODE_TESTING: &str = "testing_mode";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Agent client construction errors.
#[derive(Debug, Error)]
pub enum DispatchSetupError {
    /// An agent base URL failed to parse.
    #[error("invalid agent base url for {agent}: {reason}")]
    InvalidBaseUrl {
        /// Agent whose URL failed.
        agent: AgentKind,
        /// Parse failure detail.
        reason: String,
    },
    /// The HTTP client could not be constructed.
    #[error("http client build failed: {0}")]
    ClientBuild(String),
}

// ============================================================================
// SECTION: Downstream Reply
// ============================================================================

/// Body shape returned by agents on 2xx responses.
#[derive(Debug, Deserialize)]
struct DownstreamReply {
    /// Response text.
    #[serde(default)]
    message: String,
    /// Agent-reported status; 2xx responses default to success.
    #[serde(default)]
    status: Option<ResponseStatus>,
    /// Response metadata.
    #[serde(default)]
    metadata: BTreeMap<String, Value>,
}

// ============================================================================
// SECTION: Client
// ============================================================================

/// HTTP client for downstream agent calls.
pub struct AgentClient {
    /// Shared HTTP client; per-request timeouts are applied per call.
    http: reqwest::Client,
    /// Python agent base URL.
    python_base: Url,
    /// Payroll agent base URL.
    dotnet_base: Url,
    /// Timeout for dispatch calls.
    request_timeout: Duration,
    /// Timeout for health probes.
    health_timeout: Duration,
    /// Attach delegated credentials when present.
    attach_credentials: bool,
}

impl AgentClient {
    /// Builds the client from agent endpoints and timeout configuration.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchSetupError`] when a base URL fails to parse or the
    /// HTTP client cannot be constructed.
    pub fn from_config(
        agents: &AgentsConfig,
        timeouts: TimeoutConfig,
        attach_credentials: bool,
    ) -> Result<Self, DispatchSetupError> {
        let python_base = parse_base(AgentKind::Python, &agents.python.base_url)?;
        let dotnet_base = parse_base(AgentKind::Dotnet, &agents.dotnet.base_url)?;
        let http = reqwest::Client::builder()
            .build()
            .map_err(|err| DispatchSetupError::ClientBuild(err.to_string()))?;
        Ok(Self {
            http,
            python_base,
            dotnet_base,
            request_timeout: Duration::from_millis(timeouts.request_timeout_ms),
            health_timeout: Duration::from_millis(timeouts.health_timeout_ms),
            attach_credentials,
        })
    }

    /// Returns whether delegated credentials are attached when present.
    #[must_use]
    pub const fn attaches_credentials(&self) -> bool {
        self.attach_credentials
    }

    /// Returns the auth-mode label for a dispatch with the given credential.
    #[must_use]
    pub const fn auth_mode(&self, credential: Option<&DelegatedCredential>) -> &'static str {
        if self.attach_credentials && credential.is_some() {
            AUTH_MODE_DELEGATED
        } else {
            AUTH_MODE_TESTING
        }
    }

    /// Dispatches a message to the given agent; never fails to its caller.
    pub async fn dispatch(
        &self,
        agent: AgentKind,
        message: &str,
        credential: Option<&DelegatedCredential>,
        conversation_id: Option<&str>,
        metadata: BTreeMap<String, Value>,
    ) -> AgentResponse {
        let Some(base) = self.base_url(agent) else {
            return error_response(agent, "auto is not a dispatchable agent".to_string(), json!({}));
        };
        let endpoint = endpoint_url(base, AGENT_CALL_PATH);
        let payload = AgentCallPayload {
            message: message.to_string(),
            conversation_id: conversation_id.map(ToString::to_string),
            metadata,
        };

        let mut request =
            self.http.post(endpoint).timeout(self.request_timeout).json(&payload);
        if self.attach_credentials
            && let Some(credential) = credential
        {
            request = request.bearer_auth(credential.token());
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                return error_response(
                    agent,
                    format!("Failed to reach {agent} agent: {err}"),
                    json!(err.to_string()),
                );
            }
        };

        let status = response.status();
        if !status.is_success() {
            return error_response(
                agent,
                format!("Error calling {agent} agent: {status}"),
                json!(status.as_u16()),
            );
        }

        match response.json::<DownstreamReply>().await {
            Ok(reply) => AgentResponse {
                agent,
                message: reply.message,
                status: reply.status.unwrap_or(ResponseStatus::Success),
                metadata: reply.metadata,
            },
            Err(err) => error_response(
                agent,
                format!("Malformed response from {agent} agent"),
                json!(err.to_string()),
            ),
        }
    }

    /// Probes the agent's health endpoint; false on any failure.
    pub async fn health_check(&self, agent: AgentKind) -> bool {
        let Some(base) = self.base_url(agent) else {
            return false;
        };
        let endpoint = endpoint_url(base, AGENT_HEALTH_PATH);
        match self.http.get(endpoint).timeout(self.health_timeout).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    /// Returns the base URL for a concrete agent.
    const fn base_url(&self, agent: AgentKind) -> Option<&Url> {
        match agent {
            AgentKind::Python => Some(&self.python_base),
            AgentKind::Dotnet => Some(&self.dotnet_base),
            AgentKind::Auto => None,
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Parses one agent base URL.
fn parse_base(agent: AgentKind, raw: &str) -> Result<Url, DispatchSetupError> {
    Url::parse(raw).map_err(|err| DispatchSetupError::InvalidBaseUrl {
        agent,
        reason: err.to_string(),
    })
}

/// Joins a fixed path segment onto an agent base URL.
fn endpoint_url(base: &Url, segment: &str) -> String {
    format!("{}/{segment}", base.as_str().trim_end_matches('/'))
}

/// Builds an in-band error response.
fn error_response(agent: AgentKind, message: String, detail: Value) -> AgentResponse {
    let mut metadata = BTreeMap::new();
    metadata.insert("error".to_string(), detail);
    AgentResponse {
        agent,
        message,
        status: ResponseStatus::Error,
        metadata,
    }
}
