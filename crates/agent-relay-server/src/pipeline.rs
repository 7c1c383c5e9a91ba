// crates/agent-relay-server/src/pipeline.rs
// ============================================================================
// Module: Request Pipeline
// Description: Per-request orchestration through the relay stages.
// Purpose: Enforce validate, select, authorize, exchange, dispatch order.
// Dependencies: agent-relay-core, agent-relay-dispatch, agent-relay-identity
// ============================================================================

//! ## Overview
//! One pipeline run handles one inbound request, executing the stages in
//! strict order: credential validation, agent selection, the authorization
//! gate, delegated exchange, and downstream dispatch. Selection never runs
//! before authentication when authentication is required, and authorization
//! is always checked before exchange. Every stage emits an audit event before
//! the pipeline returns.
//!
//! Downstream failures do not fail the pipeline: the dispatcher embeds them
//! in the relay response with `status = error`, distinguishing agent-level
//! failures (HTTP 200 with an in-band error) from orchestration-level
//! failures (401/403/500 via [`PipelineError`]).
//!
//! ## Invariants
//! - The caller's inbound credential is only ever forwarded to the identity
//!   provider for exchange, never to a downstream agent.
//! - [`AgentKind::Auto`] never reaches the authorization gate or dispatcher.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use agent_relay_config::AuthConfig;
use agent_relay_core::AccessDenied;
use agent_relay_core::AccessPolicy;
use agent_relay_core::AgentKind;
use agent_relay_core::AgentResponse;
use agent_relay_core::AgentSelector;
use agent_relay_core::AuditEvent;
use agent_relay_core::AuditEventKind;
use agent_relay_core::AuditSink;
use agent_relay_core::CallerIdentity;
use agent_relay_core::RelayRequest;
use agent_relay_core::RelayResponse;
use agent_relay_core::ResponseStatus;
use agent_relay_core::RoutingDecision;
use agent_relay_dispatch::AgentClient;
use agent_relay_identity::AuthError;
use agent_relay_identity::CredentialValidator;
use agent_relay_identity::DelegatedCredential;
use agent_relay_identity::ExchangeError;
use agent_relay_identity::TokenExchanger;
use agent_relay_identity::parse_bearer_header;
use agent_relay_identity::token_fingerprint;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;

use crate::session::SessionMap;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Message prefix length recorded in selection audit events.
const AUDIT_MESSAGE_PREFIX_CHARS: usize = 50;

/// Downstream metadata key carrying the conversation thread handle.
const THREAD_METADATA_KEY: &str = "thread_id";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Orchestration-level pipeline failures.
///
/// Downstream dispatch failures are deliberately absent: they are embedded in
/// the relay response rather than raised.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The inbound credential is missing or failed validation.
    #[error("authentication failed: {0}")]
    Unauthenticated(#[from] AuthError),
    /// The authorization policy denied agent access.
    #[error(transparent)]
    AccessDenied(#[from] AccessDenied),
    /// The delegated exchange failed.
    #[error("delegated exchange failed: {0}")]
    Exchange(#[from] ExchangeError),
}

impl PipelineError {
    /// Returns the HTTP status code for this failure.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Unauthenticated(_) => 401,
            Self::AccessDenied(_) => 403,
            Self::Exchange(ExchangeError::ProviderRejected {
                ..
            }) => 401,
            Self::Exchange(_) => 500,
        }
    }

    /// Returns the caller-facing message; verification detail stays in audit.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Unauthenticated(_) => AuthError::public_message().to_string(),
            Self::AccessDenied(denied) => denied.to_string(),
            Self::Exchange(ExchangeError::NotConfigured) => {
                "delegated exchange not configured".to_string()
            }
            Self::Exchange(_) => "failed to acquire delegated credential".to_string(),
        }
    }
}

// ============================================================================
// SECTION: Pipeline Parts
// ============================================================================

/// Dependencies wired into a pipeline at startup.
pub struct PipelineParts {
    /// Authentication toggles.
    pub auth: AuthConfig,
    /// Credential validator; required when authentication is on.
    pub validator: Option<Arc<CredentialValidator>>,
    /// Delegated exchange service.
    pub exchanger: Arc<dyn TokenExchanger>,
    /// Role-based access policy.
    pub policy: AccessPolicy,
    /// Agent selector with optional oracle.
    pub selector: AgentSelector,
    /// Downstream agent client.
    pub client: AgentClient,
    /// Audit sink observing every stage.
    pub audit: Arc<dyn AuditSink>,
    /// Conversation session map.
    pub sessions: SessionMap,
    /// Exchange scopes for the Python agent.
    pub python_scopes: Vec<String>,
    /// Exchange scopes for the payroll agent.
    pub dotnet_scopes: Vec<String>,
}

// ============================================================================
// SECTION: Pipeline
// ============================================================================

/// Per-request orchestration pipeline.
pub struct RelayPipeline {
    /// Authentication toggles.
    auth: AuthConfig,
    /// Credential validator; required when authentication is on.
    validator: Option<Arc<CredentialValidator>>,
    /// Delegated exchange service.
    exchanger: Arc<dyn TokenExchanger>,
    /// Role-based access policy.
    policy: AccessPolicy,
    /// Agent selector with optional oracle.
    selector: AgentSelector,
    /// Downstream agent client.
    client: AgentClient,
    /// Audit sink observing every stage.
    audit: Arc<dyn AuditSink>,
    /// Conversation session map.
    sessions: SessionMap,
    /// Exchange scopes for the Python agent.
    python_scopes: Vec<String>,
    /// Exchange scopes for the payroll agent.
    dotnet_scopes: Vec<String>,
}

impl RelayPipeline {
    /// Builds a pipeline from its wired dependencies.
    #[must_use]
    pub fn new(parts: PipelineParts) -> Self {
        Self {
            auth: parts.auth,
            validator: parts.validator,
            exchanger: parts.exchanger,
            policy: parts.policy,
            selector: parts.selector,
            client: parts.client,
            audit: parts.audit,
            sessions: parts.sessions,
            python_scopes: parts.python_scopes,
            dotnet_scopes: parts.dotnet_scopes,
        }
    }

    /// Returns whether inbound authentication is required.
    #[must_use]
    pub const fn auth_required(&self) -> bool {
        self.auth.require_auth
    }

    /// Handles one inbound request through the full stage order.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] for orchestration-level failures; downstream
    /// agent failures are embedded in the returned response instead.
    pub async fn handle(
        &self,
        request: RelayRequest,
        auth_header: Option<&str>,
    ) -> Result<RelayResponse, PipelineError> {
        let started = Instant::now();

        // Stage 1: authentication. Nothing runs before this when required.
        let (identity, caller_token) = self.authenticate(auth_header).await?;

        // Stage 2: agent selection.
        let decision =
            self.selector.select(&request.message, request.preferred_agent).await;
        self.audit_selection(&identity, &decision, &request.message);

        // Stage 3: authorization gate, always ahead of exchange.
        if let Err(denied) = self.policy.require_access(&identity, decision.agent) {
            self.record(AuditEvent::for_identity(
                AuditEventKind::AccessDenied,
                &identity,
                Some(decision.agent),
                false,
                detail(&[
                    ("resource", json!(format!("agent:{}", decision.agent))),
                    ("reason", json!(denied.to_string())),
                ]),
            ));
            return Err(denied.into());
        }

        // Stage 4: delegated exchange, only when a caller credential exists.
        let credential = match caller_token {
            Some(token) => Some(self.exchange(&identity, decision.agent, &token).await?),
            None => None,
        };

        // Stage 5: downstream dispatch with in-band failure mapping.
        let downstream_metadata = self.downstream_metadata(&request);
        let agent_response = self
            .client
            .dispatch(
                decision.agent,
                &request.message,
                credential.as_ref(),
                request.conversation_id.as_deref(),
                downstream_metadata,
            )
            .await;
        let elapsed_ms = elapsed_millis(started);
        self.audit_dispatch(&identity, &agent_response, elapsed_ms, credential.as_ref());

        let credential_acquired = credential.is_some();
        Ok(self.build_response(
            request,
            &identity,
            &decision,
            agent_response,
            elapsed_ms,
            credential_acquired,
        ))
    }

    /// Probes every concrete agent's health endpoint.
    pub async fn agents_health(&self) -> BTreeMap<&'static str, bool> {
        let mut health = BTreeMap::new();
        for agent in AgentKind::concrete() {
            health.insert(agent.as_str(), self.client.health_check(agent).await);
        }
        health
    }

    // ------------------------------------------------------------------
    // Stage helpers
    // ------------------------------------------------------------------

    /// Authenticates the caller or substitutes the synthetic test identity.
    async fn authenticate(
        &self,
        auth_header: Option<&str>,
    ) -> Result<(CallerIdentity, Option<String>), PipelineError> {
        if !self.auth.require_auth {
            let identity = CallerIdentity::synthetic();
            self.record(AuditEvent::for_identity(
                AuditEventKind::CredentialValidated,
                &identity,
                None,
                true,
                detail(&[("auth_enabled", json!(false))]),
            ));
            return Ok((identity, None));
        }

        let header = auth_header.ok_or_else(|| {
            let error = AuthError::InvalidToken("authorization header required".to_string());
            self.audit_rejection(&error);
            PipelineError::Unauthenticated(error)
        })?;
        let token = parse_bearer_header(header).map_err(|error| {
            self.audit_rejection(&error);
            PipelineError::Unauthenticated(error)
        })?;
        let Some(validator) = &self.validator else {
            let error = AuthError::NotConfigured("credential validator missing".to_string());
            self.audit_rejection(&error);
            return Err(PipelineError::Unauthenticated(error));
        };
        let identity = match validator.validate(&token).await {
            Ok(identity) => identity,
            Err(error) => {
                self.audit_rejection(&error);
                return Err(PipelineError::Unauthenticated(error));
            }
        };
        self.record(AuditEvent::for_identity(
            AuditEventKind::CredentialValidated,
            &identity,
            None,
            true,
            detail(&[
                ("roles", json!(identity.roles)),
                ("token_issued_at", json!(identity.issued_at)),
                ("token_expires_at", json!(identity.expires_at)),
                ("token_fingerprint", json!(token_fingerprint(&token))),
            ]),
        ));
        Ok((identity, Some(token)))
    }

    /// Exchanges the caller token for a credential scoped to the agent.
    async fn exchange(
        &self,
        identity: &CallerIdentity,
        agent: AgentKind,
        caller_token: &str,
    ) -> Result<DelegatedCredential, PipelineError> {
        let scopes = self.scopes_for(agent);
        match self.exchanger.exchange(caller_token, &identity.subject, scopes).await {
            Ok(credential) => {
                self.record(AuditEvent::for_identity(
                    AuditEventKind::ExchangeSucceeded,
                    identity,
                    Some(agent),
                    true,
                    detail(&[("scopes", json!(credential.scopes()))]),
                ));
                Ok(credential)
            }
            Err(error) => {
                self.record(AuditEvent::for_identity(
                    AuditEventKind::ExchangeFailed,
                    identity,
                    Some(agent),
                    false,
                    detail(&[
                        ("scopes", json!(scopes)),
                        ("reason", json!(exchange_reason(&error))),
                    ]),
                ));
                Err(error.into())
            }
        }
    }

    /// Returns the configured exchange scopes for an agent.
    fn scopes_for(&self, agent: AgentKind) -> &[String] {
        match agent {
            AgentKind::Python => &self.python_scopes,
            AgentKind::Dotnet => &self.dotnet_scopes,
            AgentKind::Auto => &[],
        }
    }

    /// Builds the metadata forwarded downstream, attaching the session thread.
    fn downstream_metadata(&self, request: &RelayRequest) -> BTreeMap<String, Value> {
        let mut metadata = request.metadata.clone();
        if let Some(conversation_id) = &request.conversation_id {
            let thread_id = self.sessions.thread_for(conversation_id);
            metadata.insert(THREAD_METADATA_KEY.to_string(), json!(thread_id));
        }
        metadata
    }

    /// Builds the aggregated relay response.
    fn build_response(
        &self,
        request: RelayRequest,
        identity: &CallerIdentity,
        decision: &RoutingDecision,
        agent_response: AgentResponse,
        elapsed_ms: u64,
        credential_acquired: bool,
    ) -> RelayResponse {
        let mut metadata = BTreeMap::new();
        metadata.insert("user_id".to_string(), json!(identity.subject));
        metadata.insert("user_name".to_string(), json!(identity.name_or_unknown()));
        metadata.insert("user_email".to_string(), json!(identity.email_or_unknown()));
        metadata.insert("user_roles".to_string(), json!(identity.roles));
        metadata.insert(
            "user_role_level".to_string(),
            json!(self.policy.role_level(identity).as_str()),
        );
        metadata.insert(
            "has_special_role".to_string(),
            json!(self.policy.has_special_role(identity)),
        );
        metadata.insert("auth_enabled".to_string(), json!(self.auth.require_auth));
        metadata.insert("delegated_credential_acquired".to_string(), json!(credential_acquired));
        metadata.insert("selection_method".to_string(), json!(decision.method.as_str()));
        metadata.insert("response_time_ms".to_string(), json!(elapsed_ms));

        RelayResponse {
            message: agent_response.message.clone(),
            status: agent_response.status,
            selected_agent: decision.agent,
            conversation_id: request.conversation_id,
            agent_responses: vec![agent_response],
            metadata,
        }
    }

    // ------------------------------------------------------------------
    // Audit helpers
    // ------------------------------------------------------------------

    /// Records an event, never failing the request path.
    fn record(&self, event: AuditEvent) {
        self.audit.record(&event);
    }

    /// Records a credential rejection with operator detail.
    fn audit_rejection(&self, error: &AuthError) {
        self.record(AuditEvent::anonymous(
            AuditEventKind::CredentialRejected,
            false,
            detail(&[("reason", json!(error.to_string()))]),
        ));
    }

    /// Records the selection decision.
    fn audit_selection(
        &self,
        identity: &CallerIdentity,
        decision: &RoutingDecision,
        message: &str,
    ) {
        let prefix: String = message.chars().take(AUDIT_MESSAGE_PREFIX_CHARS).collect();
        let mut entries = vec![
            ("method", json!(decision.method.as_str())),
            ("message_prefix", json!(prefix)),
        ];
        if let Some(scores) = decision.scores {
            entries.push(("keyword_scores", json!(scores)));
        }
        self.record(AuditEvent::for_identity(
            AuditEventKind::AgentSelected,
            identity,
            Some(decision.agent),
            true,
            detail(&entries),
        ));
    }

    /// Records the dispatch outcome.
    fn audit_dispatch(
        &self,
        identity: &CallerIdentity,
        response: &AgentResponse,
        elapsed_ms: u64,
        credential: Option<&DelegatedCredential>,
    ) {
        let succeeded = response.status == ResponseStatus::Success;
        let kind = if succeeded {
            AuditEventKind::AgentCallSucceeded
        } else {
            AuditEventKind::AgentCallFailed
        };
        let mut entries = vec![
            ("response_time_ms", json!(elapsed_ms)),
            ("auth_mode", json!(self.client.auth_mode(credential))),
        ];
        if !succeeded {
            entries.push(("error", json!(response.message)));
        }
        self.record(AuditEvent::for_identity(
            kind,
            identity,
            Some(response.agent),
            succeeded,
            detail(&entries),
        ));
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Builds a detail map from key/value pairs.
fn detail(entries: &[(&str, Value)]) -> BTreeMap<String, Value> {
    entries.iter().map(|(key, value)| ((*key).to_string(), value.clone())).collect()
}

/// Returns the audit reason string for an exchange failure.
fn exchange_reason(error: &ExchangeError) -> String {
    match error {
        ExchangeError::NotConfigured => "not configured".to_string(),
        ExchangeError::ProviderRejected {
            reason,
        } => reason.clone(),
        ExchangeError::Transport(reason) => reason.clone(),
    }
}

/// Returns elapsed milliseconds since `started`, saturating on overflow.
fn elapsed_millis(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
