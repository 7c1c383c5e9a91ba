// crates/agent-relay-server/src/server.rs
// ============================================================================
// Module: Relay HTTP Server
// Description: HTTP boundary and state wiring for the relay.
// Purpose: Expose the pipeline over the fixed inbound HTTP contract.
// Dependencies: agent-relay-config, agent-relay-core, axum, tokio
// ============================================================================

//! ## Overview
//! The server wires configuration into a [`RelayPipeline`] and exposes it on
//! the inbound contract: `POST /agent` runs the pipeline, `GET /agent`
//! returns a status payload, `GET /health` reports the relay's own health,
//! and `GET /health/agents` probes downstream reachability. Orchestration
//! failures map to 401/403/500 with generic messages; downstream failures
//! ride inside a 200 response.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use agent_relay_config::AuditSinkKind;
use agent_relay_config::RelayConfig;
use agent_relay_core::AccessPolicy;
use agent_relay_core::AgentSelector;
use agent_relay_core::AuditSink;
use agent_relay_core::FileAuditSink;
use agent_relay_core::NoopAuditSink;
use agent_relay_core::RelayRequest;
use agent_relay_core::StderrAuditSink;
use agent_relay_dispatch::AgentClient;
use agent_relay_identity::CredentialValidator;
use agent_relay_identity::DiscoveryKeySource;
use agent_relay_identity::OboExchanger;
use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::http::header::AUTHORIZATION;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use serde::Serialize;
use thiserror::Error;

use crate::oracle::CliRouteOracle;
use crate::pipeline::PipelineParts;
use crate::pipeline::RelayPipeline;
use crate::session::SessionMap;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Service label used in status and health payloads.
const SERVICE_NAME: &str = "agent-relay";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Server construction and transport errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The bind address failed to parse.
    #[error("invalid bind address {0}")]
    BindAddr(String),
    /// The audit sink could not be initialized.
    #[error("audit sink init failed: {0}")]
    Audit(String),
    /// Identity components could not be initialized.
    #[error("identity init failed: {0}")]
    Identity(String),
    /// The downstream agent client could not be initialized.
    #[error("dispatch init failed: {0}")]
    Dispatch(String),
    /// The listener could not bind or the server failed.
    #[error("server transport error: {0}")]
    Transport(String),
}

// ============================================================================
// SECTION: Server
// ============================================================================

/// Relay HTTP server.
pub struct RelayServer {
    /// Address the server binds to.
    bind_addr: SocketAddr,
    /// Shared request pipeline.
    pipeline: Arc<RelayPipeline>,
}

impl RelayServer {
    /// Wires configuration into a server ready to bind.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError`] when any component fails to initialize.
    pub fn from_config(config: RelayConfig) -> Result<Self, ServerError> {
        let bind_addr = config
            .server
            .bind_addr
            .parse::<SocketAddr>()
            .map_err(|_| ServerError::BindAddr(config.server.bind_addr.clone()))?;
        let pipeline = Arc::new(build_pipeline(&config)?);
        Ok(Self {
            bind_addr,
            pipeline,
        })
    }

    /// Returns the configured bind address.
    #[must_use]
    pub const fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }

    /// Builds the HTTP router over the shared pipeline.
    #[must_use]
    pub fn router(&self) -> Router {
        Router::new()
            .route("/agent", post(handle_agent).get(handle_status))
            .route("/health", get(handle_health))
            .route("/health/agents", get(handle_agents_health))
            .with_state(Arc::clone(&self.pipeline))
    }

    /// Binds the listener and serves requests until shutdown.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Transport`] when binding or serving fails.
    pub async fn serve(self) -> Result<(), ServerError> {
        let app = self.router();
        let listener = tokio::net::TcpListener::bind(self.bind_addr)
            .await
            .map_err(|err| ServerError::Transport(format!("bind failed: {err}")))?;
        axum::serve(listener, app)
            .await
            .map_err(|err| ServerError::Transport(format!("serve failed: {err}")))
    }
}

// ============================================================================
// SECTION: Wiring
// ============================================================================

/// Builds the request pipeline from validated configuration.
fn build_pipeline(config: &RelayConfig) -> Result<RelayPipeline, ServerError> {
    let audit = build_audit_sink(config)?;

    let validator = if config.auth.require_auth {
        let keys = DiscoveryKeySource::new(&config.identity.authority)
            .map_err(|err| ServerError::Identity(err.to_string()))?;
        let validator = CredentialValidator::new(&config.identity, Arc::new(keys))
            .map_err(|err| ServerError::Identity(err.to_string()))?;
        Some(Arc::new(validator))
    } else {
        None
    };

    let exchanger = OboExchanger::from_config(&config.identity)
        .map_err(|err| ServerError::Identity(err.to_string()))?;

    let selector = CliRouteOracle::from_config(&config.routing)
        .map_or_else(AgentSelector::new, |oracle| AgentSelector::with_oracle(Arc::new(oracle)));

    let client =
        AgentClient::from_config(&config.agents, config.timeouts, config.auth.require_auth)
            .map_err(|err| ServerError::Dispatch(err.to_string()))?;

    let sessions = SessionMap::new(
        config.session.capacity,
        Duration::from_secs(config.session.ttl_seconds),
    );

    Ok(RelayPipeline::new(PipelineParts {
        auth: config.auth,
        validator,
        exchanger: Arc::new(exchanger),
        policy: AccessPolicy::new(config.auth.allow_any_authenticated),
        selector,
        client,
        audit,
        sessions,
        python_scopes: config.agents.python.scopes.clone(),
        dotnet_scopes: config.agents.dotnet.scopes.clone(),
    }))
}

/// Builds the configured audit sink.
fn build_audit_sink(config: &RelayConfig) -> Result<Arc<dyn AuditSink>, ServerError> {
    match config.audit.sink {
        AuditSinkKind::Stderr => Ok(Arc::new(StderrAuditSink)),
        AuditSinkKind::Noop => Ok(Arc::new(NoopAuditSink)),
        AuditSinkKind::File => {
            let path = config
                .audit
                .path
                .as_ref()
                .ok_or_else(|| ServerError::Audit("audit file path missing".to_string()))?;
            let sink =
                FileAuditSink::new(path).map_err(|err| ServerError::Audit(err.to_string()))?;
            Ok(Arc::new(sink))
        }
    }
}

// ============================================================================
// SECTION: Payloads
// ============================================================================

/// Error body returned for orchestration-level failures.
#[derive(Debug, Serialize)]
struct ErrorPayload {
    /// Fixed error marker.
    status: &'static str,
    /// Generic caller-facing message.
    message: String,
}

/// Status payload for `GET /agent`.
#[derive(Debug, Serialize)]
struct StatusPayload {
    /// Human-readable liveness message.
    message: &'static str,
    /// Fixed health marker.
    status: &'static str,
    /// Service label.
    service: &'static str,
    /// Whether inbound authentication is required.
    auth_required: bool,
}

/// Health payload for `GET /health`.
#[derive(Debug, Serialize)]
struct HealthPayload {
    /// Fixed health marker.
    status: &'static str,
    /// Service label.
    service: &'static str,
    /// Whether inbound authentication is required.
    auth_required: bool,
}

/// Health payload for `GET /health/agents`.
#[derive(Debug, Serialize)]
struct AgentsHealthPayload {
    /// Relay's own health marker.
    orchestrator: &'static str,
    /// Per-agent reachability labels.
    agents: BTreeMap<&'static str, &'static str>,
}

// ============================================================================
// SECTION: Handlers
// ============================================================================

/// Handles `POST /agent` through the pipeline.
async fn handle_agent(
    State(pipeline): State<Arc<RelayPipeline>>,
    headers: HeaderMap,
    Json(request): Json<RelayRequest>,
) -> Response {
    let auth_header = headers.get(AUTHORIZATION).and_then(|value| value.to_str().ok());
    match pipeline.handle(request, auth_header).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(error) => {
            let status = StatusCode::from_u16(error.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            let payload = ErrorPayload {
                status: "error",
                message: error.public_message(),
            };
            (status, Json(payload)).into_response()
        }
    }
}

/// Handles `GET /agent` liveness checks.
async fn handle_status(State(pipeline): State<Arc<RelayPipeline>>) -> Json<StatusPayload> {
    Json(StatusPayload {
        message: "Agent relay is alive",
        status: "healthy",
        service: SERVICE_NAME,
        auth_required: pipeline.auth_required(),
    })
}

/// Handles `GET /health` for the relay itself.
async fn handle_health(State(pipeline): State<Arc<RelayPipeline>>) -> Json<HealthPayload> {
    Json(HealthPayload {
        status: "healthy",
        service: SERVICE_NAME,
        auth_required: pipeline.auth_required(),
    })
}

/// Handles `GET /health/agents` downstream reachability probes.
///
/// Answers 503 when every agent is unreachable; the payload always carries
/// the per-agent labels either way.
async fn handle_agents_health(State(pipeline): State<Arc<RelayPipeline>>) -> Response {
    let probes = pipeline.agents_health().await;
    let all_down = probes.values().all(|healthy| !healthy);
    let agents = probes
        .into_iter()
        .map(|(agent, healthy)| (agent, if healthy { "healthy" } else { "unreachable" }))
        .collect();
    let status = if all_down { StatusCode::SERVICE_UNAVAILABLE } else { StatusCode::OK };
    let payload = AgentsHealthPayload {
        orchestrator: "healthy",
        agents,
    };
    (status, Json(payload)).into_response()
}
