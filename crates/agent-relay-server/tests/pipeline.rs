// crates/agent-relay-server/tests/pipeline.rs
// ============================================================================
// Module: Pipeline Scenario Tests
// Description: End-to-end pipeline tests over stubbed collaborators.
// Purpose: Validate stage ordering, status mapping, and audit coverage.
// Dependencies: agent-relay-server, agent-relay-identity, tiny_http, tokio
// ============================================================================

//! Pipeline scenario tests: authentication gating, authorization denial,
//! exchange failure mapping, and in-band downstream failure handling.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions use unwrap for clarity."
)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use agent_relay_config::AgentEndpointConfig;
use agent_relay_config::AgentsConfig;
use agent_relay_config::AuthConfig;
use agent_relay_config::IdentityConfig;
use agent_relay_config::TimeoutConfig;
use agent_relay_core::AccessPolicy;
use agent_relay_core::AgentKind;
use agent_relay_core::AgentSelector;
use agent_relay_core::AuditEventKind;
use agent_relay_core::MemoryAuditSink;
use agent_relay_core::RelayRequest;
use agent_relay_core::ResponseStatus;
use agent_relay_dispatch::AgentClient;
use agent_relay_identity::AuthError;
use agent_relay_identity::CredentialValidator;
use agent_relay_identity::DelegatedCredential;
use agent_relay_identity::ExchangeError;
use agent_relay_identity::InMemoryKeySource;
use agent_relay_identity::OboExchanger;
use agent_relay_identity::TokenExchanger;
use agent_relay_server::PipelineError;
use agent_relay_server::PipelineParts;
use agent_relay_server::RelayPipeline;
use agent_relay_server::SessionMap;
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::EncodingKey;
use jsonwebtoken::Header;
use serde::Serialize;
use serde_json::json;

/// Shared HMAC secret for test tokens.
const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";
/// Key identifier advertised in the test JWKS.
const KID: &str = "test-key";
/// Expected audience for test tokens.
const AUDIENCE: &str = "api://agent-relay";
/// Expected issuer for test tokens.
const ISSUER: &str = "https://login.example.com/tenant-1/v2.0";
/// Timeouts kept small so failure paths resolve quickly.
const TEST_TIMEOUTS: TimeoutConfig = TimeoutConfig {
    request_timeout_ms: 500,
    health_timeout_ms: 300,
};

/// Claims payload encoded into test tokens.
#[derive(Serialize)]
struct Claims {
    /// Audience claim.
    aud: String,
    /// Issuer claim.
    iss: String,
    /// Object identifier claim.
    oid: String,
    /// Display name claim.
    name: String,
    /// Principal name claim.
    preferred_username: String,
    /// Role strings.
    roles: Vec<String>,
    /// Issued-at seconds.
    iat: i64,
    /// Expiry seconds.
    exp: i64,
}

/// Encodes a one-hour token carrying the given roles.
fn token_with_roles(roles: &[&str]) -> String {
    let now = i64::try_from(
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs(),
    )
    .unwrap();
    let claims = Claims {
        aud: AUDIENCE.to_string(),
        iss: ISSUER.to_string(),
        oid: "user-42".to_string(),
        name: "Avery Analyst".to_string(),
        preferred_username: "avery@example.com".to_string(),
        roles: roles.iter().map(|role| (*role).to_string()).collect(),
        iat: now,
        exp: now + 3_600,
    };
    let mut header = Header::new(jsonwebtoken::Algorithm::HS256);
    header.kid = Some(KID.to_string());
    jsonwebtoken::encode(&header, &claims, &EncodingKey::from_secret(SECRET)).unwrap()
}

/// Builds a validator over the in-memory test JWKS.
fn test_validator() -> Arc<CredentialValidator> {
    let jwks = serde_json::from_value(json!({
        "keys": [{
            "kty": "oct",
            "kid": KID,
            "alg": "HS256",
            "k": URL_SAFE_NO_PAD.encode(SECRET),
        }]
    }))
    .unwrap();
    let config = IdentityConfig {
        authority: "https://login.example.com/tenant-1".to_string(),
        audience: AUDIENCE.to_string(),
        issuer: ISSUER.to_string(),
        algorithm: "HS256".to_string(),
        client_id: String::new(),
        client_secret: String::new(),
    };
    Arc::new(
        CredentialValidator::new(&config, Arc::new(InMemoryKeySource::new(jwks))).unwrap(),
    )
}

/// Exchanger stub issuing a fixed delegated credential.
struct StubExchanger;

#[async_trait]
impl TokenExchanger for StubExchanger {
    async fn exchange(
        &self,
        _caller_token: &str,
        subject: &str,
        target_scopes: &[String],
    ) -> Result<DelegatedCredential, ExchangeError> {
        Ok(DelegatedCredential::new(
            "stub-delegated".to_string(),
            target_scopes.to_vec(),
            subject.to_string(),
        ))
    }
}

/// Pipeline builder options for one test.
struct PipelineOptions {
    /// Require and validate inbound credentials.
    require_auth: bool,
    /// Enable the any-authenticated fallback.
    allow_any_authenticated: bool,
    /// Base URL both agents point at.
    agent_base_url: String,
    /// Exchanger wired into the pipeline.
    exchanger: Arc<dyn TokenExchanger>,
}

/// Builds a pipeline plus the memory audit sink observing it.
fn build_pipeline(options: PipelineOptions) -> (RelayPipeline, Arc<MemoryAuditSink>) {
    let audit = Arc::new(MemoryAuditSink::new());
    let auth = AuthConfig {
        require_auth: options.require_auth,
        allow_any_authenticated: options.allow_any_authenticated,
    };
    let endpoint = AgentEndpointConfig {
        base_url: options.agent_base_url.clone(),
        scopes: Vec::new(),
    };
    let agents = AgentsConfig {
        python: endpoint.clone(),
        dotnet: endpoint,
    };
    let client =
        AgentClient::from_config(&agents, TEST_TIMEOUTS, options.require_auth).unwrap();
    let pipeline = RelayPipeline::new(PipelineParts {
        auth,
        validator: options.require_auth.then(test_validator),
        exchanger: options.exchanger,
        policy: AccessPolicy::new(options.allow_any_authenticated),
        selector: AgentSelector::new(),
        client,
        audit: Arc::clone(&audit) as Arc<dyn agent_relay_core::AuditSink>,
        sessions: SessionMap::new(16, Duration::from_secs(60)),
        python_scopes: vec!["api://python-agent/.default".to_string()],
        dotnet_scopes: vec!["api://dotnet-agent/.default".to_string()],
    });
    (pipeline, audit)
}

/// Spawns a stub agent endpoint answering `count` requests.
///
/// Reports each request's Authorization header and `thread_id` metadata.
fn spawn_agent(
    count: usize,
    delay: Duration,
    observed: mpsc::Sender<(Option<String>, Option<String>)>,
) -> String {
    let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
    let addr = server.server_addr().to_ip().unwrap();
    std::thread::spawn(move || {
        for _ in 0 .. count {
            let Ok(mut request) = server.recv() else {
                return;
            };
            let authorization = request
                .headers()
                .iter()
                .find(|header| header.field.equiv("Authorization"))
                .map(|header| header.value.to_string());
            let mut body = String::new();
            let _ = request.as_reader().read_to_string(&mut body);
            let thread_id = serde_json::from_str::<serde_json::Value>(&body)
                .ok()
                .and_then(|payload| {
                    payload["metadata"]["thread_id"].as_str().map(ToString::to_string)
                });
            let _ = observed.send((authorization, thread_id));
            std::thread::sleep(delay);
            let header = tiny_http::Header::from_bytes(
                &b"Content-Type"[..],
                &b"application/json"[..],
            )
            .unwrap();
            let response = tiny_http::Response::from_string(
                r#"{"message":"You have 12 PTO days remaining","status":"success"}"#,
            )
            .with_status_code(200)
            .with_header(header);
            let _ = request.respond(response);
        }
    });
    format!("http://{addr}")
}

/// Builds an inbound request with auto preference.
fn auto_request(message: &str) -> RelayRequest {
    RelayRequest {
        message: message.to_string(),
        conversation_id: None,
        preferred_agent: AgentKind::Auto,
        metadata: BTreeMap::new(),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn pto_question_routes_to_payroll_agent_for_user_role() {
    let (tx, rx) = mpsc::channel();
    let base = spawn_agent(1, Duration::ZERO, tx);
    let (pipeline, audit) = build_pipeline(PipelineOptions {
        require_auth: true,
        allow_any_authenticated: false,
        agent_base_url: base,
        exchanger: Arc::new(StubExchanger),
    });
    let header = format!("Bearer {}", token_with_roles(&["user"]));
    let response =
        pipeline.handle(auto_request("What's my PTO balance?"), Some(header.as_str())).await.unwrap();

    assert_eq!(response.selected_agent, AgentKind::Dotnet);
    assert_eq!(response.status, ResponseStatus::Success);
    assert_eq!(response.metadata["user_role_level"], json!("user"));
    assert_eq!(response.metadata["delegated_credential_acquired"], json!(true));
    let (authorization, _) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(authorization.as_deref(), Some("Bearer stub-delegated"));
    assert_eq!(
        audit.kinds(),
        vec![
            AuditEventKind::CredentialValidated,
            AuditEventKind::AgentSelected,
            AuditEventKind::ExchangeSucceeded,
            AuditEventKind::AgentCallSucceeded,
        ]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn viewer_is_denied_with_fallback_off() {
    let (pipeline, audit) = build_pipeline(PipelineOptions {
        require_auth: true,
        allow_any_authenticated: false,
        agent_base_url: "http://127.0.0.1:1".to_string(),
        exchanger: Arc::new(StubExchanger),
    });
    let header = format!("Bearer {}", token_with_roles(&["viewer"]));
    let err = pipeline
        .handle(auto_request("analyze this dataframe"), Some(header.as_str()))
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), 403);
    assert!(matches!(err, PipelineError::AccessDenied(_)));
    assert_eq!(
        audit.kinds(),
        vec![
            AuditEventKind::CredentialValidated,
            AuditEventKind::AgentSelected,
            AuditEventKind::AccessDenied,
        ]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_credential_fails_before_selection() {
    let (pipeline, audit) = build_pipeline(PipelineOptions {
        require_auth: true,
        allow_any_authenticated: false,
        agent_base_url: "http://127.0.0.1:1".to_string(),
        exchanger: Arc::new(StubExchanger),
    });
    let err = pipeline.handle(auto_request("hello"), None).await.unwrap_err();

    assert_eq!(err.status_code(), 401);
    // Selection never ran: the only audited event is the rejection.
    assert_eq!(audit.kinds(), vec![AuditEventKind::CredentialRejected]);
}

#[tokio::test(flavor = "multi_thread")]
async fn unconfigured_exchange_fails_with_server_error() {
    let exchanger = OboExchanger::from_config(&IdentityConfig::default()).unwrap();
    let (pipeline, audit) = build_pipeline(PipelineOptions {
        require_auth: true,
        allow_any_authenticated: false,
        agent_base_url: "http://127.0.0.1:1".to_string(),
        exchanger: Arc::new(exchanger),
    });
    let header = format!("Bearer {}", token_with_roles(&["user"]));
    let err =
        pipeline.handle(auto_request("What's my PTO balance?"), Some(header.as_str())).await.unwrap_err();

    assert_eq!(err.status_code(), 500);
    assert!(matches!(err, PipelineError::Exchange(ExchangeError::NotConfigured)));
    assert_eq!(
        audit.kinds(),
        vec![
            AuditEventKind::CredentialValidated,
            AuditEventKind::AgentSelected,
            AuditEventKind::ExchangeFailed,
        ]
    );
    let events = audit.events();
    let failure = events.last().unwrap();
    assert_eq!(failure.detail["reason"], json!("not configured"));
}

#[tokio::test(flavor = "multi_thread")]
async fn downstream_timeout_is_embedded_in_success_response() {
    let (tx, _rx) = mpsc::channel();
    let base = spawn_agent(1, Duration::from_millis(1_500), tx);
    let (pipeline, audit) = build_pipeline(PipelineOptions {
        require_auth: false,
        allow_any_authenticated: true,
        agent_base_url: base,
        exchanger: Arc::new(StubExchanger),
    });
    let response =
        pipeline.handle(auto_request("What's my PTO balance?"), None).await.unwrap();

    // The relay itself succeeded; the agent failure rides in band.
    assert_eq!(response.status, ResponseStatus::Error);
    assert_eq!(response.selected_agent, AgentKind::Dotnet);
    assert!(response.message.contains("dotnet"));
    assert!(audit.kinds().contains(&AuditEventKind::AgentCallFailed));
}

#[tokio::test(flavor = "multi_thread")]
async fn conversations_reuse_their_thread_handle() {
    let (tx, rx) = mpsc::channel();
    let base = spawn_agent(2, Duration::ZERO, tx);
    let (pipeline, _audit) = build_pipeline(PipelineOptions {
        require_auth: false,
        allow_any_authenticated: true,
        agent_base_url: base,
        exchanger: Arc::new(StubExchanger),
    });
    let request = RelayRequest {
        message: "hello".to_string(),
        conversation_id: Some("conv-7".to_string()),
        preferred_agent: AgentKind::Python,
        metadata: BTreeMap::new(),
    };
    let _first = pipeline.handle(request.clone(), None).await.unwrap();
    let _second = pipeline.handle(request, None).await.unwrap();

    let (_, first_thread) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    let (_, second_thread) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
    assert!(first_thread.is_some());
    assert_eq!(first_thread, second_thread);
}

#[tokio::test(flavor = "multi_thread")]
async fn agents_health_is_idempotent_for_unreachable_agents() {
    let (pipeline, _audit) = build_pipeline(PipelineOptions {
        require_auth: false,
        allow_any_authenticated: true,
        agent_base_url: "http://127.0.0.1:1".to_string(),
        exchanger: Arc::new(StubExchanger),
    });
    for _ in 0 .. 2 {
        let health = pipeline.agents_health().await;
        assert_eq!(health.get("python"), Some(&false));
        assert_eq!(health.get("dotnet"), Some(&false));
    }
}

#[test]
fn error_status_mapping_is_stable() {
    assert_eq!(PipelineError::Unauthenticated(AuthError::Expired).status_code(), 401);
    assert_eq!(
        PipelineError::AccessDenied(agent_relay_core::AccessDenied {
            roles: vec!["viewer".to_string()],
            agent: AgentKind::Python,
        })
        .status_code(),
        403
    );
    assert_eq!(PipelineError::Exchange(ExchangeError::NotConfigured).status_code(), 500);
    assert_eq!(
        PipelineError::Exchange(ExchangeError::ProviderRejected {
            reason: "consent required".to_string(),
        })
        .status_code(),
        401
    );
    assert_eq!(
        PipelineError::Exchange(ExchangeError::Transport("timeout".to_string())).status_code(),
        500
    );
}
