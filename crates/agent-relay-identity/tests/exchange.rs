// crates/agent-relay-identity/tests/exchange.rs
// ============================================================================
// Module: Delegated Exchange Tests
// Description: Unit tests for the on-behalf-of exchange client.
// Purpose: Validate fail-fast, rejection mapping, and scope narrowing.
// Dependencies: agent-relay-identity, tiny_http, tokio
// ============================================================================

//! On-behalf-of exchange tests against a stub token endpoint.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions use unwrap for clarity."
)]

use agent_relay_config::IdentityConfig;
use agent_relay_identity::ExchangeError;
use agent_relay_identity::OboExchanger;
use agent_relay_identity::TokenExchanger;

/// Builds identity config pointing the token endpoint at the given authority.
fn configured_identity(authority: &str) -> IdentityConfig {
    IdentityConfig {
        authority: authority.to_string(),
        audience: "api://agent-relay".to_string(),
        issuer: "https://login.example.com/tenant-1/v2.0".to_string(),
        algorithm: "RS256".to_string(),
        client_id: "client-1".to_string(),
        client_secret: "client-secret".to_string(),
    }
}

/// Spawns a one-shot stub token endpoint returning the given response.
fn spawn_token_endpoint(status: u16, body: &'static str) -> String {
    let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
    let addr = server.server_addr().to_ip().unwrap();
    std::thread::spawn(move || {
        if let Ok(request) = server.recv() {
            let header = tiny_http::Header::from_bytes(
                &b"Content-Type"[..],
                &b"application/json"[..],
            )
            .unwrap();
            let response =
                tiny_http::Response::from_string(body).with_status_code(status).with_header(header);
            let _ = request.respond(response);
        }
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn missing_registration_fails_fast() {
    let exchanger = OboExchanger::from_config(&IdentityConfig::default()).unwrap();
    assert!(!exchanger.is_configured());
    let err = exchanger
        .exchange("caller-token", "user-42", &["api://python-agent/.default".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, ExchangeError::NotConfigured));
}

#[tokio::test]
async fn successful_exchange_returns_scoped_credential() {
    let authority = spawn_token_endpoint(
        200,
        r#"{"token_type":"Bearer","access_token":"delegated-token-1",
            "scope":"api://python-agent/.default unrequested/scope"}"#,
    );
    let exchanger = OboExchanger::from_config(&configured_identity(&authority)).unwrap();
    let requested = vec!["api://python-agent/.default".to_string()];
    let credential = exchanger.exchange("caller-token", "user-42", &requested).await.unwrap();
    assert_eq!(credential.token(), "delegated-token-1");
    assert_eq!(credential.subject(), "user-42");
    // Provider-echoed scopes outside the request never widen the credential.
    assert_eq!(credential.scopes(), &requested[..]);
}

#[tokio::test]
async fn provider_rejection_carries_reason_for_audit() {
    let authority = spawn_token_endpoint(
        400,
        r#"{"error":"invalid_grant","error_description":"AADSTS65001: consent required"}"#,
    );
    let exchanger = OboExchanger::from_config(&configured_identity(&authority)).unwrap();
    let err = exchanger
        .exchange("caller-token", "user-42", &["api://dotnet-agent/.default".to_string()])
        .await
        .unwrap_err();
    match err {
        ExchangeError::ProviderRejected {
            reason,
        } => assert!(reason.contains("consent required")),
        other => panic!("expected provider rejection, got {other}"),
    }
}

#[tokio::test]
async fn unreachable_endpoint_is_a_transport_error() {
    let exchanger =
        OboExchanger::from_config(&configured_identity("http://127.0.0.1:1")).unwrap();
    let err = exchanger.exchange("caller-token", "user-42", &[]).await.unwrap_err();
    assert!(matches!(err, ExchangeError::Transport(_)));
}

#[tokio::test]
async fn credential_debug_redacts_token() {
    let authority = spawn_token_endpoint(
        200,
        r#"{"token_type":"Bearer","access_token":"super-secret-value"}"#,
    );
    let exchanger = OboExchanger::from_config(&configured_identity(&authority)).unwrap();
    let credential = exchanger.exchange("caller-token", "user-42", &[]).await.unwrap();
    let rendered = format!("{credential:?}");
    assert!(!rendered.contains("super-secret-value"));
    assert!(rendered.contains("<redacted>"));
}
