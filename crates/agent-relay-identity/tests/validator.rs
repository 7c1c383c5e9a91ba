// crates/agent-relay-identity/tests/validator.rs
// ============================================================================
// Module: Credential Validator Tests
// Description: Unit tests for inbound token verification.
// Purpose: Validate fail-closed verification and claim extraction.
// Dependencies: agent-relay-identity, jsonwebtoken, base64, tokio
// ============================================================================

//! Credential validation tests using an in-memory key source.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions use unwrap for clarity."
)]

use std::sync::Arc;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use agent_relay_config::IdentityConfig;
use agent_relay_identity::AuthError;
use agent_relay_identity::CredentialValidator;
use agent_relay_identity::InMemoryKeySource;
use agent_relay_identity::parse_bearer_header;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::EncodingKey;
use jsonwebtoken::Header;
use jsonwebtoken::jwk::JwkSet;
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

/// Claims payload encoded into test tokens.
#[derive(Serialize)]
struct Claims {
    /// Audience claim.
    aud: String,
    /// Issuer claim.
    iss: String,
    /// Object identifier claim.
    #[serde(skip_serializing_if = "Option::is_none")]
    oid: Option<String>,
    /// Subject claim.
    #[serde(skip_serializing_if = "Option::is_none")]
    sub: Option<String>,
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

impl Claims {
    /// Builds claims valid for one hour.
    fn valid(roles: &[&str]) -> Self {
        let now = now_seconds();
        Self {
            aud: AUDIENCE.to_string(),
            iss: ISSUER.to_string(),
            oid: Some("user-42".to_string()),
            sub: Some("subject-42".to_string()),
            name: "Avery Analyst".to_string(),
            preferred_username: "avery@example.com".to_string(),
            roles: roles.iter().map(|role| (*role).to_string()).collect(),
            iat: now,
            exp: now + 3_600,
        }
    }
}

/// Current time in whole seconds.
fn now_seconds() -> i64 {
    i64::try_from(SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()).unwrap()
}

/// Builds the JWKS advertising the shared test secret.
fn test_jwks() -> JwkSet {
    serde_json::from_value(json!({
        "keys": [{
            "kty": "oct",
            "kid": KID,
            "alg": "HS256",
            "k": URL_SAFE_NO_PAD.encode(SECRET),
        }]
    }))
    .unwrap()
}

/// Builds a validator over the in-memory key source.
fn validator() -> CredentialValidator {
    let config = IdentityConfig {
        authority: "https://login.example.com/tenant-1".to_string(),
        audience: AUDIENCE.to_string(),
        issuer: ISSUER.to_string(),
        algorithm: "HS256".to_string(),
        client_id: String::new(),
        client_secret: String::new(),
    };
    CredentialValidator::new(&config, Arc::new(InMemoryKeySource::new(test_jwks()))).unwrap()
}

/// Encodes claims with the given key identifier.
fn encode_with_kid(claims: &Claims, kid: &str) -> String {
    let mut header = Header::new(jsonwebtoken::Algorithm::HS256);
    header.kid = Some(kid.to_string());
    jsonwebtoken::encode(&header, claims, &EncodingKey::from_secret(SECRET)).unwrap()
}

/// Encodes claims with the advertised test key.
fn encode(claims: &Claims) -> String {
    encode_with_kid(claims, KID)
}

#[tokio::test]
async fn valid_token_yields_identity() {
    let token = encode(&Claims::valid(&["analyst", "viewer"]));
    let identity = validator().validate(&token).await.unwrap();
    assert_eq!(identity.subject, "user-42");
    assert_eq!(identity.name.as_deref(), Some("Avery Analyst"));
    assert_eq!(identity.email.as_deref(), Some("avery@example.com"));
    assert_eq!(identity.roles, vec!["analyst".to_string(), "viewer".to_string()]);
    assert!(identity.expires_at.is_some());
}

#[tokio::test]
async fn subject_falls_back_to_sub_claim() {
    let mut claims = Claims::valid(&[]);
    claims.oid = None;
    let identity = validator().validate(&encode(&claims)).await.unwrap();
    assert_eq!(identity.subject, "subject-42");
}

#[tokio::test]
async fn expired_token_is_rejected() {
    let mut claims = Claims::valid(&[]);
    claims.exp = now_seconds() - 7_200;
    let err = validator().validate(&encode(&claims)).await.unwrap_err();
    assert!(matches!(err, AuthError::Expired));
}

#[tokio::test]
async fn audience_mismatch_is_rejected() {
    let mut claims = Claims::valid(&[]);
    claims.aud = "api://another-service".to_string();
    let err = validator().validate(&encode(&claims)).await.unwrap_err();
    assert!(matches!(err, AuthError::AudienceMismatch));
}

#[tokio::test]
async fn issuer_mismatch_is_rejected() {
    let mut claims = Claims::valid(&[]);
    claims.iss = "https://rogue.example.com/v2.0".to_string();
    let err = validator().validate(&encode(&claims)).await.unwrap_err();
    assert!(matches!(err, AuthError::IssuerMismatch));
}

#[tokio::test]
async fn unknown_signing_key_is_rejected() {
    let token = encode_with_kid(&Claims::valid(&[]), "rotated-away");
    let err = validator().validate(&token).await.unwrap_err();
    assert!(matches!(err, AuthError::InvalidToken(_)));
}

#[tokio::test]
async fn malformed_token_is_rejected() {
    let err = validator().validate("not-a-token").await.unwrap_err();
    assert!(matches!(err, AuthError::InvalidToken(_)));
}

#[test]
fn bearer_header_parsing() {
    assert_eq!(parse_bearer_header("Bearer abc.def.ghi").unwrap(), "abc.def.ghi");
    assert_eq!(parse_bearer_header("bearer token-1").unwrap(), "token-1");
    assert!(parse_bearer_header("Basic dXNlcg==").is_err());
    assert!(parse_bearer_header("Bearer ").is_err());
    assert!(parse_bearer_header("").is_err());
}

#[test]
fn caller_facing_message_is_generic() {
    assert_eq!(AuthError::public_message(), "invalid authentication credentials");
}

#[test]
fn token_fingerprints_are_stable_and_redacting() {
    let first = agent_relay_identity::token_fingerprint("token-value");
    let second = agent_relay_identity::token_fingerprint("token-value");
    assert_eq!(first, second);
    assert_eq!(first.len(), 64);
    assert!(!first.contains("token"));
    assert_ne!(first, agent_relay_identity::token_fingerprint("other-token"));
}
