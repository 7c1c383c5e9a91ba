// crates/agent-relay-identity/src/validator.rs
// ============================================================================
// Module: Credential Validator
// Description: Inbound bearer token verification against the identity provider.
// Purpose: Produce a verified caller identity or fail closed.
// Dependencies: agent-relay-config, agent-relay-core, jsonwebtoken, reqwest
// ============================================================================

//! ## Overview
//! The validator verifies an inbound bearer token's signature, audience, and
//! issuer, then extracts the caller identity from its claims. Signing keys
//! come through the [`KeySource`] seam: the production source follows the
//! issuer's discovery document to its JWKS endpoint and caches the key set
//! for the process lifetime (explicit invalidation only); an in-memory source
//! serves tests. Verification failures keep their detail for operator-facing
//! audit records while callers receive [`AuthError::public_message`].
//!
//! ## Invariants
//! - Tokens without a resolvable `kid` fail closed.
//! - Audience and issuer checks are always enforced; there is no permissive
//!   verification mode.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::RwLock;
use std::time::Duration;

use agent_relay_config::IdentityConfig;
use agent_relay_core::CallerIdentity;
use async_trait::async_trait;
use jsonwebtoken::Algorithm;
use jsonwebtoken::DecodingKey;
use jsonwebtoken::Validation;
use jsonwebtoken::decode;
use jsonwebtoken::decode_header;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::jwk::Jwk;
use jsonwebtoken::jwk::JwkSet;
use serde::Deserialize;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum accepted Authorization header size in bytes.
const MAX_AUTH_HEADER_BYTES: usize = 8 * 1024;

/// Timeout applied to discovery and JWKS fetches.
const KEY_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Credential validation errors.
///
/// Variants keep provider detail for audit records; the HTTP boundary maps
/// every variant to the same generic caller-facing message.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The token is malformed or its signature does not verify.
    #[error("invalid token: {0}")]
    InvalidToken(String),
    /// The token is expired.
    #[error("token expired")]
    Expired,
    /// The `aud` claim does not match the configured audience.
    #[error("token audience mismatch")]
    AudienceMismatch,
    /// The `iss` claim does not match the configured issuer.
    #[error("token issuer mismatch")]
    IssuerMismatch,
    /// The signing-key source could not be reached or parsed.
    #[error("signing key source unavailable: {0}")]
    KeySourceUnavailable(String),
    /// The identity provider section is incomplete.
    #[error("identity provider not configured: {0}")]
    NotConfigured(String),
}

impl AuthError {
    /// Generic message returned to callers regardless of the failure detail.
    #[must_use]
    pub const fn public_message() -> &'static str {
        "invalid authentication credentials"
    }
}

// ============================================================================
// SECTION: Key Source Seam
// ============================================================================

/// Source of the issuer's signing keys.
#[async_trait]
pub trait KeySource: Send + Sync {
    /// Returns the current signing key set.
    async fn signing_keys(&self) -> Result<JwkSet, AuthError>;

    /// Drops any cached key set so the next fetch hits the source.
    fn invalidate(&self) {}
}

/// Key source that follows OIDC discovery to the issuer's JWKS endpoint.
///
/// # Invariants
/// - The fetched key set is cached for the process lifetime; only
///   [`KeySource::invalidate`] forces a refetch.
pub struct DiscoveryKeySource {
    /// HTTP client for discovery and JWKS fetches.
    http: reqwest::Client,
    /// Identity provider authority URL (tenant root).
    authority: String,
    /// Cached key set shared across in-flight requests.
    cache: RwLock<Option<JwkSet>>,
}

/// Discovery document subset the validator needs.
#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    /// Location of the issuer's JWKS endpoint.
    jwks_uri: String,
}

impl DiscoveryKeySource {
    /// Builds a discovery-backed key source for the given authority.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::NotConfigured`] when the authority is empty or
    /// the HTTP client cannot be constructed.
    pub fn new(authority: &str) -> Result<Self, AuthError> {
        if authority.trim().is_empty() {
            return Err(AuthError::NotConfigured("identity authority is empty".to_string()));
        }
        let http = reqwest::Client::builder()
            .timeout(KEY_FETCH_TIMEOUT)
            .build()
            .map_err(|err| AuthError::KeySourceUnavailable(err.to_string()))?;
        Ok(Self {
            http,
            authority: authority.trim_end_matches('/').to_string(),
            cache: RwLock::new(None),
        })
    }

    /// Returns the discovery document URL for the configured authority.
    #[must_use]
    pub fn discovery_url(&self) -> String {
        format!("{}/v2.0/.well-known/openid-configuration", self.authority)
    }

    /// Fetches the key set from the issuer, bypassing the cache.
    async fn fetch_keys(&self) -> Result<JwkSet, AuthError> {
        let discovery: DiscoveryDocument = self
            .http
            .get(self.discovery_url())
            .send()
            .await
            .map_err(|err| AuthError::KeySourceUnavailable(err.to_string()))?
            .error_for_status()
            .map_err(|err| AuthError::KeySourceUnavailable(err.to_string()))?
            .json()
            .await
            .map_err(|err| AuthError::KeySourceUnavailable(err.to_string()))?;
        self.http
            .get(&discovery.jwks_uri)
            .send()
            .await
            .map_err(|err| AuthError::KeySourceUnavailable(err.to_string()))?
            .error_for_status()
            .map_err(|err| AuthError::KeySourceUnavailable(err.to_string()))?
            .json()
            .await
            .map_err(|err| AuthError::KeySourceUnavailable(err.to_string()))
    }
}

#[async_trait]
impl KeySource for DiscoveryKeySource {
    async fn signing_keys(&self) -> Result<JwkSet, AuthError> {
        if let Ok(cache) = self.cache.read()
            && let Some(keys) = cache.as_ref()
        {
            return Ok(keys.clone());
        }
        let keys = self.fetch_keys().await?;
        if let Ok(mut cache) = self.cache.write() {
            *cache = Some(keys.clone());
        }
        Ok(keys)
    }

    fn invalidate(&self) {
        if let Ok(mut cache) = self.cache.write() {
            *cache = None;
        }
    }
}

/// Fixed key source for tests and offline validation.
pub struct InMemoryKeySource {
    /// Key set returned on every fetch.
    keys: JwkSet,
}

impl InMemoryKeySource {
    /// Builds a key source returning the given key set.
    #[must_use]
    pub const fn new(keys: JwkSet) -> Self {
        Self {
            keys,
        }
    }
}

#[async_trait]
impl KeySource for InMemoryKeySource {
    async fn signing_keys(&self) -> Result<JwkSet, AuthError> {
        Ok(self.keys.clone())
    }
}

// ============================================================================
// SECTION: Claims
// ============================================================================

/// Claim subset extracted from a verified token.
#[derive(Debug, Deserialize)]
struct TokenClaims {
    /// Provider object identifier, preferred as the subject.
    oid: Option<String>,
    /// Standard subject claim fallback.
    sub: Option<String>,
    /// Display name.
    name: Option<String>,
    /// User principal name.
    preferred_username: Option<String>,
    /// Email claim fallback.
    email: Option<String>,
    /// Granted role strings.
    #[serde(default)]
    roles: Vec<String>,
    /// Issued-at time in seconds since the epoch.
    iat: Option<i64>,
    /// Expiry time in seconds since the epoch.
    exp: Option<i64>,
}

// ============================================================================
// SECTION: Validator
// ============================================================================

/// Inbound credential validator.
pub struct CredentialValidator {
    /// Signing key source (cached by the production implementation).
    keys: Arc<dyn KeySource>,
    /// Expected `aud` claim.
    audience: String,
    /// Expected `iss` claim.
    issuer: String,
    /// Required signature algorithm.
    algorithm: Algorithm,
}

impl CredentialValidator {
    /// Builds a validator from identity configuration and a key source.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::NotConfigured`] when the audience, issuer, or
    /// algorithm configuration is unusable.
    pub fn new(config: &IdentityConfig, keys: Arc<dyn KeySource>) -> Result<Self, AuthError> {
        if config.audience.trim().is_empty() {
            return Err(AuthError::NotConfigured("expected audience is empty".to_string()));
        }
        if config.issuer.trim().is_empty() {
            return Err(AuthError::NotConfigured("expected issuer is empty".to_string()));
        }
        let algorithm = config.algorithm.parse::<Algorithm>().map_err(|_| {
            AuthError::NotConfigured(format!("unsupported algorithm {}", config.algorithm))
        })?;
        Ok(Self {
            keys,
            audience: config.audience.clone(),
            issuer: config.issuer.clone(),
            algorithm,
        })
    }

    /// Validates a raw bearer token and extracts the caller identity.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] describing the verification failure. The detail
    /// is for operator audit records only; see [`AuthError::public_message`].
    pub async fn validate(&self, raw_token: &str) -> Result<CallerIdentity, AuthError> {
        let header = decode_header(raw_token)
            .map_err(|err| AuthError::InvalidToken(format!("malformed header: {err}")))?;
        let kid = header
            .kid
            .ok_or_else(|| AuthError::InvalidToken("token header missing kid".to_string()))?;

        let keys = self.keys.signing_keys().await?;
        let jwk = keys
            .find(&kid)
            .ok_or_else(|| AuthError::InvalidToken(format!("unknown signing key {kid}")))?;
        let decoding_key = decoding_key_for(jwk)?;

        let mut validation = Validation::new(self.algorithm);
        validation.set_audience(&[self.audience.as_str()]);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "aud", "iss"]);

        let data = decode::<TokenClaims>(raw_token, &decoding_key, &validation)
            .map_err(map_verification_error)?;
        identity_from_claims(data.claims)
    }

    /// Drops the cached key set so the next validation refetches keys.
    pub fn invalidate_keys(&self) {
        self.keys.invalidate();
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Builds a decoding key from a JWK, failing closed on unusable keys.
fn decoding_key_for(jwk: &Jwk) -> Result<DecodingKey, AuthError> {
    DecodingKey::from_jwk(jwk)
        .map_err(|err| AuthError::KeySourceUnavailable(format!("unusable signing key: {err}")))
}

/// Maps library verification errors onto the validator taxonomy.
fn map_verification_error(err: jsonwebtoken::errors::Error) -> AuthError {
    match err.kind() {
        ErrorKind::ExpiredSignature => AuthError::Expired,
        ErrorKind::InvalidAudience => AuthError::AudienceMismatch,
        ErrorKind::InvalidIssuer => AuthError::IssuerMismatch,
        _ => AuthError::InvalidToken(err.to_string()),
    }
}

/// Builds a caller identity from verified claims.
fn identity_from_claims(claims: TokenClaims) -> Result<CallerIdentity, AuthError> {
    let subject = claims
        .oid
        .or(claims.sub)
        .ok_or_else(|| AuthError::InvalidToken("token missing subject claim".to_string()))?;
    Ok(CallerIdentity {
        subject,
        name: claims.name,
        email: claims.preferred_username.or(claims.email),
        roles: claims.roles,
        issued_at: claims.iat,
        expires_at: claims.exp,
    })
}

/// Returns a hex SHA-256 fingerprint of a token for audit records.
///
/// Audit events never carry token values; the fingerprint lets operators
/// correlate requests made with the same credential.
#[must_use]
pub fn token_fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    let mut rendered = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(rendered, "{byte:02x}");
    }
    rendered
}

/// Extracts the bearer token from an Authorization header value.
///
/// # Errors
///
/// Returns [`AuthError::InvalidToken`] for oversized headers, non-bearer
/// schemes, and empty tokens.
pub fn parse_bearer_header(header: &str) -> Result<String, AuthError> {
    if header.len() > MAX_AUTH_HEADER_BYTES {
        return Err(AuthError::InvalidToken("authorization header too large".to_string()));
    }
    let mut parts = header.trim().splitn(2, ' ');
    let scheme = parts.next().unwrap_or_default();
    let token = parts.next().unwrap_or_default().trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return Err(AuthError::InvalidToken("invalid authorization header".to_string()));
    }
    Ok(token.to_string())
}
