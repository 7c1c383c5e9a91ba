// crates/agent-relay-identity/src/exchange.rs
// ============================================================================
// Module: Delegated Exchange
// Description: On-behalf-of token exchange against the identity provider.
// Purpose: Swap a caller token for a narrowly-scoped downstream credential.
// Dependencies: agent-relay-config, async-trait, reqwest, serde
// ============================================================================

//! ## Overview
//! The exchange service presents the caller's verified token to the identity
//! provider's token endpoint with the confidential-client registration and
//! receives a new credential scoped to one downstream agent while still
//! asserting the original caller's identity. A missing registration fails
//! fast with [`ExchangeError::NotConfigured`] instead of silently bypassing
//! the exchange, and a failed exchange is terminal for the request: no retry
//! is attempted here.
//!
//! ## Invariants
//! - The issued credential records the inbound caller as its subject.
//! - Granted scopes never exceed the requested scope list.
//! - The raw token value is excluded from `Debug` output and audit events.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::time::Duration;

use agent_relay_config::IdentityConfig;
use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// OAuth grant type for the on-behalf-of assertion.
const OBO_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Requested token use marker for the on-behalf-of flow.
const OBO_TOKEN_USE: &str = "on_behalf_of";

/// Timeout applied to token endpoint round trips.
const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// SECTION: Credential
// ============================================================================

/// Delegated credential for one downstream call.
///
/// # Invariants
/// - `subject` is the inbound caller the credential asserts.
/// - The token value is only reachable through [`DelegatedCredential::token`]
///   and never appears in `Debug` output.
#[derive(Clone)]
pub struct DelegatedCredential {
    /// Opaque bearer value.
    token: String,
    /// Scopes the credential was granted.
    scopes: Vec<String>,
    /// Subject identifier the credential asserts.
    subject: String,
}

impl DelegatedCredential {
    /// Builds a credential from its parts.
    #[must_use]
    pub const fn new(token: String, scopes: Vec<String>, subject: String) -> Self {
        Self {
            token,
            scopes,
            subject,
        }
    }

    /// Returns the bearer value for attachment to one outbound call.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Returns the granted scopes.
    #[must_use]
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    /// Returns the subject the credential asserts.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }
}

impl fmt::Debug for DelegatedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelegatedCredential")
            .field("token", &"<redacted>")
            .field("scopes", &self.scopes)
            .field("subject", &self.subject)
            .finish()
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Delegated exchange errors.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// No confidential-client registration is configured.
    #[error("delegated exchange not configured")]
    NotConfigured,
    /// The identity provider rejected the exchange.
    #[error("identity provider rejected exchange: {reason}")]
    ProviderRejected {
        /// Structured reason for audit records.
        reason: String,
    },
    /// The token endpoint could not be reached or answered malformed data.
    #[error("exchange transport error: {0}")]
    Transport(String),
}

// ============================================================================
// SECTION: Exchanger Seam
// ============================================================================

/// Delegated token exchange interface.
#[async_trait]
pub trait TokenExchanger: Send + Sync {
    /// Exchanges the caller token for a credential scoped to `target_scopes`.
    ///
    /// # Errors
    ///
    /// Returns [`ExchangeError`]; failures are terminal for the request.
    async fn exchange(
        &self,
        caller_token: &str,
        subject: &str,
        target_scopes: &[String],
    ) -> Result<DelegatedCredential, ExchangeError>;
}

// ============================================================================
// SECTION: Provider Responses
// ============================================================================

/// Successful token endpoint response subset.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    /// Issued access token.
    access_token: String,
    /// Space-separated granted scopes when the provider reports them.
    scope: Option<String>,
}

/// Token endpoint error response subset.
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    /// Machine-readable error code.
    error: Option<String>,
    /// Human-readable error description.
    error_description: Option<String>,
}

// ============================================================================
// SECTION: Confidential Client
// ============================================================================

/// Confidential-client registration used for the exchange.
struct ConfidentialClient {
    /// Token endpoint derived from the authority.
    token_endpoint: String,
    /// Registered client identifier.
    client_id: String,
    /// Registered client secret.
    client_secret: String,
}

/// On-behalf-of exchanger backed by the identity provider token endpoint.
///
/// Construction never fails: an incomplete registration produces an exchanger
/// whose every call fails fast with [`ExchangeError::NotConfigured`], keeping
/// the misconfiguration visible at request time rather than silently skipping
/// the exchange.
pub struct OboExchanger {
    /// HTTP client for token endpoint calls.
    http: reqwest::Client,
    /// Registration, present only when fully configured.
    client: Option<ConfidentialClient>,
}

impl OboExchanger {
    /// Builds an exchanger from identity configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ExchangeError::Transport`] when the HTTP client cannot be
    /// constructed.
    pub fn from_config(config: &IdentityConfig) -> Result<Self, ExchangeError> {
        let http = reqwest::Client::builder()
            .timeout(EXCHANGE_TIMEOUT)
            .build()
            .map_err(|err| ExchangeError::Transport(err.to_string()))?;
        let configured = !config.client_id.trim().is_empty()
            && !config.client_secret.trim().is_empty()
            && !config.authority.trim().is_empty();
        let client = configured.then(|| ConfidentialClient {
            token_endpoint: token_endpoint(&config.authority),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
        });
        Ok(Self {
            http,
            client,
        })
    }

    /// Returns true when a complete registration is present.
    #[must_use]
    pub const fn is_configured(&self) -> bool {
        self.client.is_some()
    }
}

#[async_trait]
impl TokenExchanger for OboExchanger {
    async fn exchange(
        &self,
        caller_token: &str,
        subject: &str,
        target_scopes: &[String],
    ) -> Result<DelegatedCredential, ExchangeError> {
        let Some(client) = &self.client else {
            return Err(ExchangeError::NotConfigured);
        };

        let scope = target_scopes.join(" ");
        let form = [
            ("grant_type", OBO_GRANT_TYPE),
            ("client_id", client.client_id.as_str()),
            ("client_secret", client.client_secret.as_str()),
            ("assertion", caller_token),
            ("scope", scope.as_str()),
            ("requested_token_use", OBO_TOKEN_USE),
        ];

        let response = self
            .http
            .post(&client.token_endpoint)
            .form(&form)
            .send()
            .await
            .map_err(|err| ExchangeError::Transport(err.to_string()))?;

        if !response.status().is_success() {
            let rejection: TokenErrorResponse = response
                .json()
                .await
                .map_err(|err| ExchangeError::Transport(err.to_string()))?;
            let reason = rejection
                .error_description
                .or(rejection.error)
                .unwrap_or_else(|| "unknown provider error".to_string());
            return Err(ExchangeError::ProviderRejected {
                reason,
            });
        }

        let issued: TokenResponse = response
            .json()
            .await
            .map_err(|err| ExchangeError::Transport(err.to_string()))?;
        Ok(DelegatedCredential::new(
            issued.access_token,
            narrow_scopes(issued.scope.as_deref(), target_scopes),
            subject.to_string(),
        ))
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns the token endpoint for an authority URL.
fn token_endpoint(authority: &str) -> String {
    format!("{}/oauth2/v2.0/token", authority.trim_end_matches('/'))
}

/// Restricts granted scopes to the requested list.
///
/// Providers may echo extra scopes; the credential records only the
/// intersection so the exchange can never widen access.
fn narrow_scopes(granted: Option<&str>, requested: &[String]) -> Vec<String> {
    granted.map_or_else(
        || requested.to_vec(),
        |granted| {
            granted
                .split_whitespace()
                .filter(|scope| requested.iter().any(|req| req == scope))
                .map(ToString::to_string)
                .collect()
        },
    )
}
