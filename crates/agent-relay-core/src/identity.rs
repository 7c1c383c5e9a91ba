// crates/agent-relay-core/src/identity.rs
// ============================================================================
// Module: Caller Identity
// Description: Verified identity attributes for one inbound request.
// Purpose: Carry subject, roles, and validity claims through the pipeline.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! A [`CallerIdentity`] is produced by the credential validator from verified
//! claims and is immutable for the lifetime of one request. It is never
//! persisted. When authentication is administratively disabled, a fixed
//! synthetic identity stands in so the rest of the pipeline stays uniform.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Verified caller identity for one request.
///
/// # Invariants
/// - Values come from verified token claims (or the synthetic test identity);
///   the pipeline never mutates them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    /// Stable subject identifier.
    pub subject: String,
    /// Display name when the token carries one.
    pub name: Option<String>,
    /// Email or user principal name when the token carries one.
    pub email: Option<String>,
    /// Role strings granted to the caller.
    pub roles: Vec<String>,
    /// Issued-at time in seconds since the epoch, when present.
    pub issued_at: Option<i64>,
    /// Expiry time in seconds since the epoch, when present.
    pub expires_at: Option<i64>,
}

impl CallerIdentity {
    /// Fixed identity substituted when authentication is disabled.
    ///
    /// Only reachable behind the `require_auth = false` configuration flag;
    /// deployed configurations keep authentication on.
    #[must_use]
    pub fn synthetic() -> Self {
        Self {
            subject: "test-user-id".to_string(),
            name: Some("Test User".to_string()),
            email: Some("test@example.com".to_string()),
            roles: Vec::new(),
            issued_at: None,
            expires_at: None,
        }
    }

    /// Returns true when the caller holds the given role.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|held| held == role)
    }

    /// Returns the display name or a stable placeholder.
    #[must_use]
    pub fn name_or_unknown(&self) -> &str {
        self.name.as_deref().unwrap_or("unknown")
    }

    /// Returns the email or a stable placeholder.
    #[must_use]
    pub fn email_or_unknown(&self) -> &str {
        self.email.as_deref().unwrap_or("unknown")
    }
}
