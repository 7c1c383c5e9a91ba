// crates/agent-relay-core/src/policy.rs
// ============================================================================
// Module: Authorization Policy
// Description: Role-based agent access control for the relay.
// Purpose: Gate every routing decision behind an explicit policy table.
// Dependencies: crate::agent, crate::identity, thiserror
// ============================================================================

//! ## Overview
//! The access policy maps role names to the set of agents a caller may invoke
//! plus coarse capability flags. Administrators bypass the table entirely.
//! Callers holding no recognized role are denied unless the explicit
//! `allow_any_authenticated` fallback is enabled; that knob effectively
//! disables per-agent gating and ships off by default.
//!
//! ## Invariants
//! - Decisions are deterministic for identical inputs.
//! - The policy only sees concrete agents; [`AgentKind::Auto`] is resolved by
//!   selection before the gate runs and is never a member of any allowed set.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use thiserror::Error;

use crate::agent::AgentKind;
use crate::identity::CallerIdentity;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Role name granted unconditional access to every agent.
pub const ADMIN_ROLE: &str = "admin";

// ============================================================================
// SECTION: Types
// ============================================================================

/// Permissions attached to one role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolePermissions {
    /// Agents this role may invoke.
    pub agents: BTreeSet<AgentKind>,
    /// Whether the role may read audit logs.
    pub can_access_audit_logs: bool,
    /// Whether the role may manage agent registrations.
    pub can_manage_agents: bool,
}

/// Caller privilege level in a fixed total order, used for audit labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RoleLevel {
    /// Administrator: unconditional access.
    Admin,
    /// Analyst: data-analysis access.
    Analyst,
    /// Standard user: payroll access.
    User,
    /// Viewer: no agent access by default.
    Viewer,
    /// Authenticated caller holding no recognized role.
    AuthenticatedNoRole,
}

impl RoleLevel {
    /// Returns a stable label for the level.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Analyst => "analyst",
            Self::User => "user",
            Self::Viewer => "viewer",
            Self::AuthenticatedNoRole => "authenticated_no_role",
        }
    }
}

/// Access denial describing the caller's roles and the refused agent.
#[derive(Debug, Clone, Error)]
#[error("roles {roles:?} do not grant access to the {agent} agent")]
pub struct AccessDenied {
    /// Roles held by the caller at denial time.
    pub roles: Vec<String>,
    /// Agent the caller attempted to reach.
    pub agent: AgentKind,
}

// ============================================================================
// SECTION: Policy
// ============================================================================

/// Role-based agent access policy.
///
/// # Invariants
/// - The table is fixed after construction; evaluation has no side effects.
/// - `allow_any_authenticated` is independent of the table and must be an
///   explicit deployment decision.
#[derive(Debug, Clone)]
pub struct AccessPolicy {
    /// Role name to permissions mapping.
    table: BTreeMap<String, RolePermissions>,
    /// Grant access to authenticated callers holding no recognized role.
    allow_any_authenticated: bool,
}

impl AccessPolicy {
    /// Builds the policy with the built-in role table.
    #[must_use]
    pub fn new(allow_any_authenticated: bool) -> Self {
        Self {
            table: default_role_table(),
            allow_any_authenticated,
        }
    }

    /// Builds the policy from an explicit role table.
    #[must_use]
    pub const fn with_table(
        table: BTreeMap<String, RolePermissions>,
        allow_any_authenticated: bool,
    ) -> Self {
        Self {
            table,
            allow_any_authenticated,
        }
    }

    /// Returns whether the unrecognized-role fallback is enabled.
    #[must_use]
    pub const fn allows_any_authenticated(&self) -> bool {
        self.allow_any_authenticated
    }

    /// Returns true when the caller may invoke the given agent.
    #[must_use]
    pub fn can_access(&self, identity: &CallerIdentity, agent: AgentKind) -> bool {
        if identity.has_role(ADMIN_ROLE) {
            return true;
        }
        for role in &identity.roles {
            if let Some(permissions) = self.table.get(role)
                && permissions.agents.contains(&agent)
            {
                return true;
            }
        }
        self.allow_any_authenticated
    }

    /// Requires access to the given agent, failing closed on denial.
    ///
    /// # Errors
    ///
    /// Returns [`AccessDenied`] carrying the caller's roles and the refused
    /// agent when the policy does not grant access.
    pub fn require_access(
        &self,
        identity: &CallerIdentity,
        agent: AgentKind,
    ) -> Result<(), AccessDenied> {
        if self.can_access(identity, agent) {
            return Ok(());
        }
        Err(AccessDenied {
            roles: identity.roles.clone(),
            agent,
        })
    }

    /// Returns true when the caller holds any role present in the table.
    #[must_use]
    pub fn has_special_role(&self, identity: &CallerIdentity) -> bool {
        identity.roles.iter().any(|role| self.table.contains_key(role))
    }

    /// Returns the caller's highest-priority role level.
    #[must_use]
    pub fn role_level(&self, identity: &CallerIdentity) -> RoleLevel {
        if identity.has_role(ADMIN_ROLE) {
            RoleLevel::Admin
        } else if identity.has_role("analyst") {
            RoleLevel::Analyst
        } else if identity.has_role("user") {
            RoleLevel::User
        } else if identity.has_role("viewer") {
            RoleLevel::Viewer
        } else {
            RoleLevel::AuthenticatedNoRole
        }
    }

    /// Returns the set of agents the caller's roles grant access to.
    ///
    /// The `allow_any_authenticated` fallback is intentionally excluded: the
    /// result reflects the role table only.
    #[must_use]
    pub fn allowed_agents(&self, identity: &CallerIdentity) -> BTreeSet<AgentKind> {
        let mut allowed = BTreeSet::new();
        for role in &identity.roles {
            if let Some(permissions) = self.table.get(role) {
                allowed.extend(permissions.agents.iter().copied());
            }
        }
        allowed
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Builds the built-in role table.
fn default_role_table() -> BTreeMap<String, RolePermissions> {
    let mut table = BTreeMap::new();
    table.insert(
        ADMIN_ROLE.to_string(),
        RolePermissions {
            agents: BTreeSet::from([AgentKind::Python, AgentKind::Dotnet]),
            can_access_audit_logs: true,
            can_manage_agents: true,
        },
    );
    table.insert(
        "analyst".to_string(),
        RolePermissions {
            agents: BTreeSet::from([AgentKind::Python]),
            can_access_audit_logs: false,
            can_manage_agents: false,
        },
    );
    table.insert(
        "user".to_string(),
        RolePermissions {
            agents: BTreeSet::from([AgentKind::Dotnet]),
            can_access_audit_logs: false,
            can_manage_agents: false,
        },
    );
    table.insert(
        "viewer".to_string(),
        RolePermissions {
            agents: BTreeSet::new(),
            can_access_audit_logs: false,
            can_manage_agents: false,
        },
    );
    table
}
