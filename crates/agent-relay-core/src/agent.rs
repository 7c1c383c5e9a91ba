// crates/agent-relay-core/src/agent.rs
// ============================================================================
// Module: Agent Descriptors
// Description: Closed set of backend agent identities known to the relay.
// Purpose: Provide stable labels and capability summaries for routing.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Backend agents form a closed set. `Auto` exists only as a selection-time
//! placeholder in inbound requests; every routing decision delivered to the
//! authorization gate or the dispatcher carries a concrete agent.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Agent Kind
// ============================================================================

/// Backend agent identity, or the auto-select placeholder.
///
/// # Invariants
/// - `Auto` never survives agent selection; downstream components only see
///   concrete agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    /// General-purpose specialist for programming and data-analysis work.
    Python,
    /// Payroll specialist for employee, PTO, and benefits queries.
    Dotnet,
    /// Selection-time placeholder: the relay decides.
    Auto,
}

impl AgentKind {
    /// Returns the stable wire label for the agent.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::Dotnet => "dotnet",
            Self::Auto => "auto",
        }
    }

    /// Parses a wire label into an agent kind.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "python" => Some(Self::Python),
            "dotnet" => Some(Self::Dotnet),
            "auto" => Some(Self::Auto),
            _ => None,
        }
    }

    /// Returns true for the auto-select placeholder.
    #[must_use]
    pub const fn is_auto(self) -> bool {
        matches!(self, Self::Auto)
    }

    /// Returns the concrete agents the relay can dispatch to.
    #[must_use]
    pub const fn concrete() -> [Self; 2] {
        [Self::Python, Self::Dotnet]
    }

    /// Returns a short capability summary used in status payloads.
    #[must_use]
    pub const fn capabilities(self) -> &'static str {
        match self {
            Self::Python => {
                "General-purpose specialist: data analysis, machine learning, and \
                 Python ecosystem questions."
            }
            Self::Dotnet => {
                "Payroll specialist: employee payroll information, PTO management, \
                 and benefits queries."
            }
            Self::Auto => "Auto-select based on message content.",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
