// crates/agent-relay-core/src/routing.rs
// ============================================================================
// Module: Agent Selection
// Description: Routing rules that pick a backend agent for a message.
// Purpose: Deterministic keyword fallback with an optional oracle seam.
// Dependencies: crate::agent, async-trait
// ============================================================================

//! ## Overview
//! Selection applies three rules in order: an explicit non-auto caller
//! preference always wins; an optional external oracle is consulted next and
//! any failure or ambiguity falls through silently; keyword scoring is the
//! deterministic fallback that always succeeds. Ties, including the zero-zero
//! case, resolve to [`KEYWORD_TIE_BREAK`].
//!
//! ## Invariants
//! - The returned agent is never [`AgentKind::Auto`].
//! - Oracle failure is never surfaced to the caller; it only degrades routing
//!   to the keyword path.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;

use crate::agent::AgentKind;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Agent selected when keyword scores tie, including the zero-zero case.
pub const KEYWORD_TIE_BREAK: AgentKind = AgentKind::Python;

/// Keywords that indicate the general-purpose Python specialist.
pub const PYTHON_KEYWORDS: &[&str] = &[
    "python",
    "pandas",
    "numpy",
    "data",
    "analysis",
    "dataframe",
    "plot",
    "visualization",
    "machine learning",
    "ml",
    "fastapi",
    "django",
    "jupyter",
    "notebook",
];

/// Keywords that indicate the payroll specialist.
pub const DOTNET_KEYWORDS: &[&str] = &[
    ".net",
    "dotnet",
    "c#",
    "csharp",
    "asp.net",
    "aspnet",
    "entity framework",
    "ef core",
    "blazor",
    "xamarin",
    "maui",
    "payroll",
    "pto",
    "paid time off",
    "vacation",
    "time off",
    "employee",
    "salary",
    "benefits",
    "my info",
    "my information",
    "my manager",
    "my department",
    "hire date",
    "job title",
    "available pto",
    "how much pto",
    "pto balance",
    "upcoming time off",
];

// ============================================================================
// SECTION: Types
// ============================================================================

/// How a routing decision was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMethod {
    /// The caller named a concrete agent.
    ExplicitPreference,
    /// The external routing oracle classified the message.
    Oracle,
    /// Deterministic keyword scoring decided.
    Keyword,
}

impl SelectionMethod {
    /// Returns a stable label for the method.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ExplicitPreference => "explicit_preference",
            Self::Oracle => "oracle",
            Self::Keyword => "keyword",
        }
    }
}

/// Keyword match counts for both agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct KeywordScores {
    /// Distinct Python-list keywords present in the message.
    pub python: usize,
    /// Distinct payroll-list keywords present in the message.
    pub dotnet: usize,
}

/// Outcome of agent selection.
///
/// # Invariants
/// - `agent` is never [`AgentKind::Auto`].
/// - `scores` is present exactly when the keyword path decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingDecision {
    /// The selected concrete agent.
    pub agent: AgentKind,
    /// The rule that produced the selection.
    pub method: SelectionMethod,
    /// Keyword scores when the keyword path decided.
    pub scores: Option<KeywordScores>,
}

// ============================================================================
// SECTION: Oracle Seam
// ============================================================================

/// External routing oracle interface.
///
/// Implementations classify a message into exactly one concrete agent or
/// return `None`. Any transport failure, timeout, or ambiguous answer must be
/// reported as `None`; the oracle never aborts routing.
#[async_trait]
pub trait RouteOracle: Send + Sync {
    /// Classifies the message, or returns `None` to defer to keyword routing.
    async fn classify(&self, message: &str) -> Option<AgentKind>;
}

// ============================================================================
// SECTION: Selector
// ============================================================================

/// Agent selector applying preference, oracle, and keyword rules in order.
#[derive(Clone)]
pub struct AgentSelector {
    /// Optional external oracle consulted before keyword scoring.
    oracle: Option<Arc<dyn RouteOracle>>,
}

impl AgentSelector {
    /// Builds a selector using keyword routing only.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            oracle: None,
        }
    }

    /// Builds a selector that consults the given oracle before keywords.
    #[must_use]
    pub fn with_oracle(oracle: Arc<dyn RouteOracle>) -> Self {
        Self {
            oracle: Some(oracle),
        }
    }

    /// Selects the agent for a message, honoring an explicit preference.
    pub async fn select(&self, message: &str, preference: AgentKind) -> RoutingDecision {
        if !preference.is_auto() {
            return RoutingDecision {
                agent: preference,
                method: SelectionMethod::ExplicitPreference,
                scores: None,
            };
        }
        if let Some(oracle) = &self.oracle
            && let Some(agent) = oracle.classify(message).await
            && !agent.is_auto()
        {
            return RoutingDecision {
                agent,
                method: SelectionMethod::Oracle,
                scores: None,
            };
        }
        select_by_keywords(message)
    }
}

impl Default for AgentSelector {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// SECTION: Keyword Scoring
// ============================================================================

/// Selects an agent by keyword scoring; always succeeds.
///
/// Each keyword counts once no matter how often it occurs in the message. A
/// strict winner takes the decision; ties resolve to [`KEYWORD_TIE_BREAK`].
#[must_use]
pub fn select_by_keywords(message: &str) -> RoutingDecision {
    let lowered = message.to_lowercase();
    let scores = KeywordScores {
        python: count_matches(&lowered, PYTHON_KEYWORDS),
        dotnet: count_matches(&lowered, DOTNET_KEYWORDS),
    };
    let agent = match scores.python.cmp(&scores.dotnet) {
        Ordering::Greater => AgentKind::Python,
        Ordering::Less => AgentKind::Dotnet,
        Ordering::Equal => KEYWORD_TIE_BREAK,
    };
    RoutingDecision {
        agent,
        method: SelectionMethod::Keyword,
        scores: Some(scores),
    }
}

/// Counts distinct keywords present as substrings of the lowered message.
fn count_matches(lowered_message: &str, keywords: &[&str]) -> usize {
    keywords.iter().filter(|keyword| lowered_message.contains(*keyword)).count()
}
