// crates/agent-relay-server/src/oracle.rs
// ============================================================================
// Module: Routing Oracle Adapter
// Description: Subprocess-backed classifier for intelligent agent routing.
// Purpose: Bound an external CLI oracle behind the narrow classify seam.
// Dependencies: agent-relay-config, agent-relay-core, serde_json, tokio
// ============================================================================

//! ## Overview
//! The CLI oracle feeds a routing prompt to an external command on stdin and
//! expects a JSON object whose `result` field names exactly one agent. Every
//! failure mode (spawn error, non-zero exit, malformed output, an answer
//! naming both agents or neither, or exceeding the configured timeout) yields
//! `None`, which degrades routing to the deterministic keyword path. The
//! child process is killed when the timeout abandons it.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::process::Stdio;
use std::time::Duration;

use agent_relay_config::RoutingConfig;
use agent_relay_core::AgentKind;
use agent_relay_core::RouteOracle;
use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

// ============================================================================
// SECTION: Prompt
// ============================================================================

/// Builds the routing prompt for a caller message.
fn routing_prompt(message: &str) -> String {
    format!(
        "You are a routing classifier for a multi-agent system.\n\
         Agents:\n\
         1. dotnet - payroll specialist: payroll, PTO and vacation balances, \
         employee details, benefits.\n\
         2. python - general-purpose specialist: programming, data analysis, \
         and everything not payroll-related.\n\
         \n\
         User message: \"{message}\"\n\
         \n\
         Respond with ONLY ONE WORD, either \"dotnet\" or \"python\"."
    )
}

// ============================================================================
// SECTION: Adapter
// ============================================================================

/// Subprocess-backed routing oracle.
pub struct CliRouteOracle {
    /// Oracle command line (program followed by arguments).
    command: Vec<String>,
    /// Invocation timeout.
    timeout: Duration,
}

impl CliRouteOracle {
    /// Builds the oracle from routing configuration.
    ///
    /// Returns `None` when the oracle is disabled or no command is set, so
    /// the selector falls back to keyword routing.
    #[must_use]
    pub fn from_config(routing: &RoutingConfig) -> Option<Self> {
        if !routing.oracle_enabled || routing.oracle_command.is_empty() {
            return None;
        }
        Some(Self {
            command: routing.oracle_command.clone(),
            timeout: Duration::from_millis(routing.oracle_timeout_ms),
        })
    }

    /// Builds the oracle from an explicit command and timeout.
    #[must_use]
    pub fn new(command: Vec<String>, timeout: Duration) -> Self {
        Self {
            command,
            timeout,
        }
    }
}

#[async_trait]
impl RouteOracle for CliRouteOracle {
    async fn classify(&self, message: &str) -> Option<AgentKind> {
        let (program, args) = self.command.split_first()?;
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .ok()?;
        let mut stdin = child.stdin.take()?;
        let prompt = routing_prompt(message);
        let work = async move {
            if stdin.write_all(prompt.as_bytes()).await.is_err() {
                return None;
            }
            drop(stdin);
            let output = child.wait_with_output().await.ok()?;
            if !output.status.success() {
                return None;
            }
            parse_oracle_output(&output.stdout)
        };
        tokio::time::timeout(self.timeout, work).await.unwrap_or(None)
    }
}

// ============================================================================
// SECTION: Parsing
// ============================================================================

/// Parses oracle stdout into an unambiguous agent label.
fn parse_oracle_output(stdout: &[u8]) -> Option<AgentKind> {
    let payload: Value = serde_json::from_slice(stdout).ok()?;
    let result = payload.get("result")?.as_str()?.trim().to_lowercase();
    let names_dotnet = result.contains("dotnet");
    let names_python = result.contains("python");
    match (names_dotnet, names_python) {
        (true, false) => Some(AgentKind::Dotnet),
        (false, true) => Some(AgentKind::Python),
        // Empty, unknown, or double-named answers are ambiguous.
        _ => None,
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
