// crates/agent-relay-dispatch/src/lib.rs
// ============================================================================
// Module: Agent Relay Dispatch Library
// Description: Downstream agent HTTP client for the relay.
// Purpose: Expose dispatch and health probing with in-band error mapping.
// Dependencies: crate::client
// ============================================================================

//! ## Overview
//! Outbound calls to backend agents live here. The client owns the downstream
//! contract: `POST {base}/agent` with the relay payload and an optional
//! delegated bearer credential, and `GET {base}/health` for liveness. All
//! failures are converted into in-band error responses.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod client;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use client::AGENT_CALL_PATH;
pub use client::AGENT_HEALTH_PATH;
pub use client::AUTH_MODE_DELEGATED;
pub use client::AUTH_MODE_TESTING;
pub use client::AgentClient;
pub use client::DispatchSetupError;
