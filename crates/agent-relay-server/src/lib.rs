// crates/agent-relay-server/src/lib.rs
// ============================================================================
// Module: Agent Relay Server Library
// Description: HTTP boundary and request orchestration for the relay.
// Purpose: Expose the pipeline, session map, oracle adapter, and server.
// Dependencies: crate::{oracle, pipeline, server, session}
// ============================================================================

//! ## Overview
//! This crate composes the relay: per-request orchestration through the
//! validate, select, authorize, exchange, and dispatch stages; the bounded
//! conversation session map; the subprocess routing-oracle adapter; and the
//! axum HTTP boundary that maps orchestration failures onto 401/403/500 while
//! embedding downstream failures in 200 responses.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod oracle;
pub mod pipeline;
pub mod server;
pub mod session;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use oracle::CliRouteOracle;
pub use pipeline::PipelineError;
pub use pipeline::PipelineParts;
pub use pipeline::RelayPipeline;
pub use server::RelayServer;
pub use server::ServerError;
pub use session::SessionMap;
