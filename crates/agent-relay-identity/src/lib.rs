// crates/agent-relay-identity/src/lib.rs
// ============================================================================
// Module: Agent Relay Identity Library
// Description: Credential validation and delegated exchange for the relay.
// Purpose: Expose the inbound trust boundary and the on-behalf-of flow.
// Dependencies: crate::{exchange, validator}
// ============================================================================

//! ## Overview
//! This crate holds both halves of the relay's identity handling: verifying
//! the inbound caller credential and exchanging it for a narrowly-scoped
//! delegated credential for one downstream agent. Both expose trait seams
//! ([`KeySource`], [`TokenExchanger`]) so the request pipeline is testable
//! without an identity provider.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod exchange;
pub mod validator;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use exchange::DelegatedCredential;
pub use exchange::ExchangeError;
pub use exchange::OboExchanger;
pub use exchange::TokenExchanger;
pub use validator::AuthError;
pub use validator::CredentialValidator;
pub use validator::DiscoveryKeySource;
pub use validator::InMemoryKeySource;
pub use validator::KeySource;
pub use validator::parse_bearer_header;
pub use validator::token_fingerprint;
