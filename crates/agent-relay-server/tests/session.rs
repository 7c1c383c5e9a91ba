// crates/agent-relay-server/tests/session.rs
// ============================================================================
// Module: Session Map Tests
// Description: Unit tests for the bounded conversation session map.
// Purpose: Validate handle reuse, LRU eviction, and TTL expiry.
// Dependencies: agent-relay-server
// ============================================================================

//! Conversation session map tests.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions use unwrap for clarity."
)]

use std::time::Duration;

use agent_relay_server::SessionMap;

#[test]
fn first_message_creates_then_reuses_handle() {
    let sessions = SessionMap::new(16, Duration::from_secs(60));
    assert!(sessions.is_empty());
    let first = sessions.thread_for("conv-1");
    let again = sessions.thread_for("conv-1");
    assert_eq!(first, again);
    assert_eq!(sessions.len(), 1);
}

#[test]
fn distinct_conversations_get_distinct_handles() {
    let sessions = SessionMap::new(16, Duration::from_secs(60));
    let first = sessions.thread_for("conv-1");
    let second = sessions.thread_for("conv-2");
    assert_ne!(first, second);
    assert_eq!(sessions.len(), 2);
}

#[test]
fn capacity_bound_evicts_least_recently_used() {
    let sessions = SessionMap::new(2, Duration::from_secs(60));
    let first = sessions.thread_for("conv-1");
    let _second = sessions.thread_for("conv-2");
    // Touch conv-1 so conv-2 is the eviction candidate.
    assert_eq!(sessions.thread_for("conv-1"), first);
    let _third = sessions.thread_for("conv-3");
    assert_eq!(sessions.len(), 2);
    // conv-2 was evicted; a new handle is allocated on return.
    let second_again = sessions.thread_for("conv-2");
    assert_ne!(second_again, first);
    assert_eq!(sessions.len(), 2);
}

#[test]
fn expired_entries_are_replaced() {
    let sessions = SessionMap::new(16, Duration::ZERO);
    let first = sessions.thread_for("conv-1");
    let second = sessions.thread_for("conv-1");
    assert_ne!(first, second);
}

#[test]
fn zero_capacity_is_clamped_to_one() {
    let sessions = SessionMap::new(0, Duration::from_secs(60));
    let first = sessions.thread_for("conv-1");
    assert_eq!(sessions.thread_for("conv-1"), first);
    assert_eq!(sessions.len(), 1);
}
