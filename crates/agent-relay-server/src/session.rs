// crates/agent-relay-server/src/session.rs
// ============================================================================
// Module: Conversation Sessions
// Description: Bounded conversation-to-thread mapping for agent continuity.
// Purpose: Reuse downstream thread handles without unbounded growth.
// Dependencies: lru
// ============================================================================

//! ## Overview
//! Backend agents keep per-conversation threads; the relay maps each
//! conversation identifier to a stable thread handle created on the first
//! message and reused afterwards. The map is bounded two ways: a
//! least-recently-used capacity limit and a per-entry time-to-live, so idle
//! conversations age out instead of accumulating for the process lifetime.
//!
//! ## Invariants
//! - Lookups for a live entry refresh its recency and TTL.
//! - Expired entries are dropped lazily on access.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use lru::LruCache;

// ============================================================================
// SECTION: Types
// ============================================================================

/// One tracked conversation.
struct SessionEntry {
    /// Downstream thread handle for the conversation.
    thread_id: String,
    /// Last access time used for TTL checks.
    refreshed: Instant,
}

/// Bounded conversation-to-thread map.
pub struct SessionMap {
    /// LRU-bounded entries keyed by conversation identifier.
    inner: Mutex<LruCache<String, SessionEntry>>,
    /// Per-entry time-to-live.
    ttl: Duration,
    /// Monotonic counter for fresh thread handles.
    counter: AtomicU64,
}

impl SessionMap {
    /// Builds a map with the given capacity and time-to-live.
    ///
    /// A zero capacity is clamped to one entry.
    #[must_use]
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let bounded = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(bounded)),
            ttl,
            counter: AtomicU64::new(0),
        }
    }

    /// Returns the thread handle for a conversation, creating one if needed.
    ///
    /// Expired entries are replaced with a fresh handle.
    pub fn thread_for(&self, conversation_id: &str) -> String {
        let Ok(mut cache) = self.inner.lock() else {
            // A poisoned lock falls back to an uncached handle.
            return self.fresh_thread_id();
        };
        if let Some(entry) = cache.get_mut(conversation_id) {
            if entry.refreshed.elapsed() < self.ttl {
                entry.refreshed = Instant::now();
                return entry.thread_id.clone();
            }
            cache.pop(conversation_id);
        }
        let thread_id = self.fresh_thread_id();
        cache.put(
            conversation_id.to_string(),
            SessionEntry {
                thread_id: thread_id.clone(),
                refreshed: Instant::now(),
            },
        );
        thread_id
    }

    /// Returns the number of tracked conversations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().map(|cache| cache.len()).unwrap_or_default()
    }

    /// Returns true when no conversations are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Allocates a new thread handle.
    fn fresh_thread_id(&self) -> String {
        let serial = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("thread-{serial}")
    }
}
