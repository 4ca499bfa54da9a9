//! Session store — the source of truth for active sessions.
//!
//! Every instance talks to the same logical store. Each key has a single
//! authoritative slot, so `touch` and the sweeper's expiry check for one
//! session are linearizable; nothing is promised across keys.
//!
//! Expiry is part of visibility: a session idle for longer than the store's
//! TTL is reported as absent by every read even before a sweep reclaims it.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::time::Duration;

use visitrack_core::{Metadata, Session, SessionId};

use crate::error::StoreError;

/// Metadata key under which `add` records the user agent.
pub const USER_AGENT_KEY: &str = "user_agent";

pub trait SessionStore: Send + Sync {
    /// Insert a new session and return its fresh id.
    ///
    /// Does not enforce capacity; that is the caller's admission policy.
    fn add(
        &self,
        ip: &str,
        user_agent: &str,
        metadata: Metadata,
        instance_id: &str,
    ) -> Result<SessionId, StoreError>;

    /// Delete a session. Returns whether anything was deleted.
    fn remove(&self, id: &SessionId) -> Result<bool, StoreError>;

    /// Heartbeat: set `last_seen_at = now` if the session is live.
    fn touch(&self, id: &SessionId) -> Result<bool, StoreError>;

    fn get(&self, id: &SessionId) -> Result<Option<Session>, StoreError>;

    /// Snapshot of live sessions in insertion order.
    fn list_active(&self) -> Result<Vec<Session>, StoreError>;

    fn count_for_instance(&self, instance_id: &str) -> Result<usize, StoreError>;

    fn count_total(&self) -> Result<usize, StoreError>;

    /// Remove and return every session idle for longer than the TTL the
    /// store was opened with, the same TTL that hides lapsed sessions from
    /// the reads above.
    fn sweep_expired(&self) -> Result<Vec<Session>, StoreError>;
}

/// Fold the user agent into caller metadata without overriding it.
pub(crate) fn with_user_agent(mut metadata: Metadata, user_agent: &str) -> Metadata {
    metadata
        .entry(USER_AGENT_KEY.to_string())
        .or_insert_with(|| serde_json::Value::String(user_agent.to_string()));
    metadata
}

pub(crate) fn ttl_millis(ttl: Duration) -> u64 {
    ttl.as_millis() as u64
}
