//! Session data model.
//!
//! A `Session` is one visitor's browsing context. Its identity, address,
//! metadata and owning instance never change after creation; only
//! `last_seen_at` moves, driven by heartbeats.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Visitor metadata: sanitized headers plus classification results.
/// Values are strings or other JSON primitives.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Length in bytes of the random part of a session id.
const SESSION_ID_BYTES: usize = 16;

/// Opaque session identifier: 128 random bits, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh random id.
    pub fn generate() -> Self {
        let bytes: [u8; SESSION_ID_BYTES] = rand::random();
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A tracked visitor session as held by the session store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    /// Client address at creation time.
    pub ip: String,
    pub metadata: Metadata,
    /// Instance that created the session.
    pub instance_id: String,
    /// Unix milliseconds.
    pub created_at: u64,
    /// Unix milliseconds, refreshed by heartbeats.
    pub last_seen_at: u64,
}

impl Session {
    /// Milliseconds since the last heartbeat, as of `now`.
    pub fn idle_millis(&self, now: u64) -> u64 {
        now.saturating_sub(self.last_seen_at)
    }

    /// True once the session has been idle for longer than `ttl_millis`.
    pub fn is_expired(&self, now: u64, ttl_millis: u64) -> bool {
        self.idle_millis(now) > ttl_millis
    }

    /// Project into the record pushed to dashboards.
    pub fn to_display(&self) -> DisplayRecord {
        DisplayRecord {
            id: self.session_id.clone(),
            ip: self.ip.clone(),
            metadata: self.metadata.clone(),
            last_seen_at: self.last_seen_at,
            instance_id: self.instance_id.clone(),
        }
    }
}

/// What a dashboard sees for each session in a `sessions_update`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayRecord {
    pub id: SessionId,
    pub ip: String,
    pub metadata: Metadata,
    pub last_seen_at: u64,
    pub instance_id: String,
}
