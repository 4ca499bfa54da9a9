//! Broadcast engine — pushes the full active-session list to local viewers.
//!
//! Every push carries the whole list, never a diff; viewers re-render
//! wholesale and the newest update supersedes anything older. A snapshot
//! is taken when the push happens, so it may already include mutations
//! that raced with the one that triggered it.
//!
//! Delivery rides a `tokio::sync::broadcast` channel: each open connection
//! holds a receiver. A receiver that falls behind skips to newer updates,
//! which is harmless because each update is complete on its own.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use visitrack_core::DisplayRecord;

use crate::error::StoreError;
use crate::store::SessionStore;

/// One complete `sessions_update` payload.
pub type SessionsUpdate = Arc<Vec<DisplayRecord>>;

/// Updates buffered per receiver before it starts skipping.
pub const UPDATE_BUFFER: usize = 16;

pub struct BroadcastEngine {
    store: Arc<dyn SessionStore>,
    tx: broadcast::Sender<SessionsUpdate>,
    /// Membership digest of the last list pushed.
    last_digest: Mutex<Option<blake3::Hash>>,
}

impl BroadcastEngine {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        let (tx, _) = broadcast::channel(UPDATE_BUFFER);
        Self {
            store,
            tx,
            last_digest: Mutex::new(None),
        }
    }

    /// Receiver for every future update.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionsUpdate> {
        self.tx.subscribe()
    }

    /// Number of connections currently subscribed.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Current display list, without pushing it anywhere.
    pub fn snapshot(&self) -> Result<Vec<DisplayRecord>, StoreError> {
        Ok(self
            .store
            .list_active()?
            .iter()
            .map(|s| s.to_display())
            .collect())
    }

    /// Push the current list to every local connection.
    ///
    /// Returns how many receivers it reached.
    pub fn broadcast_active_sessions(&self) -> Result<usize, StoreError> {
        let records = self.snapshot()?;
        Ok(self.publish(records))
    }

    /// Push only if session membership differs from the last push.
    ///
    /// Catches sessions added or removed by other instances, which never
    /// trigger a local broadcast.
    pub fn broadcast_if_changed(&self) -> Result<bool, StoreError> {
        let records = self.snapshot()?;
        let digest = membership_digest(&records);
        if *self.last_digest.lock() == Some(digest) {
            return Ok(false);
        }
        self.publish(records);
        Ok(true)
    }

    fn publish(&self, records: Vec<DisplayRecord>) -> usize {
        let digest = membership_digest(&records);
        *self.last_digest.lock() = Some(digest);

        let count = records.len();
        // send only fails when nobody is listening.
        let reached = self.tx.send(Arc::new(records)).unwrap_or(0);
        tracing::debug!(sessions = count, receivers = reached, "sessions_update broadcast");
        reached
    }
}

/// Digest over (id, instance) pairs; heartbeats do not change it.
fn membership_digest(records: &[DisplayRecord]) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    for r in records {
        hasher.update(r.id.as_str().as_bytes());
        hasher.update(&[0]);
        hasher.update(r.instance_id.as_bytes());
        hasher.update(&[0]);
    }
    hasher.finalize()
}
