//! In-memory session store.
//!
//! A `DashMap` keyed by session id. Clones share the same map, so several
//! `Tracker`s in one process behave like instances behind one shared store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use visitrack_core::{Metadata, Session, SessionId};

use super::{ttl_millis, with_user_agent, SessionStore};
use crate::clock::Clock;
use crate::error::StoreError;

#[derive(Debug, Clone)]
struct Slot {
    /// Insertion order, used to keep snapshots stable.
    seq: u64,
    session: Session,
}

#[derive(Clone)]
pub struct MemoryStore {
    sessions: Arc<DashMap<SessionId, Slot>>,
    next_seq: Arc<AtomicU64>,
    clock: Arc<dyn Clock>,
    ttl_millis: u64,
}

impl MemoryStore {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            next_seq: Arc::new(AtomicU64::new(0)),
            clock,
            ttl_millis: ttl_millis(ttl),
        }
    }

    fn is_live(&self, slot: &Slot, now: u64) -> bool {
        !slot.session.is_expired(now, self.ttl_millis)
    }
}

impl SessionStore for MemoryStore {
    fn add(
        &self,
        ip: &str,
        user_agent: &str,
        metadata: Metadata,
        instance_id: &str,
    ) -> Result<SessionId, StoreError> {
        let now = self.clock.now_millis();
        let metadata = with_user_agent(metadata, user_agent);

        // 128-bit ids make collisions practically impossible, but the slot
        // must stay unique, so retry rather than overwrite.
        loop {
            let id = SessionId::generate();
            if let Entry::Vacant(vacant) = self.sessions.entry(id.clone()) {
                vacant.insert(Slot {
                    seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
                    session: Session {
                        session_id: id.clone(),
                        ip: ip.to_string(),
                        metadata,
                        instance_id: instance_id.to_string(),
                        created_at: now,
                        last_seen_at: now,
                    },
                });
                return Ok(id);
            }
        }
    }

    fn remove(&self, id: &SessionId) -> Result<bool, StoreError> {
        let now = self.clock.now_millis();
        Ok(self
            .sessions
            .remove(id)
            .map(|(_, slot)| self.is_live(&slot, now))
            .unwrap_or(false))
    }

    fn touch(&self, id: &SessionId) -> Result<bool, StoreError> {
        let now = self.clock.now_millis();
        match self.sessions.get_mut(id) {
            Some(mut slot) if self.is_live(&slot, now) => {
                slot.session.last_seen_at = slot.session.last_seen_at.max(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn get(&self, id: &SessionId) -> Result<Option<Session>, StoreError> {
        let now = self.clock.now_millis();
        Ok(self
            .sessions
            .get(id)
            .filter(|slot| self.is_live(slot, now))
            .map(|slot| slot.session.clone()))
    }

    fn list_active(&self) -> Result<Vec<Session>, StoreError> {
        let now = self.clock.now_millis();
        let mut live: Vec<Slot> = self
            .sessions
            .iter()
            .filter(|e| self.is_live(e.value(), now))
            .map(|e| e.value().clone())
            .collect();
        live.sort_by_key(|slot| slot.seq);
        Ok(live.into_iter().map(|slot| slot.session).collect())
    }

    fn count_for_instance(&self, instance_id: &str) -> Result<usize, StoreError> {
        let now = self.clock.now_millis();
        Ok(self
            .sessions
            .iter()
            .filter(|e| e.value().session.instance_id == instance_id && self.is_live(e.value(), now))
            .count())
    }

    fn count_total(&self) -> Result<usize, StoreError> {
        let now = self.clock.now_millis();
        Ok(self
            .sessions
            .iter()
            .filter(|e| self.is_live(e.value(), now))
            .count())
    }

    fn sweep_expired(&self) -> Result<Vec<Session>, StoreError> {
        let now = self.clock.now_millis();
        let ttl = self.ttl_millis;
        let mut removed: Vec<Slot> = Vec::new();

        // retain holds each shard's write lock while deciding, so a touch on
        // the same key lands either wholly before or wholly after the check.
        self.sessions.retain(|_, slot| {
            if slot.session.is_expired(now, ttl) {
                removed.push(slot.clone());
                false
            } else {
                true
            }
        });

        removed.sort_by_key(|slot| slot.seq);
        Ok(removed.into_iter().map(|slot| slot.session).collect())
    }
}
