//! Connection registry — links live persistent connections to sessions.
//!
//! Owned by one instance and never persisted; links are rebuilt as pages
//! reconnect and register. A session is linked to at most one connection:
//! a newer registration for the same session displaces the older link.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use visitrack_core::SessionId;

/// Instance-local identifier of one persistent connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Lifecycle of one persistent connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Connected, no session linked yet.
    Open,
    /// Linked to a session by a register message.
    Registered(SessionId),
    /// Disconnect observed, or an id this registry never handed out.
    Closed,
}

#[derive(Default)]
struct Links {
    open: HashSet<ConnectionId>,
    by_connection: HashMap<ConnectionId, SessionId>,
    by_session: HashMap<SessionId, ConnectionId>,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    links: Mutex<Links>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an id for a newly opened connection.
    pub fn open(&self) -> ConnectionId {
        let connection = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.links.lock().open.insert(connection);
        connection
    }

    /// Link `connection` to `session`, replacing any link either side had.
    ///
    /// Returns the connection that previously held `session`, if it was a
    /// different one.
    pub fn register(&self, connection: ConnectionId, session: SessionId) -> Option<ConnectionId> {
        let mut links = self.links.lock();

        if let Some(previous) = links.by_connection.remove(&connection) {
            links.by_session.remove(&previous);
        }
        let displaced = links
            .by_session
            .insert(session.clone(), connection)
            .filter(|other| *other != connection);
        if let Some(other) = displaced {
            links.by_connection.remove(&other);
        }
        links.by_connection.insert(connection, session);
        displaced
    }

    /// Remove and return the session linked to `connection`.
    pub fn unregister(&self, connection: ConnectionId) -> Option<SessionId> {
        self.links.lock().unlink_connection(connection)
    }

    /// Drop whatever link points at `session`.
    pub fn unlink_session(&self, session: &SessionId) -> Option<ConnectionId> {
        let mut links = self.links.lock();
        let connection = links.by_session.remove(session)?;
        links.by_connection.remove(&connection);
        Some(connection)
    }

    /// Mark a connection closed and return the session it was linked to.
    ///
    /// Closing a connection that is already closed does nothing.
    pub fn close(&self, connection: ConnectionId) -> Option<SessionId> {
        let mut links = self.links.lock();
        if !links.open.remove(&connection) {
            return None;
        }
        links.unlink_connection(connection)
    }

    pub fn session_for(&self, connection: ConnectionId) -> Option<SessionId> {
        self.links.lock().by_connection.get(&connection).cloned()
    }

    pub fn state_of(&self, connection: ConnectionId) -> ConnectionState {
        let links = self.links.lock();
        if let Some(session) = links.by_connection.get(&connection) {
            ConnectionState::Registered(session.clone())
        } else if links.open.contains(&connection) {
            ConnectionState::Open
        } else {
            ConnectionState::Closed
        }
    }

    /// Connections currently open on this instance.
    pub fn open_count(&self) -> usize {
        self.links.lock().open.len()
    }

    /// Connections with a session link.
    pub fn linked_count(&self) -> usize {
        self.links.lock().by_connection.len()
    }
}

impl Links {
    fn unlink_connection(&mut self, connection: ConnectionId) -> Option<SessionId> {
        let session = self.by_connection.remove(&connection)?;
        if self.by_session.get(&session) == Some(&connection) {
            self.by_session.remove(&session);
        }
        Some(session)
    }
}
