//! Tracker — the session registry service one instance runs.
//!
//! Owns the store handle, rate limiter, capacity gate, connection registry
//! and broadcast engine, and exposes the operations the HTTP and
//! persistent-connection handlers need. Handlers get it injected; nothing
//! here is global.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;

use visitrack_core::config::VisitrackConfig;
use visitrack_core::visitor::{classify, sanitize_headers, validate_input, MAX_SESSION_ID_LEN};
use visitrack_core::{ClientMessage, DisplayRecord, Metadata, ServerMessage, SessionId};

use crate::broadcast::{BroadcastEngine, SessionsUpdate};
use crate::capacity::CapacityGate;
use crate::connections::{ConnectionId, ConnectionRegistry};
use crate::error::{StoreError, TrackError};
use crate::rate_limit::RateLimiter;
use crate::store::{SessionStore, USER_AGENT_KEY};

/// Limits and identity one tracker enforces.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub instance_id: String,
    pub max_users_per_instance: usize,
    pub rate_limit: u32,
    pub rate_window: Duration,
    pub ttl: Duration,
}

impl TrackerConfig {
    pub fn from_config(config: &VisitrackConfig, instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            max_users_per_instance: config.limits.max_users_per_instance,
            rate_limit: config.limits.rate_limit,
            rate_window: config.limits.rate_window(),
            ttl: config.sessions.ttl(),
        }
    }
}

/// Session counts reported by `/health`.
#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub instance_id: String,
    pub connections: usize,
    pub total_connections: usize,
}

pub struct Tracker {
    config: TrackerConfig,
    store: Arc<dyn SessionStore>,
    limiter: Arc<dyn RateLimiter>,
    gate: CapacityGate,
    connections: ConnectionRegistry,
    engine: BroadcastEngine,
}

impl Tracker {
    pub fn new(
        config: TrackerConfig,
        store: Arc<dyn SessionStore>,
        limiter: Arc<dyn RateLimiter>,
    ) -> Self {
        Self {
            gate: CapacityGate::new(store.clone()),
            engine: BroadcastEngine::new(store.clone()),
            connections: ConnectionRegistry::new(),
            config,
            store,
            limiter,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn instance_id(&self) -> &str {
        &self.config.instance_id
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn limiter(&self) -> &Arc<dyn RateLimiter> {
        &self.limiter
    }

    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    pub fn engine(&self) -> &BroadcastEngine {
        &self.engine
    }

    // ── Blocking boundary ────────────────────────────────────────────────────

    /// Run `op` against this tracker on the blocking pool.
    ///
    /// Store and limiter calls can wait on disk or on another instance's
    /// write lock. Async callers go through here so that wait never holds a
    /// runtime worker.
    pub async fn run_blocking<T, E, F>(self: &Arc<Self>, op: F) -> Result<T, E>
    where
        F: FnOnce(&Tracker) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<StoreError> + Send + 'static,
    {
        let tracker = Arc::clone(self);
        tokio::task::spawn_blocking(move || op(&tracker))
            .await
            .unwrap_or_else(|e| {
                Err(StoreError::Unavailable(format!("store task failed: {e}")).into())
            })
    }

    // ── Page load ─────────────────────────────────────────────────────────────

    /// Admit a page load: rate limit, then capacity, then create the session.
    ///
    /// `headers` are the raw request headers of interest; they are sanitized
    /// and merged with the browser/OS classification before storage.
    pub fn admit_visitor(
        &self,
        ip: &str,
        headers: &BTreeMap<String, String>,
    ) -> Result<SessionId, TrackError> {
        if !self
            .limiter
            .allow(ip, self.config.rate_limit, self.config.rate_window)?
        {
            tracing::info!(ip, "rate limit exceeded");
            return Err(TrackError::RateLimited {
                retry_after_secs: self.config.rate_window.as_secs(),
            });
        }

        let check = self
            .gate
            .check(&self.config.instance_id, self.config.max_users_per_instance)?;
        if !check.admitted() {
            tracing::warn!(
                ip,
                active = check.active,
                max = check.max,
                instance_id = %self.config.instance_id,
                "instance at capacity"
            );
            return Err(TrackError::CapacityExceeded {
                active: check.active,
                max: check.max,
            });
        }

        let user_agent = headers.get(USER_AGENT_KEY).cloned().unwrap_or_default();
        let client = classify(&user_agent);
        let sanitized = sanitize_headers(headers);

        let mut metadata: Metadata = sanitized
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect();
        metadata.insert("browser".to_string(), client.browser.into());
        metadata.insert("os".to_string(), client.os.into());

        let sanitized_agent = sanitized.get(USER_AGENT_KEY).cloned().unwrap_or_default();
        let session_id =
            self.store
                .add(ip, &sanitized_agent, metadata, &self.config.instance_id)?;

        tracing::info!(session_id = %session_id, ip, "new session created");
        Ok(session_id)
    }

    // ── Persistent connections ───────────────────────────────────────────────

    /// Open a connection: allocate its id and subscribe it to updates.
    pub fn open_connection(&self) -> (ConnectionId, broadcast::Receiver<SessionsUpdate>) {
        let connection = self.connections.open();
        let updates = self.engine.subscribe();
        tracing::debug!(%connection, "client connected");
        (connection, updates)
    }

    /// Handle one client frame. Returns the direct reply, if any.
    pub fn handle_message(
        &self,
        connection: ConnectionId,
        message: ClientMessage,
    ) -> Result<Option<ServerMessage>, StoreError> {
        match message {
            ClientMessage::RegisterSession { session_id } => {
                self.register(connection, &session_id)?;
                Ok(None)
            }
            ClientMessage::Heartbeat { session_id } => Ok(self
                .heartbeat(&session_id)?
                .then(ServerMessage::heartbeat_ok)),
            ClientMessage::CleanupOldSession { old_session_id } => {
                self.cleanup_old_session(&old_session_id)?;
                Ok(None)
            }
        }
    }

    /// Link a connection to a session and broadcast.
    ///
    /// Invalid ids are ignored; returns whether a link was made.
    pub fn register(&self, connection: ConnectionId, raw_id: &str) -> Result<bool, StoreError> {
        let Some(id) = parse_session_id(raw_id) else {
            tracing::debug!(%connection, "register with invalid session id ignored");
            return Ok(false);
        };
        if let Some(displaced) = self.connections.register(connection, id.clone()) {
            tracing::debug!(session_id = %id, %displaced, "session re-registered on new connection");
        }
        self.engine.broadcast_active_sessions()?;
        Ok(true)
    }

    /// Refresh a session's TTL. Returns whether the session was live.
    pub fn heartbeat(&self, raw_id: &str) -> Result<bool, StoreError> {
        match parse_session_id(raw_id) {
            Some(id) => self.store.touch(&id),
            None => Ok(false),
        }
    }

    /// Discard a session a reloaded page left behind, then broadcast.
    pub fn cleanup_old_session(&self, raw_id: &str) -> Result<bool, StoreError> {
        let Some(id) = parse_session_id(raw_id) else {
            return Ok(false);
        };
        tracing::info!(session_id = %id, "cleaning up old session");
        let removed = self.store.remove(&id)?;
        self.connections.unlink_session(&id);
        self.engine.broadcast_active_sessions()?;
        Ok(removed)
    }

    /// Connection closed. Removes the linked session, if any, and broadcasts.
    ///
    /// A connection that never registered removes nothing and stays quiet.
    pub fn disconnect(&self, connection: ConnectionId) -> Result<Option<SessionId>, StoreError> {
        let Some(id) = self.connections.close(connection) else {
            tracing::debug!(%connection, "client disconnected without a session");
            return Ok(None);
        };
        self.store.remove(&id)?;
        tracing::info!(%connection, session_id = %id, "client disconnected, session removed");
        self.engine.broadcast_active_sessions()?;
        Ok(Some(id))
    }

    // ── Operator surface ─────────────────────────────────────────────────────

    /// Remove a session by id (admin API) and broadcast if it existed.
    pub fn drop_session(&self, id: &SessionId) -> Result<bool, StoreError> {
        let removed = self.store.remove(id)?;
        if removed {
            self.connections.unlink_session(id);
            self.engine.broadcast_active_sessions()?;
        }
        Ok(removed)
    }

    pub fn health(&self) -> Result<Health, StoreError> {
        Ok(Health {
            instance_id: self.config.instance_id.clone(),
            connections: self.store.count_for_instance(&self.config.instance_id)?,
            total_connections: self.store.count_total()?,
        })
    }

    pub fn snapshot(&self) -> Result<Vec<DisplayRecord>, StoreError> {
        self.engine.snapshot()
    }
}

fn parse_session_id(raw: &str) -> Option<SessionId> {
    validate_input(raw, MAX_SESSION_ID_LEN).map(SessionId::from)
}
