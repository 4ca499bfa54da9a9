//! SQLite-backed store shared by every instance on a host.
//!
//! Each instance opens the same database file. WAL mode plus a busy timeout
//! lets several processes read and write concurrently; every mutation is a
//! single statement or an IMMEDIATE transaction, so per-key updates are
//! serialized by SQLite's write lock.
//!
//! The same database also holds the rate-limit buckets, so a client spread
//! across instances by the load balancer is counted once.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};

use visitrack_core::{Metadata, Session, SessionId};

use super::{ttl_millis, with_user_agent, SessionStore};
use crate::clock::Clock;
use crate::error::StoreError;
use crate::rate_limit::RateLimiter;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS sessions (
    seq          INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id   TEXT    NOT NULL UNIQUE,
    ip           TEXT    NOT NULL,
    metadata     TEXT    NOT NULL,
    instance_id  TEXT    NOT NULL,
    created_at   INTEGER NOT NULL,
    last_seen_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS sessions_by_instance ON sessions (instance_id);
CREATE INDEX IF NOT EXISTS sessions_by_last_seen ON sessions (last_seen_at);

CREATE TABLE IF NOT EXISTS rate_limits (
    identity     TEXT    PRIMARY KEY,
    window_start INTEGER NOT NULL,
    count        INTEGER NOT NULL
);
";

const SESSION_COLUMNS: &str = "session_id, ip, metadata, instance_id, created_at, last_seen_at";

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    clock: Arc<dyn Clock>,
    ttl_millis: u64,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    pub fn open(
        path: impl AsRef<Path>,
        ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Unavailable(format!("create {}: {}", parent.display(), e))
            })?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(2))?;
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;
        Self::init(conn, ttl, clock)
    }

    /// Private database, mostly for tests.
    pub fn open_in_memory(ttl: Duration, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?, ttl, clock)
    }

    fn init(conn: Connection, ttl: Duration, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            clock,
            ttl_millis: ttl_millis(ttl),
        })
    }

    /// Oldest `last_seen_at` still considered live at `now`.
    fn live_cutoff(&self, now: u64) -> i64 {
        now.saturating_sub(self.ttl_millis) as i64
    }
}

/// A `sessions` row before its metadata column is decoded.
struct SessionRow {
    session_id: String,
    ip: String,
    metadata: String,
    instance_id: String,
    created_at: i64,
    last_seen_at: i64,
}

impl SessionRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            session_id: row.get(0)?,
            ip: row.get(1)?,
            metadata: row.get(2)?,
            instance_id: row.get(3)?,
            created_at: row.get(4)?,
            last_seen_at: row.get(5)?,
        })
    }

    fn into_session(self) -> Result<Session, StoreError> {
        let metadata: Metadata =
            serde_json::from_str(&self.metadata).map_err(|e| StoreError::Corrupt {
                key: self.session_id.clone(),
                reason: e.to_string(),
            })?;
        Ok(Session {
            session_id: SessionId::from(self.session_id),
            ip: self.ip,
            metadata,
            instance_id: self.instance_id,
            created_at: self.created_at.max(0) as u64,
            last_seen_at: self.last_seen_at.max(0) as u64,
        })
    }
}

fn collect_sessions(rows: Vec<SessionRow>) -> Result<Vec<Session>, StoreError> {
    rows.into_iter().map(SessionRow::into_session).collect()
}

impl SessionStore for SqliteStore {
    fn add(
        &self,
        ip: &str,
        user_agent: &str,
        metadata: Metadata,
        instance_id: &str,
    ) -> Result<SessionId, StoreError> {
        let now = self.clock.now_millis() as i64;
        let metadata = with_user_agent(metadata, user_agent);
        let metadata_json = serde_json::to_string(&metadata).map_err(|e| StoreError::Corrupt {
            key: ip.to_string(),
            reason: e.to_string(),
        })?;

        let conn = self.conn.lock();
        loop {
            let id = SessionId::generate();
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO sessions
                     (session_id, ip, metadata, instance_id, created_at, last_seen_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![id.as_str(), ip, metadata_json, instance_id, now],
            )?;
            if inserted == 1 {
                return Ok(id);
            }
        }
    }

    fn remove(&self, id: &SessionId) -> Result<bool, StoreError> {
        let cutoff = self.live_cutoff(self.clock.now_millis());
        let deleted = self.conn.lock().execute(
            "DELETE FROM sessions WHERE session_id = ?1 AND last_seen_at >= ?2",
            params![id.as_str(), cutoff],
        )?;
        Ok(deleted == 1)
    }

    fn touch(&self, id: &SessionId) -> Result<bool, StoreError> {
        let now = self.clock.now_millis();
        let updated = self.conn.lock().execute(
            "UPDATE sessions SET last_seen_at = MAX(last_seen_at, ?1)
             WHERE session_id = ?2 AND last_seen_at >= ?3",
            params![now as i64, id.as_str(), self.live_cutoff(now)],
        )?;
        Ok(updated == 1)
    }

    fn get(&self, id: &SessionId) -> Result<Option<Session>, StoreError> {
        let cutoff = self.live_cutoff(self.clock.now_millis());
        let row = self
            .conn
            .lock()
            .query_row(
                &format!(
                    "SELECT {SESSION_COLUMNS} FROM sessions
                     WHERE session_id = ?1 AND last_seen_at >= ?2"
                ),
                params![id.as_str(), cutoff],
                SessionRow::from_row,
            )
            .optional()?;
        row.map(SessionRow::into_session).transpose()
    }

    fn list_active(&self) -> Result<Vec<Session>, StoreError> {
        let cutoff = self.live_cutoff(self.clock.now_millis());
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE last_seen_at >= ?1 ORDER BY seq"
        ))?;
        let rows = stmt
            .query_map(params![cutoff], SessionRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        collect_sessions(rows)
    }

    fn count_for_instance(&self, instance_id: &str) -> Result<usize, StoreError> {
        let cutoff = self.live_cutoff(self.clock.now_millis());
        let count: i64 = self.conn.lock().query_row(
            "SELECT COUNT(*) FROM sessions WHERE instance_id = ?1 AND last_seen_at >= ?2",
            params![instance_id, cutoff],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn count_total(&self) -> Result<usize, StoreError> {
        let cutoff = self.live_cutoff(self.clock.now_millis());
        let count: i64 = self.conn.lock().query_row(
            "SELECT COUNT(*) FROM sessions WHERE last_seen_at >= ?1",
            params![cutoff],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn sweep_expired(&self) -> Result<Vec<Session>, StoreError> {
        let cutoff = self.live_cutoff(self.clock.now_millis());

        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let rows = {
            let mut stmt = tx.prepare_cached(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions WHERE last_seen_at < ?1 ORDER BY seq"
            ))?;
            let rows = stmt
                .query_map(params![cutoff], SessionRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };
        tx.execute(
            "DELETE FROM sessions WHERE last_seen_at < ?1",
            params![cutoff],
        )?;
        tx.commit()?;

        collect_sessions(rows)
    }
}

impl RateLimiter for SqliteStore {
    fn allow(&self, identity: &str, limit: u32, window: Duration) -> Result<bool, StoreError> {
        let now = self.clock.now_millis() as i64;
        let window = window.as_millis() as i64;

        // Both CASE arms read the pre-update row, so reset and increment
        // happen in one atomic upsert.
        let count: i64 = self.conn.lock().query_row(
            "INSERT INTO rate_limits (identity, window_start, count) VALUES (?1, ?2, 1)
             ON CONFLICT (identity) DO UPDATE SET
                 count        = CASE WHEN ?2 - window_start >= ?3 THEN 1  ELSE count + 1   END,
                 window_start = CASE WHEN ?2 - window_start >= ?3 THEN ?2 ELSE window_start END
             RETURNING count",
            params![identity, now, window],
            |row| row.get(0),
        )?;

        Ok(count == 1 || count <= limit as i64)
    }

    fn prune(&self, window: Duration) -> Result<usize, StoreError> {
        let now = self.clock.now_millis() as i64;
        let pruned = self.conn.lock().execute(
            "DELETE FROM rate_limits WHERE ?1 - window_start >= ?2",
            params![now, window.as_millis() as i64],
        )?;
        Ok(pruned)
    }
}
