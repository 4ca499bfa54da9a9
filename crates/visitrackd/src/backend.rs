//! Store and rate-limiter selection.

use std::sync::Arc;

use anyhow::{Context, Result};

use visitrack_core::config::{StoreBackend, VisitrackConfig};
use visitrack_services::{
    Clock, FixedWindowLimiter, MemoryStore, RateLimiter, SessionStore, SqliteStore, SystemClock,
};

pub struct Backend {
    pub store: Arc<dyn SessionStore>,
    pub limiter: Arc<dyn RateLimiter>,
}

/// Build the configured backend. The SQLite store also serves as the rate
/// limiter so every instance on the host shares both.
pub fn open(config: &VisitrackConfig) -> Result<Backend> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let ttl = config.sessions.ttl();

    match config.store.backend {
        StoreBackend::Memory => {
            tracing::info!("using in-memory session store (single instance only)");
            Ok(Backend {
                store: Arc::new(MemoryStore::new(ttl, clock.clone())),
                limiter: Arc::new(FixedWindowLimiter::new(clock)),
            })
        }
        StoreBackend::Sqlite => {
            let path = &config.store.sqlite_path;
            let store = Arc::new(
                SqliteStore::open(path, ttl, clock)
                    .with_context(|| format!("failed to open session store {}", path.display()))?,
            );
            tracing::info!(path = %path.display(), "using shared sqlite session store");
            Ok(Backend {
                store: store.clone(),
                limiter: store,
            })
        }
    }
}
