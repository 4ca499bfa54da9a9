//! Error types for the session registry.
//!
//! A missing session is not an error anywhere: `remove` and `touch`
//! report it as `false`.

use thiserror::Error;

/// The shared store could not serve a request.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt record for {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// Why a page load did not produce a session.
#[derive(Debug, Error)]
pub enum TrackError {
    #[error("rate limit exceeded, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("instance at capacity ({active}/{max} sessions)")]
    CapacityExceeded { active: usize, max: usize },

    #[error(transparent)]
    Store(#[from] StoreError),
}
