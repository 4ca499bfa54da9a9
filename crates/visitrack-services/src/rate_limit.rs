//! Rate limiting — fixed window request counter per client identity.
//!
//! The first call in a window opens it with count 1 and is always allowed.
//! Every later call in the same window increments the count, including
//! calls that are refused, so a client cannot earn a reset by backing off
//! for a moment. A window ends `window` after it opened.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::clock::Clock;
use crate::error::StoreError;

pub trait RateLimiter: Send + Sync {
    /// Count one request for `identity`; returns whether it is allowed.
    fn allow(&self, identity: &str, limit: u32, window: Duration) -> Result<bool, StoreError>;

    /// Drop buckets whose window has elapsed. Returns how many went.
    fn prune(&self, window: Duration) -> Result<usize, StoreError>;
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    window_start: u64,
    count: u32,
}

/// Process-local limiter.
#[derive(Clone)]
pub struct FixedWindowLimiter {
    buckets: Arc<DashMap<String, Bucket>>,
    clock: Arc<dyn Clock>,
}

impl FixedWindowLimiter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            buckets: Arc::new(DashMap::new()),
            clock,
        }
    }

    /// Number of identities currently tracked.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

impl RateLimiter for FixedWindowLimiter {
    fn allow(&self, identity: &str, limit: u32, window: Duration) -> Result<bool, StoreError> {
        let now = self.clock.now_millis();
        let window = window.as_millis() as u64;

        // entry() holds the shard lock, so concurrent first requests from
        // one identity converge on a single bucket.
        let mut bucket = self
            .buckets
            .entry(identity.to_string())
            .or_insert(Bucket {
                window_start: now,
                count: 0,
            });

        if bucket.count == 0 || now.saturating_sub(bucket.window_start) >= window {
            bucket.window_start = now;
            bucket.count = 1;
            return Ok(true);
        }

        bucket.count = bucket.count.saturating_add(1);
        Ok(bucket.count <= limit)
    }

    fn prune(&self, window: Duration) -> Result<usize, StoreError> {
        let now = self.clock.now_millis();
        let window = window.as_millis() as u64;
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now.saturating_sub(bucket.window_start) < window);
        Ok(before.saturating_sub(self.buckets.len()))
    }
}
