//! Expiry sweeper — periodic eviction of sessions whose TTL lapsed.
//!
//! Each tick removes expired sessions from the shared store and broadcasts
//! if anything went. With nothing evicted it still re-broadcasts when the
//! active membership changed since the last push, which is how dashboards
//! on this instance learn about sessions other instances added or removed.
//! It also prunes rate-limit buckets whose window has closed.
//!
//! A failing store never ends the loop: the tick is logged and retried on
//! the next interval.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{self, MissedTickBehavior};

use crate::error::StoreError;
use crate::tracker::Tracker;

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub pruned_buckets: usize,
    pub broadcast: bool,
}

pub struct Sweeper {
    tracker: Arc<Tracker>,
    interval: Duration,
}

impl Sweeper {
    pub fn new(tracker: Arc<Tracker>, interval: Duration) -> Self {
        Self { tracker, interval }
    }

    /// Run one sweep on the calling thread.
    pub fn tick(&self) -> Result<SweepReport, StoreError> {
        sweep(&self.tracker)
    }

    /// Sweep every interval until `shutdown` fires or its sender is gone.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut interval = time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately; skip it so a fresh process
        // does not sweep before anything could have expired
        interval.tick().await;

        tracing::info!(interval_secs = self.interval.as_secs(), "expiry sweeper starting");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tracker.run_blocking(sweep).await {
                        tracing::warn!(error = %e, "session sweep failed, retrying next tick");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("expiry sweeper stopping");
                    break;
                }
            }
        }
    }
}

fn sweep(tracker: &Tracker) -> Result<SweepReport, StoreError> {
    let config = tracker.config();
    let engine = tracker.engine();

    let expired = tracker.store().sweep_expired()?;
    for session in &expired {
        tracker.connections().unlink_session(&session.session_id);
    }

    let broadcast = if expired.is_empty() {
        engine.broadcast_if_changed()?
    } else {
        tracing::info!(removed = expired.len(), "cleaned up expired sessions");
        engine.broadcast_active_sessions()?;
        true
    };

    let pruned_buckets = match tracker.limiter().prune(config.rate_window) {
        Ok(n) => n,
        Err(e) => {
            tracing::warn!(error = %e, "rate-limit pruning failed");
            0
        }
    };

    Ok(SweepReport {
        expired: expired.len(),
        pruned_buckets,
        broadcast,
    })
}
