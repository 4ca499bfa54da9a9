//! visitrack-services — session storage, admission control, connection
//! tracking and broadcast. The daemon and the HTTP layer drive everything
//! through [`Tracker`].

pub mod broadcast;
pub mod capacity;
pub mod clock;
pub mod connections;
pub mod error;
pub mod rate_limit;
pub mod store;
pub mod sweeper;
pub mod tracker;

pub use broadcast::{BroadcastEngine, SessionsUpdate};
pub use capacity::{CapacityCheck, CapacityGate};
pub use clock::{Clock, ManualClock, SystemClock};
pub use connections::{ConnectionId, ConnectionRegistry, ConnectionState};
pub use error::{StoreError, TrackError};
pub use rate_limit::{FixedWindowLimiter, RateLimiter};
pub use store::{MemoryStore, SessionStore, SqliteStore};
pub use sweeper::{SweepReport, Sweeper};
pub use tracker::{Health, Tracker, TrackerConfig};
