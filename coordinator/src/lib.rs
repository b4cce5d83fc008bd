//! Cross-process coordination for a relay pool: atomic rotation with per-endpoint
//! cooldowns, and expiring health flags.
//!
//! All mutable state lives in a [`CoordinationStore`]. Every process that routes
//! through the same pool must point at the same store.
//!
//! The [`RedisStore`] tests run against the server named by `REDIS_URL` and are
//! skipped when it is unset.

pub mod clock;
pub mod config;
pub mod fingerprint;
pub mod health;
pub mod memory_store;
pub mod metrics_defs;
pub mod redis_store;
pub mod rotation;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::StoreConfig;
pub use fingerprint::{EMPTY_POOL, PoolFingerprint};
pub use health::HealthTracker;
pub use memory_store::MemoryStore;
pub use redis_store::RedisStore;
pub use rotation::RotationCoordinator;
pub use store::{CoordinationStore, Selection, SelectionRequest, StoreError};

use std::sync::Arc;

/// Builds the store named by the configuration. The clock only drives expiry in the
/// memory store; Redis expires keys on its own clock.
pub fn get_store(
    config: &StoreConfig,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn CoordinationStore>, StoreError> {
    match config {
        StoreConfig::Redis { url, pool_max } => Ok(Arc::new(RedisStore::new(url, *pool_max)?)),
        StoreConfig::Memory => Ok(Arc::new(MemoryStore::new(clock))),
    }
}
