// Penalises relays that show transport failures. Recording is best effort: if the store
// cannot be reached the relay simply stays eligible.
use crate::fingerprint::PoolFingerprint;
use crate::metrics_defs::{RELAY_MARKED_UNHEALTHY, STORE_ERROR};
use crate::store::CoordinationStore;
use shared::counter;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct HealthTracker {
    store: Arc<dyn CoordinationStore>,
    pool: PoolFingerprint,
    ttl: Duration,
}

impl HealthTracker {
    pub fn new(store: Arc<dyn CoordinationStore>, pool: PoolFingerprint, ttl: Duration) -> Self {
        HealthTracker { store, pool, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Flags the relay for the configured ttl. Returns whether the flag was recorded.
    pub async fn mark_unhealthy(&self, relay: usize) -> bool {
        match self.store.mark_unhealthy(&self.pool, relay, self.ttl).await {
            Ok(()) => {
                counter!(RELAY_MARKED_UNHEALTHY).increment(1);
                tracing::warn!(pool = %self.pool, relay, ttl = ?self.ttl, "relay marked unhealthy");
                true
            }
            Err(err) => {
                counter!(STORE_ERROR).increment(1);
                tracing::warn!(pool = %self.pool, relay, error = %err, "could not mark relay unhealthy");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::memory_store::MemoryStore;
    use crate::store::{Selection, SelectionRequest, StoreError};
    use async_trait::async_trait;

    #[tokio::test]
    async fn test_mark_unhealthy_excludes_relay_until_ttl() {
        let clock = Arc::new(ManualClock::new(1_000));
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let pool = PoolFingerprint::from_urls(["http://a:1"]);
        let tracker = HealthTracker::new(store.clone(), pool.clone(), Duration::from_secs(60));
        assert_eq!(tracker.ttl(), Duration::from_secs(60));

        assert!(tracker.mark_unhealthy(0).await);

        let request = SelectionRequest {
            pool: &pool,
            endpoint: "api.example.com/users",
            relay_count: 1,
            now_ms: clock.now_ms(),
            cooldown: Duration::ZERO,
        };
        assert_eq!(
            store.select_relay(&request).await.unwrap(),
            Selection::NoHealthyRelay
        );

        clock.advance(Duration::from_secs(60));
        assert_eq!(
            store.select_relay(&request).await.unwrap(),
            Selection::Selected(0)
        );
    }

    struct BrokenStore;

    #[async_trait]
    impl CoordinationStore for BrokenStore {
        async fn select_relay(
            &self,
            _request: &SelectionRequest<'_>,
        ) -> Result<Selection, StoreError> {
            Err(StoreError::EmptyPool)
        }

        async fn mark_unhealthy(
            &self,
            _pool: &PoolFingerprint,
            _relay: usize,
            _ttl: Duration,
        ) -> Result<(), StoreError> {
            Err(StoreError::EmptyPool)
        }
    }

    #[tokio::test]
    async fn test_store_failure_is_swallowed() {
        let tracker = HealthTracker::new(
            Arc::new(BrokenStore),
            PoolFingerprint::from_urls(["http://a:1"]),
            Duration::from_secs(60),
        );
        assert!(!tracker.mark_unhealthy(0).await);
    }
}
