use crate::fingerprint::PoolFingerprint;
use crate::metrics_defs::{
    SELECTION_COOLDOWN, SELECTION_DURATION, SELECTION_NO_RELAY, SELECTION_SELECTED, STORE_ERROR,
};
use crate::store::{CoordinationStore, Selection, SelectionRequest, StoreError};
use shared::{counter, histogram};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Picks relays for one pool. Every decision is delegated to the store's atomic selection.
#[derive(Clone)]
pub struct RotationCoordinator {
    store: Arc<dyn CoordinationStore>,
    pool: PoolFingerprint,
}

impl RotationCoordinator {
    pub fn new(store: Arc<dyn CoordinationStore>, pool: PoolFingerprint) -> Self {
        RotationCoordinator { store, pool }
    }

    pub fn pool(&self) -> &PoolFingerprint {
        &self.pool
    }

    /// The caller must not pass an empty pool.
    pub async fn select(
        &self,
        endpoint: &str,
        relay_count: usize,
        now_ms: u64,
        cooldown: Duration,
    ) -> Result<Selection, StoreError> {
        let request = SelectionRequest {
            pool: &self.pool,
            endpoint,
            relay_count,
            now_ms,
            cooldown,
        };

        let started = Instant::now();
        let result = self.store.select_relay(&request).await;
        histogram!(SELECTION_DURATION).record(started.elapsed().as_secs_f64());

        match &result {
            Ok(Selection::Selected(relay)) => {
                counter!(SELECTION_SELECTED).increment(1);
                tracing::debug!(pool = %self.pool, endpoint, relay, "relay selected");
            }
            Ok(Selection::OnCooldown(relay)) => {
                counter!(SELECTION_COOLDOWN).increment(1);
                tracing::debug!(pool = %self.pool, endpoint, relay, "every healthy relay is cooling down");
            }
            Ok(Selection::NoHealthyRelay) => {
                counter!(SELECTION_NO_RELAY).increment(1);
                tracing::debug!(pool = %self.pool, endpoint, "no healthy relay");
            }
            Err(err) => {
                counter!(STORE_ERROR).increment(1);
                tracing::warn!(pool = %self.pool, endpoint, error = %err, "relay selection failed");
            }
        }

        result
    }
}
