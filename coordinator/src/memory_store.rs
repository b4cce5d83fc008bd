// Process-local coordination store. Selection semantics match the Redis script, with a
// single mutex standing in for the script's atomicity. Health flags and endpoint records
// expire against the injected clock, which lets tests move time forward.
use crate::clock::Clock;
use crate::fingerprint::PoolFingerprint;
use crate::store::{
    CoordinationStore, ENDPOINT_TTL_MARGIN_MS, Keys, Selection, SelectionRequest, StoreError,
    choose_relay,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

struct EndpointRecord {
    last: Option<usize>,
    used_at_ms: HashMap<usize, u64>,
    expires_at_ms: u64,
}

#[derive(Default)]
struct State {
    cursors: HashMap<String, u64>,
    endpoints: HashMap<String, EndpointRecord>,
    // health key -> expiry (ms, store clock)
    unhealthy: HashMap<String, u64>,
}

pub struct MemoryStore {
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        MemoryStore {
            clock,
            state: Mutex::new(State::default()),
        }
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn select_relay(&self, request: &SelectionRequest<'_>) -> Result<Selection, StoreError> {
        if request.relay_count == 0 {
            return Err(StoreError::EmptyPool);
        }

        let keys = Keys::new(request.pool);
        let endpoint_key = keys.endpoint(request.endpoint);
        let store_now = self.clock.now_ms();
        let cooldown_ms = request.cooldown.as_millis() as u64;

        let mut state = self.state.lock();
        let state = &mut *state;

        let cursor = state.cursors.entry(keys.cursor()).or_insert(0);
        let start = (*cursor % request.relay_count as u64) as usize;
        *cursor = cursor.wrapping_add(1);

        state.unhealthy.retain(|_, expires_at| *expires_at > store_now);
        state
            .endpoints
            .retain(|_, record| record.expires_at_ms > store_now);

        let record = state.endpoints.get(&endpoint_key);
        let selection = choose_relay(
            start,
            request.relay_count,
            record.and_then(|r| r.last),
            |idx| state.unhealthy.contains_key(&keys.health(idx)),
            |idx| {
                record
                    .and_then(|r| r.used_at_ms.get(&idx))
                    .is_some_and(|used| request.now_ms.saturating_sub(*used) < cooldown_ms)
            },
        );

        if let Selection::Selected(idx) = selection {
            let record = state
                .endpoints
                .entry(endpoint_key)
                .or_insert_with(|| EndpointRecord {
                    last: None,
                    used_at_ms: HashMap::new(),
                    expires_at_ms: 0,
                });
            record.last = Some(idx);
            record.used_at_ms.insert(idx, request.now_ms);
            record.expires_at_ms = store_now + cooldown_ms + ENDPOINT_TTL_MARGIN_MS;
        }

        Ok(selection)
    }

    async fn mark_unhealthy(
        &self,
        pool: &PoolFingerprint,
        relay: usize,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let expires_at = self.clock.now_ms() + (ttl.as_millis() as u64).max(1);
        self.state
            .lock()
            .unhealthy
            .insert(Keys::new(pool).health(relay), expires_at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const COOLDOWN: Duration = Duration::from_secs(10);

    fn setup() -> (Arc<ManualClock>, Arc<MemoryStore>, PoolFingerprint) {
        let clock = Arc::new(ManualClock::new(0));
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let pool = PoolFingerprint::from_urls(["http://10.0.0.1:8000", "http://10.0.0.2:8000"]);
        (clock, store, pool)
    }

    fn request<'a>(
        pool: &'a PoolFingerprint,
        endpoint: &'a str,
        relay_count: usize,
        now_ms: u64,
    ) -> SelectionRequest<'a> {
        SelectionRequest {
            pool,
            endpoint,
            relay_count,
            now_ms,
            cooldown: COOLDOWN,
        }
    }

    #[tokio::test]
    async fn test_rejects_empty_pool() {
        let (_clock, store, pool) = setup();
        let result = store.select_relay(&request(&pool, "a.com/x", 0, 0)).await;
        assert!(matches!(result, Err(StoreError::EmptyPool)));
    }

    #[tokio::test]
    async fn test_two_relays_cooldown_scenario() {
        let (clock, store, pool) = setup();
        let endpoint = "api.example.com/users/{id}";

        // t=0: request A gets relay 0
        let a = store.select_relay(&request(&pool, endpoint, 2, 0)).await.unwrap();
        assert_eq!(a, Selection::Selected(0));

        // t=1: request B must not reuse relay 0
        clock.set(1_000);
        let b = store
            .select_relay(&request(&pool, endpoint, 2, 1_000))
            .await
            .unwrap();
        assert_eq!(b, Selection::Selected(1));

        // t=2: both relays are cooling down for this endpoint
        clock.set(2_000);
        let c = store
            .select_relay(&request(&pool, endpoint, 2, 2_000))
            .await
            .unwrap();
        assert!(matches!(c, Selection::OnCooldown(_)));

        // a different endpoint is unaffected
        let other = store
            .select_relay(&request(&pool, "api.example.com/groups/{id}", 2, 2_000))
            .await
            .unwrap();
        assert!(matches!(other, Selection::Selected(_)));

        // t=10: relay 0 is usable again, relay 1 is still cooling down
        clock.set(10_000);
        let d = store
            .select_relay(&request(&pool, endpoint, 2, 10_000))
            .await
            .unwrap();
        assert_eq!(d, Selection::Selected(0));
    }

    #[tokio::test]
    async fn test_rotation_makes_progress_without_cooldown() {
        let (_clock, store, pool) = setup();
        let mut previous = None;
        for _ in 0..6 {
            let selection = store
                .select_relay(&SelectionRequest {
                    pool: &pool,
                    endpoint: "api.example.com/users",
                    relay_count: 2,
                    now_ms: 0,
                    cooldown: Duration::ZERO,
                })
                .await
                .unwrap();
            let Selection::Selected(idx) = selection else {
                panic!("expected a selection, got {selection:?}");
            };
            assert_ne!(Some(idx), previous, "same relay picked twice in a row");
            previous = Some(idx);
        }
    }

    #[tokio::test]
    async fn test_health_exclusion_expires() {
        let (clock, store, pool) = setup();
        let endpoint = "api.example.com/users";
        let no_cooldown = |now_ms| SelectionRequest {
            pool: &pool,
            endpoint,
            relay_count: 2,
            now_ms,
            cooldown: Duration::ZERO,
        };

        store
            .mark_unhealthy(&pool, 0, Duration::from_secs(60))
            .await
            .unwrap();

        for _ in 0..5 {
            let selection = store.select_relay(&no_cooldown(clock.now_ms())).await.unwrap();
            assert_eq!(selection, Selection::Selected(1));
        }

        // still excluded right before the ttl elapses
        clock.advance(Duration::from_secs(59));
        let selection = store.select_relay(&no_cooldown(clock.now_ms())).await.unwrap();
        assert_eq!(selection, Selection::Selected(1));

        clock.advance(Duration::from_secs(1));
        let mut seen = Vec::new();
        for _ in 0..4 {
            if let Selection::Selected(idx) =
                store.select_relay(&no_cooldown(clock.now_ms())).await.unwrap()
            {
                seen.push(idx);
            }
        }
        assert!(seen.contains(&0), "relay 0 should be eligible again");
    }

    #[tokio::test]
    async fn test_all_unhealthy_reports_no_relay() {
        let (_clock, store, pool) = setup();
        for relay in 0..2 {
            store
                .mark_unhealthy(&pool, relay, Duration::from_secs(60))
                .await
                .unwrap();
        }

        let selection = store
            .select_relay(&request(&pool, "api.example.com/users", 2, 0))
            .await
            .unwrap();
        assert_eq!(selection, Selection::NoHealthyRelay);
    }

    #[tokio::test]
    async fn test_pools_are_isolated() {
        let (_clock, store, pool) = setup();
        let other_pool = PoolFingerprint::from_urls(["http://10.0.0.9:8000"]);

        store
            .mark_unhealthy(&other_pool, 0, Duration::from_secs(60))
            .await
            .unwrap();

        let selection = store
            .select_relay(&request(&pool, "api.example.com/users", 2, 0))
            .await
            .unwrap();
        assert_eq!(selection, Selection::Selected(0));
    }

    #[tokio::test]
    async fn test_no_double_booking() {
        let (_clock, store, pool) = setup();
        let endpoint = "api.example.com/users/{id}";

        let mut handles = Vec::new();
        for _ in 0..64 {
            let store = store.clone();
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                store
                    .select_relay(&request(&pool, endpoint, 1, 3_000))
                    .await
                    .unwrap()
            }));
        }

        let mut selected = 0;
        let mut cooling = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Selection::Selected(_) => selected += 1,
                Selection::OnCooldown(_) => cooling += 1,
                Selection::NoHealthyRelay => panic!("relay is healthy"),
            }
        }
        assert_eq!(selected, 1);
        assert_eq!(cooling, 63);
    }
}
