//! Redis-backed coordination store.
//!
//! Selection runs as a server-side Lua script, which Redis executes without
//! interleaving other commands. That makes the script the linearization point for
//! every process that shares the pool. Every key the script touches is passed in
//! `KEYS`, so a cluster can route the call.
//!
//! The tests that talk to Redis read its address from `REDIS_URL` and return early
//! when it is unset.

use crate::fingerprint::PoolFingerprint;
use crate::store::{
    CoordinationStore, ENDPOINT_TTL_MARGIN_MS, Keys, Selection, SelectionRequest, StoreError,
};
use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use redis::Script;
use std::time::Duration;

const ROTATION_SCRIPT: &str = include_str!("rotation.lua");

pub struct RedisStore {
    pool: Pool,
    script: Script,
}

impl RedisStore {
    pub fn new(url: &str, pool_max: usize) -> Result<Self, StoreError> {
        let mut cfg = Config::from_url(url);
        cfg.pool = Some(deadpool_redis::PoolConfig::new(pool_max));
        let pool = cfg.create_pool(Some(Runtime::Tokio1))?;

        Ok(RedisStore {
            pool,
            script: Script::new(ROTATION_SCRIPT),
        })
    }
}

/// Cursor, endpoint record, then one health flag per relay in index order.
fn script_keys(keys: &Keys, endpoint: &str, relay_count: usize) -> Vec<String> {
    let mut script_keys = Vec::with_capacity(relay_count + 2);
    script_keys.push(keys.cursor());
    script_keys.push(keys.endpoint(endpoint));
    script_keys.extend((0..relay_count).map(|relay| keys.health(relay)));
    script_keys
}

#[async_trait]
impl CoordinationStore for RedisStore {
    async fn select_relay(&self, request: &SelectionRequest<'_>) -> Result<Selection, StoreError> {
        if request.relay_count == 0 {
            return Err(StoreError::EmptyPool);
        }

        let keys = Keys::new(request.pool);
        let mut conn = self.pool.get().await?;

        let mut invocation = self.script.prepare_invoke();
        for key in script_keys(&keys, request.endpoint, request.relay_count) {
            invocation.key(key);
        }
        invocation
            .arg(request.relay_count)
            .arg(request.now_ms)
            .arg(request.cooldown.as_millis() as u64)
            .arg(ENDPOINT_TTL_MARGIN_MS);

        // invoke_async uses EVALSHA and loads the script on NOSCRIPT
        let (index, on_cooldown): (i64, i64) = invocation.invoke_async(&mut conn).await?;

        if index < 0 {
            return Ok(Selection::NoHealthyRelay);
        }
        let relay = usize::try_from(index)
            .ok()
            .filter(|idx| *idx < request.relay_count)
            .ok_or(StoreError::InvalidIndex {
                index,
                count: request.relay_count,
            })?;

        Ok(match on_cooldown {
            0 => Selection::Selected(relay),
            _ => Selection::OnCooldown(relay),
        })
    }

    async fn mark_unhealthy(
        &self,
        pool: &PoolFingerprint,
        relay: usize,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let keys = Keys::new(pool);
        let mut conn = self.pool.get().await?;

        redis::cmd("SET")
            .arg(keys.health(relay))
            .arg(1)
            .arg("PX")
            .arg((ttl.as_millis() as u64).max(1))
            .query_async::<()>(&mut conn)
            .await?;

        Ok(())
    }
}
