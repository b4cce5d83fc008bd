use crate::fingerprint::PoolFingerprint;
use async_trait::async_trait;
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),
    #[error("could not create redis pool: {0}")]
    CreatePool(#[from] deadpool_redis::CreatePoolError),
    #[error("store returned relay index {index} for a pool of {count} relays")]
    InvalidIndex { index: i64, count: usize },
    #[error("cannot select from a pool without relays")]
    EmptyPool,
}

/// Outcome of one atomic selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// The relay was reserved for the endpoint. Its last-use time is now the request time.
    Selected(usize),
    /// Every healthy relay was used against the endpoint within the cooldown.
    /// Carries the relay the rotation would have picked. Nothing was written.
    OnCooldown(usize),
    /// Every relay in the pool is flagged unhealthy.
    NoHealthyRelay,
}

#[derive(Debug, Clone, Copy)]
pub struct SelectionRequest<'a> {
    pub pool: &'a PoolFingerprint,
    pub endpoint: &'a str,
    pub relay_count: usize,
    /// Wall-clock time of the request in milliseconds.
    pub now_ms: u64,
    pub cooldown: Duration,
}

/// Shared state for relay rotation and health, used by every process routing through
/// the same pool.
///
/// Implementations must run `select_relay` as one indivisible step: the health checks,
/// the cooldown check and the last-use write cannot interleave with another caller.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    async fn select_relay(&self, request: &SelectionRequest<'_>) -> Result<Selection, StoreError>;

    /// Flags a relay as unusable for `ttl`. The flag expires on its own.
    async fn mark_unhealthy(
        &self,
        pool: &PoolFingerprint,
        relay: usize,
        ttl: Duration,
    ) -> Result<(), StoreError>;
}

/// Key layout of one pool in the store.
///
/// The fingerprint is wrapped in braces so that a clustered store keeps every key
/// of a pool in the same slot.
pub(crate) struct Keys {
    prefix: String,
}

impl Keys {
    pub fn new(pool: &PoolFingerprint) -> Self {
        Keys {
            prefix: format!("relay:{{{pool}}}:"),
        }
    }

    pub fn cursor(&self) -> String {
        format!("{}cursor", self.prefix)
    }

    pub fn endpoint(&self, endpoint: &str) -> String {
        format!("{}ep:{}", self.prefix, endpoint)
    }

    pub fn health(&self, relay: usize) -> String {
        format!("{}unhealthy:{}", self.prefix, relay)
    }
}

/// Keep endpoint records a little longer than the cooldown so a record never expires
/// while it can still block a relay.
pub(crate) const ENDPOINT_TTL_MARGIN_MS: u64 = 1_000;

/// The selection walk shared by every store. `rotation.lua` implements the same steps.
///
/// Starting at `start`, unhealthy relays are skipped. The first healthy relay that is off
/// cooldown and was not the last relay used for the endpoint wins. The last-used relay is
/// only picked again when it is the sole relay off cooldown.
pub(crate) fn choose_relay(
    start: usize,
    count: usize,
    last_used: Option<usize>,
    is_unhealthy: impl Fn(usize) -> bool,
    is_cooling_down: impl Fn(usize) -> bool,
) -> Selection {
    let mut first_healthy = None;
    let mut repeat = None;

    for offset in 0..count {
        let idx = (start + offset) % count;
        if is_unhealthy(idx) {
            continue;
        }
        first_healthy.get_or_insert(idx);
        if is_cooling_down(idx) {
            continue;
        }
        if Some(idx) != last_used {
            return Selection::Selected(idx);
        }
        repeat.get_or_insert(idx);
    }

    match (repeat, first_healthy) {
        (Some(idx), _) => Selection::Selected(idx),
        (None, Some(idx)) => Selection::OnCooldown(idx),
        (None, None) => Selection::NoHealthyRelay,
    }
}
