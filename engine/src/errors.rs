use crate::config::ValidationError;
use crate::fallback::{FallbackError, IneligibleReason};
use crate::transport::TransportError;
use coordinator::StoreError;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for routed requests
pub type Result<T, E = RouteError> = std::result::Result<T, E>;

/// Why the relay pool did not produce a response.
#[derive(Error, Debug)]
pub enum PrimaryError {
    #[error("no relays configured")]
    NoRelaysConfigured,

    #[error("relay pool has been cleaned up")]
    PoolClosed,

    #[error("host {0} is not routed through the relay pool")]
    HostNotRouted(String),

    #[error("every relay is unhealthy")]
    NoRelayAvailable,

    #[error("relay {relay} is cooling down for this endpoint")]
    RelayOnCooldown { relay: usize },

    #[error("relay {relay} failed: {source}")]
    RelayTransport {
        /// Relay url without credentials
        relay: String,
        source: TransportError,
    },

    #[error("coordination store failed: {0}")]
    Store(#[from] StoreError),
}

impl PrimaryError {
    pub fn is_transient(&self) -> bool {
        match self {
            PrimaryError::NoRelayAvailable
            | PrimaryError::RelayOnCooldown { .. }
            | PrimaryError::Store(_) => true,
            PrimaryError::RelayTransport { source, .. } => source.is_timeout_class(),
            PrimaryError::NoRelaysConfigured
            | PrimaryError::PoolClosed
            | PrimaryError::HostNotRouted(_) => false,
        }
    }
}

/// Errors returned by [`crate::RoutingEngine::execute`].
///
/// Primary and fallback failures stay distinguishable: when the fallback was involved,
/// the primary cause travels along in `primary`.
#[derive(Error, Debug)]
pub enum RouteError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("{0}")]
    Primary(PrimaryError),

    #[error("{primary}; fallback not attempted: {reason}")]
    FallbackIneligible {
        primary: PrimaryError,
        reason: IneligibleReason,
    },

    #[error("{primary}; fallback failed: {source}")]
    Fallback {
        primary: PrimaryError,
        source: FallbackError,
    },

    #[error("request did not complete within {0:?}")]
    DeadlineExceeded(Duration),
}

impl RouteError {
    /// Whether retrying the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            RouteError::InvalidRequest(_) => false,
            RouteError::Primary(primary) => primary.is_transient(),
            RouteError::FallbackIneligible { primary, .. } => primary.is_transient(),
            RouteError::Fallback { source, .. } => source.is_transient(),
            RouteError::DeadlineExceeded(_) => true,
        }
    }

    /// The relay pool's part of the failure, if it was reached.
    pub fn primary(&self) -> Option<&PrimaryError> {
        match self {
            RouteError::Primary(primary)
            | RouteError::FallbackIneligible { primary, .. }
            | RouteError::Fallback { primary, .. } => Some(primary),
            RouteError::InvalidRequest(_) | RouteError::DeadlineExceeded(_) => None,
        }
    }

    /// True when the fallback was attempted and failed.
    pub fn is_fallback_failure(&self) -> bool {
        matches!(self, RouteError::Fallback { .. })
    }
}

/// Errors building the engine at startup. All of them are fatal.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("invalid engine config: {0}")]
    Config(#[from] ValidationError),

    #[error("could not build http client: {0}")]
    Client(#[from] reqwest::Error),
}
