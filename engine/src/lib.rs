//! Routes outbound HTTP requests through a pool of forwarding relays.
//!
//! Each request is classified into a logical endpoint, a relay is reserved for it
//! through the shared coordination store, and the request is sent through that relay's
//! pooled client. Timeout-class failures flag the relay unhealthy and allow one
//! reselection. When the pool cannot serve a request, an optional domain-based
//! fallback service is tried once.

pub mod classifier;
pub mod config;
pub mod engine;
pub mod errors;
pub mod fallback;
pub mod metrics_defs;
pub mod relays;
pub mod transport;

#[cfg(test)]
mod testutils;

pub use classifier::EndpointClassifier;
pub use config::{EngineConfig, ValidationError};
pub use engine::{RequestExecutor, RoutingEngine};
pub use errors::{BuildError, PrimaryError, RouteError};
pub use fallback::{FallbackClient, FallbackError, FallbackSettings, IneligibleReason};
pub use relays::{Relay, RelayPool};
