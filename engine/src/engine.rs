use crate::classifier::EndpointClassifier;
use crate::config::{EngineConfig, ValidationError};
use crate::errors::{BuildError, PrimaryError, RouteError};
use crate::fallback::{FallbackClient, FallbackError, FallbackSettings, IneligibleReason};
use crate::metrics_defs::{RELAY_REQUEST_DURATION, RELAY_RETRIES, ROUTE_ERRORS, ROUTE_REQUESTS};
use crate::relays::RelayPool;
use crate::transport::{ClientOptions, TransportError, TransportPool};
use async_trait::async_trait;
use bytes::Bytes;
use coordinator::{
    Clock, CoordinationStore, HealthTracker, PoolFingerprint, RotationCoordinator, Selection,
};
use http::request::Parts;
use http::{Request, Response};
use routing::is_same_or_subdomain;
use shared::{counter, histogram};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, timeout_at};

/// Relay attempts per request. A timeout-class failure allows one reselection.
const MAX_RELAY_ATTEMPTS: u8 = 2;

/// One stage of an outbound HTTP middleware chain.
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    async fn execute(&self, request: Request<Bytes>) -> Result<Response<Bytes>, RouteError>;
}

struct Endpoint {
    key: String,
    cooldown: Duration,
}

enum State {
    Classify,
    SelectRelay {
        endpoint: Endpoint,
        attempt: u8,
        previous: Option<PrimaryError>,
    },
    ExecuteRelay {
        endpoint: Endpoint,
        attempt: u8,
        relay: usize,
    },
    MarkUnhealthy {
        endpoint: Endpoint,
        attempt: u8,
        relay: usize,
        failure: PrimaryError,
    },
    TryFallback {
        primary: PrimaryError,
    },
    Done(Result<Response<Bytes>, RouteError>),
}

/// Routes requests through the relay pool and falls back to the forwarding service when
/// the pool cannot serve them.
///
/// Holds no mutable state of its own apart from the transport pool. Rotation, cooldowns
/// and health live in the coordination store, so any number of engines may share a pool.
pub struct RoutingEngine {
    relays: RelayPool,
    proxied_hosts: Vec<String>,
    classifier: EndpointClassifier,
    rotation: RotationCoordinator,
    health: HealthTracker,
    transport: TransportPool,
    fallback: Option<FallbackClient>,
    clock: Arc<dyn Clock>,
    request_timeout: Duration,
    attempt_timeout: Duration,
}

impl RoutingEngine {
    pub fn new(
        config: &EngineConfig,
        store: Arc<dyn CoordinationStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, BuildError> {
        config.validate()?;

        let relays = RelayPool::try_new(config.load_relays()?).map_err(ValidationError::from)?;
        let classifier = EndpointClassifier::new(&config.endpoints, config.default_cooldown())?;
        let options = ClientOptions::new(config.client.clone());
        let transport = TransportPool::new(&relays, &options)?;

        let fallback = match &config.fallback {
            Some(fallback) => FallbackSettings::from_config(fallback)?
                .map(|settings| FallbackClient::new(settings, &options))
                .transpose()?,
            None => None,
        };

        let pool = relays.fingerprint().clone();
        tracing::info!(
            %pool,
            relays = relays.len(),
            fallback = fallback.is_some(),
            "routing engine ready"
        );

        Ok(RoutingEngine {
            rotation: RotationCoordinator::new(store.clone(), pool.clone()),
            health: HealthTracker::new(store, pool, config.unhealthy_ttl()),
            proxied_hosts: config
                .proxied_hosts
                .iter()
                .map(|h| h.trim().to_ascii_lowercase())
                .collect(),
            relays,
            classifier,
            transport,
            fallback,
            clock,
            request_timeout: config.request_timeout(),
            attempt_timeout: config.relay_attempt_timeout(),
        })
    }

    /// Replaces the fallback client built from the configuration.
    pub fn with_fallback(mut self, fallback: Option<FallbackClient>) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn relays(&self) -> &RelayPool {
        &self.relays
    }

    pub fn fingerprint(&self) -> &PoolFingerprint {
        self.relays.fingerprint()
    }

    /// Routes a request within the configured request timeout.
    pub async fn execute(&self, request: Request<Bytes>) -> Result<Response<Bytes>, RouteError> {
        self.execute_until(request, Instant::now() + self.request_timeout)
            .await
    }

    /// Routes a request with a caller deadline. The configured request timeout still
    /// applies when it ends earlier.
    pub async fn execute_until(
        &self,
        request: Request<Bytes>,
        deadline: Instant,
    ) -> Result<Response<Bytes>, RouteError> {
        counter!(ROUTE_REQUESTS).increment(1);

        let now = Instant::now();
        let deadline = deadline.min(now + self.request_timeout);
        let budget = deadline.saturating_duration_since(now);
        let (parts, body) = request.into_parts();

        let result = match timeout_at(deadline, self.route(&parts, &body, deadline, budget)).await
        {
            Ok(result) => result,
            Err(_) => Err(RouteError::DeadlineExceeded(budget)),
        };

        if let Err(err) = &result {
            counter!(ROUTE_ERRORS).increment(1);
            tracing::debug!(uri = %parts.uri, error = %err, "request failed");
        }
        result
    }

    /// Releases every pooled relay connection. Later requests skip the relay pool, without
    /// reserving a relay, and go to the fallback.
    pub fn cleanup(&self) -> bool {
        self.transport.cleanup()
    }

    async fn route(
        &self,
        parts: &Parts,
        body: &Bytes,
        deadline: Instant,
        budget: Duration,
    ) -> Result<Response<Bytes>, RouteError> {
        let host = parts
            .uri
            .host()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| RouteError::InvalidRequest(format!("{} has no host", parts.uri)))?;

        let mut state = State::Classify;
        loop {
            state = match state {
                State::Classify => self.classify(host, parts.uri.path()),
                State::SelectRelay {
                    endpoint,
                    attempt,
                    previous,
                } => self.select(endpoint, attempt, previous).await,
                State::ExecuteRelay {
                    endpoint,
                    attempt,
                    relay,
                } => {
                    self.execute_relay(endpoint, attempt, relay, parts, body, deadline, budget)
                        .await
                }
                State::MarkUnhealthy {
                    endpoint,
                    attempt,
                    relay,
                    failure,
                } => {
                    self.health.mark_unhealthy(relay).await;
                    if attempt < MAX_RELAY_ATTEMPTS {
                        counter!(RELAY_RETRIES).increment(1);
                        State::SelectRelay {
                            endpoint,
                            attempt: attempt + 1,
                            previous: Some(failure),
                        }
                    } else {
                        State::TryFallback { primary: failure }
                    }
                }
                State::TryFallback { primary } => {
                    State::Done(self.try_fallback(primary, parts, body, deadline).await)
                }
                State::Done(result) => return result,
            };
        }
    }

    fn classify(&self, host: &str, path: &str) -> State {
        if self.relays.is_empty() {
            return State::TryFallback {
                primary: PrimaryError::NoRelaysConfigured,
            };
        }
        if self.transport.is_closed() {
            return State::TryFallback {
                primary: PrimaryError::PoolClosed,
            };
        }
        if !self.is_routed(host) {
            return State::TryFallback {
                primary: PrimaryError::HostNotRouted(host.to_ascii_lowercase()),
            };
        }

        let (key, cooldown) = self.classifier.classify(host, path);
        State::SelectRelay {
            endpoint: Endpoint { key, cooldown },
            attempt: 1,
            previous: None,
        }
    }

    fn is_routed(&self, host: &str) -> bool {
        self.proxied_hosts.is_empty()
            || self
                .proxied_hosts
                .iter()
                .any(|suffix| is_same_or_subdomain(host, suffix))
    }

    // After a failed attempt the transport failure stays the primary cause, whatever the
    // reselection reports.
    async fn select(
        &self,
        endpoint: Endpoint,
        attempt: u8,
        previous: Option<PrimaryError>,
    ) -> State {
        let selection = self
            .rotation
            .select(
                &endpoint.key,
                self.relays.len(),
                self.clock.now_ms(),
                endpoint.cooldown,
            )
            .await;

        let primary = match selection {
            Ok(Selection::Selected(relay)) => {
                return State::ExecuteRelay {
                    endpoint,
                    attempt,
                    relay,
                };
            }
            Ok(Selection::OnCooldown(relay)) => PrimaryError::RelayOnCooldown { relay },
            Ok(Selection::NoHealthyRelay) => PrimaryError::NoRelayAvailable,
            Err(err) => PrimaryError::Store(err),
        };
        State::TryFallback {
            primary: previous.unwrap_or(primary),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_relay(
        &self,
        endpoint: Endpoint,
        attempt: u8,
        relay: usize,
        parts: &Parts,
        body: &Bytes,
        deadline: Instant,
        budget: Duration,
    ) -> State {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return State::Done(Err(RouteError::DeadlineExceeded(budget)));
        }

        let relay_name = match self.relays.get(relay) {
            Some(r) => r.to_string(),
            None => format!("#{relay}"),
        };

        // A clipped attempt that times out was cut short by the caller, not by the relay.
        let clipped = remaining < self.attempt_timeout;

        let started = std::time::Instant::now();
        let result = self
            .transport
            .send(relay, parts, body, self.attempt_timeout.min(remaining))
            .await;
        histogram!(RELAY_REQUEST_DURATION).record(started.elapsed().as_secs_f64());

        match result {
            Ok(response) => {
                tracing::debug!(
                    relay = %relay_name,
                    endpoint = %endpoint.key,
                    status = response.status().as_u16(),
                    attempt,
                    "relay request completed"
                );
                State::Done(Ok(response))
            }
            Err(TransportError::TimedOut(_)) if clipped => {
                tracing::debug!(
                    relay = %relay_name,
                    endpoint = %endpoint.key,
                    attempt,
                    "request deadline reached during relay attempt"
                );
                State::Done(Err(RouteError::DeadlineExceeded(budget)))
            }
            Err(source) if source.is_timeout_class() => {
                tracing::warn!(
                    relay = %relay_name,
                    endpoint = %endpoint.key,
                    error = %source,
                    attempt,
                    "relay request failed"
                );
                State::MarkUnhealthy {
                    endpoint,
                    attempt,
                    relay,
                    failure: PrimaryError::RelayTransport {
                        relay: relay_name,
                        source,
                    },
                }
            }
            Err(source) => State::Done(Err(RouteError::Primary(PrimaryError::RelayTransport {
                relay: relay_name,
                source,
            }))),
        }
    }

    async fn try_fallback(
        &self,
        primary: PrimaryError,
        parts: &Parts,
        body: &Bytes,
        deadline: Instant,
    ) -> Result<Response<Bytes>, RouteError> {
        let Some(fallback) = &self.fallback else {
            return Err(RouteError::FallbackIneligible {
                primary,
                reason: IneligibleReason::NotConfigured,
            });
        };

        match fallback.send(parts, body, deadline).await {
            Ok(response) => {
                tracing::debug!(uri = %parts.uri, %primary, "request served by fallback");
                Ok(response)
            }
            Err(FallbackError::Ineligible(reason)) => {
                Err(RouteError::FallbackIneligible { primary, reason })
            }
            Err(source) => Err(RouteError::Fallback { primary, source }),
        }
    }
}

#[async_trait]
impl RequestExecutor for RoutingEngine {
    async fn execute(&self, request: Request<Bytes>) -> Result<Response<Bytes>, RouteError> {
        RoutingEngine::execute(self, request).await
    }
}
