//! Secondary route through a domain-based forwarding service.
//!
//! A request for `users.roblox.com/v1/users/1` is rewritten to
//! `{scheme}://users.{domain}/v1/users/1`, with every original header copied and the
//! shared secret added as an auth header. Only hosts under an allowed suffix qualify;
//! anything else is rejected before a permit is taken or a connection is opened.

use crate::config::{FallbackConfig, ValidationError};
use crate::metrics_defs::{
    FALLBACK_ERRORS, FALLBACK_IN_FLIGHT, FALLBACK_REJECTED, FALLBACK_REQUESTS,
};
use crate::transport::{ClientOptions, build_request, collect_response};
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::request::Parts;
use http::{Response, Uri};
use routing::is_same_or_subdomain;
use shared::{counter, gauge};
use std::fmt::Write as _;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::time::{Instant, timeout_at};

/// Fallback was not attempted. Not an operational failure.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IneligibleReason {
    #[error("fallback is not configured")]
    NotConfigured,
    #[error("request has no host")]
    MissingHost,
    #[error("host {0} is not eligible for fallback")]
    HostNotAllowed(String),
}

#[derive(Error, Debug)]
pub enum FallbackError {
    #[error("{0}")]
    Ineligible(IneligibleReason),
    #[error("timed out waiting for a fallback permit")]
    PermitTimeout,
    #[error("fallback limiter is closed")]
    LimiterClosed,
    #[error("fallback request timed out")]
    TimedOut,
    #[error("fallback request failed: {0}")]
    Request(#[from] reqwest::Error),
}

impl FallbackError {
    pub fn is_ineligible(&self) -> bool {
        matches!(self, FallbackError::Ineligible(_))
    }

    pub fn is_transient(&self) -> bool {
        match self {
            FallbackError::PermitTimeout | FallbackError::TimedOut => true,
            FallbackError::Request(err) => crate::transport::is_timeout_class(err),
            FallbackError::Ineligible(_) | FallbackError::LimiterClosed => false,
        }
    }
}

/// Validated fallback configuration.
#[derive(Debug, Clone)]
pub struct FallbackSettings {
    domain: String,
    secret: HeaderValue,
    auth_header: HeaderName,
    allowed_suffixes: Vec<String>,
    scheme: String,
    port: Option<u16>,
    max_concurrency: u32,
    permit_weight: u32,
}

impl FallbackSettings {
    /// `None` when the fallback is disabled.
    pub fn from_config(config: &FallbackConfig) -> Result<Option<Self>, ValidationError> {
        config.validate()?;
        if !config.is_enabled() {
            return Ok(None);
        }

        let mut secret = HeaderValue::from_str(&config.secret)
            .map_err(|_| ValidationError::InvalidFallbackSecret)?;
        secret.set_sensitive(true);
        let auth_header = HeaderName::from_bytes(config.auth_header.as_bytes())
            .map_err(|_| ValidationError::InvalidAuthHeader(config.auth_header.clone()))?;

        Ok(Some(FallbackSettings {
            domain: config.domain.trim().trim_matches('.').to_ascii_lowercase(),
            secret,
            auth_header,
            allowed_suffixes: config
                .allowed_suffixes
                .iter()
                .map(|s| s.trim().trim_matches('.').to_ascii_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
            scheme: config.scheme.clone(),
            port: config.port,
            max_concurrency: config.max_concurrency,
            permit_weight: config.permit_weight,
        }))
    }

    /// Target url on the fallback service, or why the request does not qualify.
    pub fn rewrite_url(&self, uri: &Uri) -> Result<String, IneligibleReason> {
        let host = uri
            .host()
            .map(|h| h.trim_end_matches('.').to_ascii_lowercase())
            .filter(|h| !h.is_empty())
            .ok_or(IneligibleReason::MissingHost)?;

        let suffix = self
            .allowed_suffixes
            .iter()
            .find(|suffix| is_same_or_subdomain(&host, suffix))
            .ok_or_else(|| IneligibleReason::HostNotAllowed(host.clone()))?;

        let mut url = format!("{}://", self.scheme);
        if host.len() > suffix.len() {
            // is_same_or_subdomain guarantees a '.' right before the suffix
            url.push_str(&host[..host.len() - suffix.len()]);
        }
        url.push_str(&self.domain);
        if let Some(port) = self.port {
            let _ = write!(url, ":{port}");
        }
        url.push_str(uri.path_and_query().map_or("/", |pq| pq.as_str()));

        Ok(url)
    }
}

pub struct FallbackClient {
    settings: FallbackSettings,
    client: reqwest::Client,
    permits: Semaphore,
}

impl FallbackClient {
    pub fn new(settings: FallbackSettings, options: &ClientOptions) -> Result<Self, reqwest::Error> {
        let client = options.builder().no_proxy().build()?;
        Ok(Self::from_parts(settings, client))
    }

    pub fn from_parts(settings: FallbackSettings, client: reqwest::Client) -> Self {
        let permits = Semaphore::new(settings.max_concurrency as usize);
        FallbackClient {
            settings,
            client,
            permits,
        }
    }

    pub fn settings(&self) -> &FallbackSettings {
        &self.settings
    }

    /// Sends the request through the fallback service.
    ///
    /// Waiting for a permit and the exchange itself both end at `deadline`. Any response
    /// is returned as is, whatever its status.
    pub async fn send(
        &self,
        parts: &Parts,
        body: &Bytes,
        deadline: Instant,
    ) -> Result<Response<Bytes>, FallbackError> {
        let url = match self.settings.rewrite_url(&parts.uri) {
            Ok(url) => url,
            Err(reason) => {
                counter!(FALLBACK_REJECTED).increment(1);
                tracing::debug!(uri = %parts.uri, %reason, "request not eligible for fallback");
                return Err(FallbackError::Ineligible(reason));
            }
        };

        let acquire = self.permits.acquire_many(self.settings.permit_weight);
        let permit = match timeout_at(deadline, acquire).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(FallbackError::LimiterClosed),
            Err(_) => {
                counter!(FALLBACK_ERRORS).increment(1);
                return Err(FallbackError::PermitTimeout);
            }
        };
        self.record_in_flight();
        counter!(FALLBACK_REQUESTS).increment(1);

        let result = timeout_at(deadline, self.exchange(&url, parts, body)).await;

        drop(permit);
        self.record_in_flight();

        match result {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(err)) => {
                counter!(FALLBACK_ERRORS).increment(1);
                tracing::error!(uri = %parts.uri, error = %err, "fallback request failed");
                Err(FallbackError::Request(err))
            }
            Err(_) => {
                counter!(FALLBACK_ERRORS).increment(1);
                tracing::error!(uri = %parts.uri, "fallback request timed out");
                Err(FallbackError::TimedOut)
            }
        }
    }

    async fn exchange(
        &self,
        url: &str,
        parts: &Parts,
        body: &Bytes,
    ) -> Result<Response<Bytes>, reqwest::Error> {
        let mut request = build_request(&self.client, url, parts, body)?;
        request
            .headers_mut()
            .insert(self.settings.auth_header.clone(), self.settings.secret.clone());

        let response = self.client.execute(request).await?;
        collect_response(response).await
    }

    fn record_in_flight(&self) {
        let in_use = self.settings.max_concurrency as usize - self.permits.available_permits();
        gauge!(FALLBACK_IN_FLIGHT).set(in_use as f64);
    }
}
