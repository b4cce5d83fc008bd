use crate::config::ClientConfig;
use crate::relays::RelayPool;
use arc_swap::ArcSwapOption;
use bytes::Bytes;
use http::request::Parts;
use http::Response;
use reqwest::cookie::Jar;
use reqwest::redirect::Policy;
use shared::http::{filter_hop_by_hop, forwardable_headers};
use std::error::Error as _;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("transport pool has been cleaned up")]
    Closed,

    #[error("no client for relay {0}")]
    UnknownRelay(usize),

    #[error("relay attempt timed out after {0:?}")]
    TimedOut(Duration),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
}

impl TransportError {
    /// Timeouts, refused or reset connections and DNS failures. Only these penalise a relay.
    pub fn is_timeout_class(&self) -> bool {
        match self {
            TransportError::TimedOut(_) => true,
            TransportError::Request(err) => is_timeout_class(err),
            TransportError::Closed | TransportError::UnknownRelay(_) => false,
        }
    }
}

pub(crate) fn is_timeout_class(err: &reqwest::Error) -> bool {
    if err.is_timeout() || err.is_connect() {
        return true;
    }

    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            return matches!(
                io_err.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::NotConnected
                    | io::ErrorKind::HostUnreachable
                    | io::ErrorKind::NetworkUnreachable
            );
        }
        source = cause.source();
    }
    false
}

/// Client settings shared by every relay client and the fallback client. Only the
/// proxy differs between them; redirect policy, cookie jar, user agent and idle pool
/// settings are the same everywhere.
#[derive(Clone)]
pub struct ClientOptions {
    config: ClientConfig,
    jar: Option<Arc<Jar>>,
}

impl ClientOptions {
    pub fn new(config: ClientConfig) -> Self {
        let jar = config.cookies.then(|| Arc::new(Jar::default()));
        ClientOptions { config, jar }
    }

    pub fn builder(&self) -> reqwest::ClientBuilder {
        let redirect = match self.config.max_redirects {
            0 => Policy::none(),
            max => Policy::limited(max),
        };

        let mut builder = reqwest::Client::builder()
            .redirect(redirect)
            .pool_idle_timeout(Duration::from_secs(self.config.pool_idle_timeout_secs))
            .pool_max_idle_per_host(self.config.pool_max_idle_per_host);

        if let Some(jar) = &self.jar {
            builder = builder.cookie_provider(jar.clone());
        }
        if let Some(user_agent) = &self.config.user_agent {
            builder = builder.user_agent(user_agent.as_str());
        }
        builder
    }
}

/// Rebuilds the caller's request on `client`. Hop-by-hop headers and Host are dropped.
pub(crate) fn build_request(
    client: &reqwest::Client,
    url: &str,
    parts: &Parts,
    body: &Bytes,
) -> Result<reqwest::Request, reqwest::Error> {
    client
        .request(parts.method.clone(), url)
        .headers(forwardable_headers(&parts.headers, parts.version))
        .body(body.clone())
        .build()
}

/// Reads the whole response body. Status codes are not interpreted.
pub(crate) async fn collect_response(
    response: reqwest::Response,
) -> Result<Response<Bytes>, reqwest::Error> {
    let status = response.status();
    let version = response.version();
    let mut headers = response.headers().clone();
    let body = response.bytes().await?;

    filter_hop_by_hop(&mut headers, version);

    let mut collected = Response::new(body);
    *collected.status_mut() = status;
    *collected.version_mut() = version;
    *collected.headers_mut() = headers;
    Ok(collected)
}

/// One pooled client per relay, indexed by relay position.
///
/// Reads are lock free. `cleanup` swaps the clients out; requests already holding a
/// client finish on it, later sends fail with [`TransportError::Closed`].
pub struct TransportPool {
    clients: ArcSwapOption<Vec<reqwest::Client>>,
}

impl TransportPool {
    pub fn new(relays: &RelayPool, options: &ClientOptions) -> Result<Self, reqwest::Error> {
        let clients = relays
            .iter()
            .map(|relay| {
                let proxy = reqwest::Proxy::all(relay.url().as_str())?;
                options.builder().proxy(proxy).build()
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(TransportPool {
            clients: ArcSwapOption::from_pointee(clients),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.clients.load().is_none()
    }

    /// Sends the request through one relay. `attempt_timeout` bounds the whole exchange,
    /// response body included.
    pub async fn send(
        &self,
        relay: usize,
        parts: &Parts,
        body: &Bytes,
        attempt_timeout: Duration,
    ) -> Result<Response<Bytes>, TransportError> {
        let clients = self.clients.load_full().ok_or(TransportError::Closed)?;
        let client = clients
            .get(relay)
            .ok_or(TransportError::UnknownRelay(relay))?;

        let request = build_request(client, &parts.uri.to_string(), parts, body)?;

        let exchange = async {
            let response = client.execute(request).await?;
            collect_response(response).await
        };

        timeout(attempt_timeout, exchange)
            .await
            .map_err(|_| TransportError::TimedOut(attempt_timeout))?
            .map_err(TransportError::from)
    }

    /// Drops every pooled client, closing idle connections. Returns false if the pool
    /// was already cleaned up.
    pub fn cleanup(&self) -> bool {
        match self.clients.swap(None) {
            Some(clients) => {
                tracing::info!(clients = clients.len(), "transport pool cleaned up");
                true
            }
            None => false,
        }
    }
}
