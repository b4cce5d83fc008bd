use crate::config::{ClientConfig, FallbackConfig};
use crate::fallback::{FallbackClient, FallbackSettings};
use crate::transport::ClientOptions;
use bytes::Bytes;
use http::Request;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Plain HTTP proxy stand-in. Answers every request itself, echoing what it received:
/// the `x-relay` header names the relay, the body is the absolute request uri.
pub async fn start_relay(name: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind to address");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            let io = TokioIo::new(stream);

            tokio::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| async move {
                    let mut response =
                        hyper::Response::new(Full::new(Bytes::from(req.uri().to_string())));
                    response
                        .headers_mut()
                        .insert("x-relay", name.parse().unwrap());
                    if let Some(auth) = req.headers().get("proxy-authorization") {
                        response
                            .headers_mut()
                            .insert("x-seen-proxy-authorization", auth.clone());
                    }
                    if let Some(value) = req.headers().get("x-custom") {
                        response.headers_mut().insert("x-custom", value.clone());
                    }
                    Ok::<_, Infallible>(response)
                });
                let _ = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                    .serve_connection(io, service)
                    .await;
            });
        }
    });

    addr
}

/// An address nothing listens on.
pub async fn closed_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// Accepts connections and never answers.
pub async fn start_silent_relay() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut open = Vec::new();
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            open.push(stream);
        }
    });
    addr
}

/// Fallback service stand-in. Counts requests in `hits` and echoes what it received:
/// the body is the path and query, `x-seen-host` and `x-seen-secret` carry the Host and
/// auth headers. Paths under `/unavailable` answer 503.
pub async fn start_fallback(hits: Arc<AtomicUsize>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind to address");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            let io = TokioIo::new(stream);
            let hits = hits.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    hits.fetch_add(1, Ordering::SeqCst);
                    async move {
                        let path = req
                            .uri()
                            .path_and_query()
                            .map(|pq| pq.as_str().to_string())
                            .unwrap_or_default();
                        let mut response = hyper::Response::new(Full::new(Bytes::from(path.clone())));
                        if path.starts_with("/unavailable") {
                            *response.status_mut() = hyper::StatusCode::SERVICE_UNAVAILABLE;
                        }
                        let headers = req.headers();
                        for (seen, name) in [
                            ("x-seen-host", "host"),
                            ("x-seen-secret", "x-proxy-secret"),
                            ("x-custom", "x-custom"),
                        ] {
                            if let Some(value) = headers.get(name) {
                                response.headers_mut().insert(seen, value.clone());
                            }
                        }
                        Ok::<_, Infallible>(response)
                    }
                });
                let _ = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                    .serve_connection(io, service)
                    .await;
            });
        }
    });

    addr
}

/// Fallback client for `roproxy.test` whose subdomains used in tests resolve to `addr`.
/// Only hosts under `roblox.com` qualify.
pub fn fallback_client(addr: SocketAddr, max_concurrency: u32) -> FallbackClient {
    let config = FallbackConfig {
        domain: "roproxy.test".into(),
        secret: "s3cret".into(),
        allowed_suffixes: vec!["roblox.com".into()],
        scheme: "http".into(),
        port: Some(addr.port()),
        max_concurrency,
        ..Default::default()
    };
    let settings = FallbackSettings::from_config(&config).unwrap().unwrap();
    let client = ClientOptions::new(ClientConfig::default())
        .builder()
        .no_proxy()
        .resolve("users.roproxy.test", addr)
        .resolve("games.roproxy.test", addr)
        .resolve("roproxy.test", addr)
        .build()
        .unwrap();
    FallbackClient::from_parts(settings, client)
}

/// Reads the request and answers with something that is not HTTP.
pub async fn start_garbage_relay() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let (mut stream, _) = listener.accept().await.unwrap();
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let _ = stream.read(&mut buf).await;
                let _ = stream.write_all(b"garbage\r\n\r\n").await;
                let _ = stream.shutdown().await;
            });
        }
    });
    addr
}
