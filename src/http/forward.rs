//! Forwarding to backends.
//!
//! # Responsibilities
//! - Rewrite the request URI to the selected backend
//! - Strip hop-by-hop headers in both directions, append X-Forwarded-For
//! - Stream the backend response through the writer, flushing per frame
//! - Report connect failures out of band as [`ConnectivityFailure`]
//!
//! A backend that accepted the connection and then failed is not a
//! connectivity failure: the request may have reached the application, so it
//! is answered 502 through the writer and never replayed.

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{uri::PathAndQuery, Request, StatusCode, Uri, Version};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::config::schema::TimeoutConfig;
use crate::http::handler::{Handler, ResponseWriter};
use crate::http::headers::{append_forwarded_for, strip_hop_by_hop};
use crate::load_balancer::backend::Backend;
use crate::load_balancer::BackendTarget;
use crate::resilience::failure::{ConnectivityFailure, ServeError};

/// HTTP client forwarding requests to one backend at a time.
#[derive(Clone)]
pub struct Forwarder {
    client: Client<HttpConnector, Body>,
}

impl Forwarder {
    pub fn new(timeouts: &TimeoutConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_secs(timeouts.connect_secs)));
        connector.set_nodelay(true);

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(timeouts.idle_secs))
            .build(connector);

        Self { client }
    }

    /// Forward `req` to `backend`, writing the response to `rw`.
    pub async fn forward(
        &self,
        backend: &Backend,
        req: Request<Body>,
        rw: &mut dyn ResponseWriter,
    ) -> Result<(), ServeError> {
        let outbound = match outbound_request(backend, req) {
            Ok(outbound) => outbound,
            Err(e) => {
                tracing::warn!(backend = %backend, error = %e, "Could not build backend request");
                rw.set_status(StatusCode::BAD_REQUEST);
                return Ok(());
            }
        };

        let response = match self.client.request(outbound).await {
            Ok(response) => response,
            Err(e) if e.is_connect() => {
                tracing::debug!(backend = %backend, error = %e, "Backend connect failed");
                return Err(ConnectivityFailure::from_connect_error(e).into());
            }
            Err(e) => {
                tracing::warn!(backend = %backend, error = %e, "Backend request failed");
                rw.set_status(StatusCode::BAD_GATEWAY);
                return Ok(());
            }
        };

        let (mut parts, body) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);
        rw.set_status(parts.status);
        *rw.headers_mut() = parts.headers;

        stream_body(body, rw).await
    }
}

/// Relay a backend body frame by frame, flushing after each data frame.
/// Trailers are dropped.
async fn stream_body(mut body: Incoming, rw: &mut dyn ResponseWriter) -> Result<(), ServeError> {
    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(ServeError::interrupted)?;
        if let Ok(data) = frame.into_data() {
            if data.is_empty() {
                continue;
            }
            rw.write(data).await.map_err(ServeError::interrupted)?;
            rw.flush().await.map_err(ServeError::interrupted)?;
        }
    }
    Ok(())
}

impl std::fmt::Debug for Forwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Forwarder").finish_non_exhaustive()
    }
}

/// Build the request sent to `backend` from the inbound one.
fn outbound_request(
    backend: &Backend,
    req: Request<Body>,
) -> Result<Request<Body>, axum::http::Error> {
    let (mut parts, body) = req.into_parts();

    let path_and_query = parts
        .uri
        .path_and_query()
        .cloned()
        .unwrap_or_else(|| PathAndQuery::from_static("/"));
    parts.uri = Uri::builder()
        .scheme(backend.scheme().clone())
        .authority(backend.authority().clone())
        .path_and_query(path_and_query)
        .build()?;
    parts.version = Version::HTTP_11;

    strip_hop_by_hop(&mut parts.headers);
    parts.headers.remove(axum::http::header::HOST);
    if let Some(ConnectInfo(client)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
        append_forwarded_for(&mut parts.headers, *client);
    }

    Ok(Request::from_parts(parts, body))
}

/// Picks a backend per attempt and forwards to it.
pub struct LoadBalancedForwarder {
    target: Arc<dyn BackendTarget>,
    forwarder: Forwarder,
}

impl LoadBalancedForwarder {
    pub fn new(target: Arc<dyn BackendTarget>, forwarder: Forwarder) -> Self {
        Self { target, forwarder }
    }
}

#[async_trait]
impl Handler for LoadBalancedForwarder {
    async fn serve(
        &self,
        req: Request<Body>,
        rw: &mut dyn ResponseWriter,
    ) -> Result<(), ServeError> {
        let Some(backend) = self.target.select_next() else {
            return Err(ConnectivityFailure::no_backend().into());
        };
        tracing::debug!(backend = %backend, method = %req.method(), uri = %req.uri(), "Forwarding");
        self.forwarder.forward(&backend, req, rw).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::sink::testing::RecordingSink;
    use crate::load_balancer::BackendPool;
    use url::Url;

    fn backend(url: &str) -> Backend {
        Backend::new(Url::parse(url).unwrap()).unwrap()
    }

    #[test]
    fn rewrites_target_and_headers() {
        let mut req = Request::builder()
            .uri("/search?q=rust")
            .version(Version::HTTP_2)
            .header("host", "proxy.local")
            .header("connection", "keep-alive")
            .header("accept", "text/plain")
            .body(Body::empty())
            .unwrap();
        req.extensions_mut()
            .insert(ConnectInfo("10.1.2.3:40000".parse::<SocketAddr>().unwrap()));

        let out = outbound_request(&backend("http://127.0.0.1:3000"), req).unwrap();

        assert_eq!(out.uri(), "http://127.0.0.1:3000/search?q=rust");
        assert_eq!(out.version(), Version::HTTP_11);
        assert!(out.headers().get("host").is_none());
        assert!(out.headers().get("connection").is_none());
        assert_eq!(out.headers()["accept"], "text/plain");
        assert_eq!(out.headers()["x-forwarded-for"], "10.1.2.3");
    }

    #[test]
    fn missing_path_becomes_root() {
        let req = Request::builder()
            .uri("http://proxy.local")
            .body(Body::empty())
            .unwrap();
        let out = outbound_request(&backend("http://backend:8080"), req).unwrap();
        assert_eq!(out.uri(), "http://backend:8080/");
    }

    #[tokio::test]
    async fn empty_target_is_a_connectivity_failure() {
        let forwarder = LoadBalancedForwarder::new(
            Arc::new(BackendPool::new()),
            Forwarder::new(&TimeoutConfig::default()),
        );
        let mut sink = RecordingSink::new();

        let err = forwarder
            .serve(Request::new(Body::empty()), &mut sink)
            .await
            .unwrap_err();

        match err {
            ServeError::Connectivity(failure) => {
                assert_eq!(failure.status(), StatusCode::SERVICE_UNAVAILABLE)
            }
            other => panic!("expected connectivity failure, got {other}"),
        }
        assert!(sink.events.is_empty());
    }

    #[tokio::test]
    async fn backend_response_streams_through_the_writer() {
        use crate::http::sink::testing::SinkEvent;
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let _ = socket
                .write_all(
                    b"HTTP/1.1 201 Created\r\nConnection: close\r\nX-Backend: b1\r\n\
                      Transfer-Encoding: chunked\r\n\r\n5\r\nFULL \r\n4\r\nDATA\r\n0\r\n\r\n",
                )
                .await;
            let _ = socket.shutdown().await;
        });

        let forwarder = Forwarder::new(&TimeoutConfig::default());
        let mut sink = RecordingSink::new();
        forwarder
            .forward(
                &backend(&format!("http://{addr}")),
                Request::new(Body::empty()),
                &mut sink,
            )
            .await
            .unwrap();

        assert_eq!(sink.committed, Some(StatusCode::CREATED));
        assert_eq!(sink.body_str(), "FULL DATA");
        assert_eq!(sink.committed_headers["x-backend"], "b1");
        assert!(sink.committed_headers.get("connection").is_none());
        assert!(sink.committed_headers.get("transfer-encoding").is_none());
        assert_eq!(sink.events.last(), Some(&SinkEvent::Flush));
        assert!(sink
            .events
            .iter()
            .any(|e| matches!(e, SinkEvent::Data(d) if d.starts_with(b"FULL"))));
    }

    #[tokio::test]
    async fn refused_connection_is_a_connectivity_failure() {
        // Bind then drop so the port is known to be closed.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let forwarder = Forwarder::new(&TimeoutConfig::default());
        let mut sink = RecordingSink::new();
        let err = forwarder
            .forward(
                &backend(&format!("http://{addr}")),
                Request::new(Body::empty()),
                &mut sink,
            )
            .await
            .unwrap_err();

        assert!(err.is_connectivity());
        assert!(sink.events.is_empty());
    }
}
