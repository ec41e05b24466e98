//! C3 — HTTP Service: owns the server lifecycle (TLS bootstrap, freeze +
//! serve, graceful shutdown, connection-state metrics). Consumes C1 and C2.
//!
//! Grounded on the teacher's bootstrap shape in `main.rs`/`server/mod.rs`
//! (tracing init before serving, a `create_server` entry point, logging
//! final state on shutdown) and on the hyper connection-serving idiom in the
//! pack's router listener example.

pub mod tls;

use std::convert::Infallible;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper_util::rt::TokioIo;
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::error::Result;
use crate::listener::{Listener, ListenerConfig};
use crate::metrics::Metrics;
use crate::router::{Request as RouterRequest, Router};
use tls::TlsMode;

/// Configuration for a single `HttpService::serve` run.
pub struct HttpServiceConfig {
    pub bind_addr: SocketAddr,
    pub tls: TlsMode,
    pub listener: ListenerConfig,
    pub shutdown_deadline: Duration,
}

/// Owns the accept loop, TLS bootstrap, and graceful shutdown around a
/// frozen `Router`.
pub struct HttpService {
    router: Arc<Router>,
    metrics: Arc<dyn Metrics>,
}

impl HttpService {
    #[must_use]
    pub fn new(router: Arc<Router>, metrics: Arc<dyn Metrics>) -> Self {
        Self { router, metrics }
    }

    /// Freezes the router, binds the listener, and serves until `shutdown`
    /// is cancelled. Serve errors other than accept-loop termination are
    /// logged, never panicked on.
    pub async fn serve(&self, config: HttpServiceConfig, shutdown: CancellationToken) -> Result<()> {
        self.router.freeze();

        let acceptor = tls::build_acceptor(&config.tls)?;
        if acceptor.is_none() {
            tracing::warn!("serving HTTP only: TLS not configured, HTTP/2 is disabled");
        }

        let listener = Arc::new(Listener::bind(config.bind_addr, config.listener).await?);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                accepted = listener.accept() => {
                    match accepted {
                        Ok((guard, stream, peer)) => {
                            self.metrics.http_connection_opened();
                            self.spawn_connection(stream, peer, acceptor.clone(), guard);
                        }
                        Err(err) => {
                            tracing::error!(error = %err, "accept failed");
                        }
                    }
                }
            }
        }

        tokio::select! {
            () = drain(&listener) => {
                tracing::info!("graceful shutdown completed");
            }
            () = tokio::time::sleep(config.shutdown_deadline) => {
                tracing::error!("shutdown deadline exceeded; abandoning in-flight connections");
            }
        }

        tracing::info!(
            active = listener.active_connections(),
            total = listener.total_connections(),
            "http service stopped"
        );
        Ok(())
    }

    fn spawn_connection(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        acceptor: Option<TlsAcceptor>,
        guard: crate::listener::ConnectionGuard,
    ) {
        let router = self.router.clone();
        let metrics = self.metrics.clone();

        let task = async move {
            let _guard = guard;
            let io_result: std::io::Result<MaybeTlsStream> = match acceptor {
                Some(acceptor) => acceptor
                    .accept(stream)
                    .await
                    .map(|tls_stream| MaybeTlsStream::Tls(Box::new(tls_stream))),
                None => Ok(MaybeTlsStream::Plain(stream)),
            };

            let stream = match io_result {
                Ok(stream) => stream,
                Err(err) => {
                    tracing::warn!(error = %err, peer = %peer, "TLS handshake failed");
                    metrics.http_connection_closed();
                    return;
                }
            };

            let io = TokioIo::new(stream);
            let service = hyper::service::service_fn(move |req| handle_request(router.clone(), req));

            let conn = AutoBuilder::new(hyper_util::rt::TokioExecutor::new()).serve_connection(io, service);
            if let Err(err) = conn.await {
                tracing::debug!(error = %err, peer = %peer, "connection ended with error");
            }
            metrics.http_connection_closed();
        };

        tokio::spawn(task);
    }
}

/// Polls the listener's active-connection count down to zero. Driven by the
/// same counter C1 exposes for observability, rather than a second
/// bookkeeping structure.
async fn drain(listener: &Listener) {
    while listener.active_connections() > 0 {
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

async fn handle_request(
    router: Arc<Router>,
    req: hyper::Request<Incoming>,
) -> std::result::Result<hyper::Response<Full<Bytes>>, Infallible> {
    use http_body_util::BodyExt;

    let method = req.method().as_str().to_owned();
    let path = req.uri().path().to_owned();
    let headers = req.headers().clone();
    let body = req
        .into_body()
        .collect()
        .await
        .map(http_body_util::combinators::Collected::to_bytes)
        .unwrap_or_default();

    let trace_id = Uuid::new_v4().to_string();
    let router_request = RouterRequest {
        method: method.clone(),
        path: path.clone(),
        params: std::collections::HashMap::new(),
        headers,
        body,
    };

    let span = tracing::info_span!("request", %trace_id, %method, %path);
    let response = router.dispatch(&method, &path, router_request).instrument(span).await;

    let mut builder = hyper::Response::builder().status(response.status);
    if let Some(location) = &response.redirect {
        builder = builder.header(hyper::header::LOCATION, location.clone());
    }
    builder = builder.header("trace-id", trace_id);

    Ok(builder
        .body(Full::new(response.body))
        .unwrap_or_else(|_| hyper::Response::new(Full::new(Bytes::new()))))
}

/// A connection that may or may not be TLS-wrapped, unified behind one
/// `AsyncRead + AsyncWrite` type so the connection-serving code path does
/// not need to branch on TLS mode.
enum MaybeTlsStream {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::server::TlsStream<TcpStream>>),
}

impl AsyncRead for MaybeTlsStream {
    fn poll_read(self: Pin<&mut Self>, cx: &mut TaskContext<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            MaybeTlsStream::Tls(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeTlsStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut TaskContext<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            MaybeTlsStream::Tls(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_flush(cx),
            MaybeTlsStream::Tls(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            MaybeTlsStream::Tls(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::noop;
    use crate::router::{FnLink, Response as RouterResponse};
    use std::time::Duration as StdDuration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn serve_handles_one_request_then_shuts_down_gracefully() {
        let router = Arc::new(Router::new());
        router
            .route(
                "GET /ping",
                vec![FnLink::new(|_req| RouterResponse::new(200, Bytes::from_static(b"pong")))],
            )
            .expect("route registration");

        let service = HttpService::new(router.clone(), noop());
        let shutdown = CancellationToken::new();

        let config = HttpServiceConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            tls: TlsMode::None,
            listener: ListenerConfig::default(),
            shutdown_deadline: StdDuration::from_secs(2),
        };

        // Bind separately first so the test can discover the ephemeral port.
        let probe = Listener::bind(config.bind_addr, ListenerConfig::default())
            .await
            .expect("probe bind");
        let addr = probe.local_addr().expect("local addr");
        drop(probe);

        let config = HttpServiceConfig { bind_addr: addr, ..config };
        let shutdown_for_serve = shutdown.clone();
        let serve_task = tokio::spawn(async move { service.serve(config, shutdown_for_serve).await });

        // Give the accept loop a moment to bind.
        tokio::time::sleep(StdDuration::from_millis(50)).await;

        let mut client = TcpStream::connect(addr).await.expect("client connect");
        client
            .write_all(b"GET /ping HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .expect("write request");
        let mut response = Vec::new();
        client.read_to_end(&mut response).await.expect("read response");
        let response = String::from_utf8_lossy(&response);
        assert!(response.contains("200"));
        assert!(response.contains("pong"));

        shutdown.cancel();
        let result = tokio::time::timeout(StdDuration::from_secs(2), serve_task)
            .await
            .expect("serve should stop within deadline")
            .expect("serve task should not panic");
        assert!(result.is_ok());
    }
}
