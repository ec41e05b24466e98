//! C1 — Listener: tuned-socket TCP accept with a concurrent-connection
//! ceiling and a live connection counter.
//!
//! Grounded on the raw tokio accept-loop idiom in the pack's daemon listener
//! example (`96a3122b_alfredjeanlab-oddjobs__crates-daemon-src-listener-mod.rs`)
//! and the connection-count guard idiom in the pack's router listener
//! example (`00f984c8_apollographql-router__...-listeners.rs`).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Socket, TcpKeepalive, Type};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{Error, Result};

/// Per-connection and listening-socket tuning options.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub tcp_nodelay: bool,
    pub keepalive: Option<Duration>,
    /// 0 means unlimited.
    pub connection_ceiling: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            tcp_nodelay: true,
            keepalive: Some(Duration::from_secs(60)),
            connection_ceiling: 0,
        }
    }
}

/// Releases its connection-ceiling slot and decrements the active counter
/// exactly once, however many times `close` is called or the guard is
/// dropped.
pub struct ConnectionGuard {
    active: Arc<AtomicI64>,
    _permit: Option<OwnedSemaphorePermit>,
    closed: AtomicBool,
}

impl ConnectionGuard {
    pub fn close(&self) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.active.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.close();
    }
}

/// A tuned TCP listener with an optional connection ceiling.
pub struct Listener {
    inner: TcpListener,
    ceiling: Option<Arc<Semaphore>>,
    active: Arc<AtomicI64>,
    total: Arc<AtomicU64>,
    config: ListenerConfig,
}

impl Listener {
    /// Binds `addr`, applying `SO_REUSEADDR` via `socket2`. If tuning the
    /// listening socket fails, falls back to a plain `TcpListener::bind`
    /// logged as a startup warning — per-connection tuning is attempted
    /// independently on every accepted stream.
    pub async fn bind(addr: SocketAddr, config: ListenerConfig) -> Result<Self> {
        let inner = match Self::bind_tuned(addr) {
            Ok(listener) => listener,
            Err(err) => {
                tracing::warn!(error = %err, "tuned listener setup failed, falling back to default accept loop");
                TcpListener::bind(addr)
                    .await
                    .map_err(|err| Error::internal(format!("bind failed: {err}")))?
            }
        };

        let ceiling = (config.connection_ceiling > 0)
            .then(|| Arc::new(Semaphore::new(config.connection_ceiling)));

        Ok(Self {
            inner,
            ceiling,
            active: Arc::new(AtomicI64::new(0)),
            total: Arc::new(AtomicU64::new(0)),
            config,
        })
    }

    fn bind_tuned(addr: SocketAddr) -> std::io::Result<TcpListener> {
        let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
        let socket = Socket::new(domain, Type::STREAM, None)?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        socket.listen(1024)?;
        TcpListener::from_std(socket.into())
    }

    /// Blocks until a connection-ceiling slot is free (if a ceiling is
    /// configured), then accepts. Applies per-connection tuning, which is
    /// best-effort: a failure here is logged and ignored, never fatal.
    pub async fn accept(&self) -> Result<(ConnectionGuard, TcpStream, SocketAddr)> {
        let permit = match &self.ceiling {
            Some(sem) => Some(
                sem.clone()
                    .acquire_owned()
                    .await
                    .map_err(|err| Error::internal(format!("connection semaphore closed: {err}")))?,
            ),
            None => None,
        };

        let (stream, peer) = match self.inner.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                // permit (if any) is released here via drop.
                return Err(Error::transient(format!("accept failed: {err}")));
            }
        };

        self.apply_connection_options(&stream);

        self.active.fetch_add(1, Ordering::AcqRel);
        self.total.fetch_add(1, Ordering::AcqRel);

        let guard = ConnectionGuard {
            active: self.active.clone(),
            _permit: permit,
            closed: AtomicBool::new(false),
        };

        Ok((guard, stream, peer))
    }

    fn apply_connection_options(&self, stream: &TcpStream) {
        if self.config.tcp_nodelay {
            if let Err(err) = stream.set_nodelay(true) {
                tracing::warn!(error = %err, "failed to set TCP_NODELAY on accepted connection");
            }
        }
        if let Some(keepalive) = self.config.keepalive {
            let sock = socket2::SockRef::from(stream);
            let params = TcpKeepalive::new().with_time(keepalive);
            if let Err(err) = sock.set_tcp_keepalive(&params) {
                tracing::warn!(error = %err, "failed to set keepalive on accepted connection");
            }
        }
    }

    #[must_use]
    pub fn active_connections(&self) -> i64 {
        self.active.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn total_connections(&self) -> u64 {
        self.total.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.inner
            .local_addr()
            .map_err(|err| Error::internal(format!("local_addr failed: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpStream as ClientStream;

    async fn bind_loopback(ceiling: usize) -> Listener {
        Listener::bind(
            "127.0.0.1:0".parse().unwrap(),
            ListenerConfig {
                connection_ceiling: ceiling,
                ..ListenerConfig::default()
            },
        )
        .await
        .expect("bind should succeed")
    }

    #[tokio::test]
    async fn double_close_is_idempotent() {
        let listener = bind_loopback(0).await;
        let addr = listener.local_addr().unwrap();
        let _client = ClientStream::connect(addr).await.unwrap();
        let (guard, _stream, _) = listener.accept().await.unwrap();
        assert_eq!(listener.active_connections(), 1);
        guard.close();
        guard.close();
        assert_eq!(listener.active_connections(), 0);
    }
}
