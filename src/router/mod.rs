//! C2 — Router: compiled patterns, middleware-snapshot-at-registration
//! chains, and a frozen-after-startup, atomically-published route table.
//!
//! Grounded on the lock-free publish idiom used for `ArcSwap<TrafficSnapshot>`
//! in the pack's traffic-manager example; the hexagonal error style follows
//! the teacher's `domain::error::Error`.

mod pattern;

pub use pattern::Pattern;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{Error, Result};

/// A request as seen by the router: method, path, path params already
/// extracted by the matching pattern, headers, and body.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub params: std::collections::HashMap<String, String>,
    pub headers: http::HeaderMap,
    pub body: Bytes,
}

impl Request {
    #[must_use]
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            params: std::collections::HashMap::new(),
            headers: http::HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

/// A response produced by a handler or middleware short-circuit.
///
/// `redirect`, when present, is written as the `Location` header before the
/// status line — a client following the response sees the redirect target
/// regardless of the status code chosen.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub body: Bytes,
    pub redirect: Option<String>,
}

impl Response {
    #[must_use]
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
            redirect: None,
        }
    }

    #[must_use]
    pub fn redirect(status: u16, location: impl Into<String>) -> Self {
        Self {
            status,
            body: Bytes::new(),
            redirect: Some(location.into()),
        }
    }

    #[must_use]
    pub fn not_found() -> Self {
        Self::new(404, Bytes::from_static(b"not found"))
    }

    #[must_use]
    pub fn no_content() -> Self {
        Self::new(204, Bytes::new())
    }
}

/// One link in a route's dispatch chain: either shared middleware or a
/// terminal handler. Both share this trait so a chain is just an ordered
/// `Vec<Arc<dyn Link>>`.
#[async_trait]
pub trait Link: Send + Sync {
    async fn call(&self, req: &Request, next: Next<'_>) -> Response;
}

/// The remaining portion of a dispatch chain, handed to the current link so
/// it can continue (`next.run(req).await`) or short-circuit by returning its
/// own `Response` without calling `next` at all.
pub struct Next<'a> {
    remaining: &'a [Arc<dyn Link>],
}

impl<'a> Next<'a> {
    #[must_use]
    pub fn new(remaining: &'a [Arc<dyn Link>]) -> Self {
        Self { remaining }
    }

    pub async fn run(self, req: &Request) -> Response {
        match self.remaining.split_first() {
            Some((link, rest)) => link.call(req, Next::new(rest)).await,
            None => Response::no_content(),
        }
    }
}

/// Wraps a synchronous closure as a `Link`, for simple handlers and tests.
pub struct FnLink<F>(F)
where
    F: Fn(&Request) -> Response + Send + Sync;

impl<F> FnLink<F>
where
    F: Fn(&Request) -> Response + Send + Sync,
{
    pub fn new(f: F) -> Arc<dyn Link> {
        Arc::new(Self(f))
    }
}

#[async_trait]
impl<F> Link for FnLink<F>
where
    F: Fn(&Request) -> Response + Send + Sync,
{
    async fn call(&self, req: &Request, _next: Next<'_>) -> Response {
        (self.0)(req)
    }
}

struct Route {
    pattern: Pattern,
    chain: Vec<Arc<dyn Link>>,
}

/// Atomically-published `{middleware, route}` snapshot. `middleware` is
/// retained for introspection; it plays no part in dispatch since every
/// route's chain already has its middleware baked in at registration time.
struct RouteTable {
    middleware: Vec<Arc<dyn Link>>,
    routes: Vec<Arc<Route>>,
}

impl RouteTable {
    fn empty() -> Self {
        Self {
            middleware: Vec::new(),
            routes: Vec::new(),
        }
    }
}

/// The router itself: a lock-free read path over an `ArcSwap` snapshot, and
/// a mutex-serialized write path for registration.
pub struct Router {
    table: ArcSwap<RouteTable>,
    frozen: AtomicBool,
    writer: Mutex<()>,
    prefix: String,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    #[must_use]
    pub fn new() -> Self {
        Self {
            table: ArcSwap::from_pointee(RouteTable::empty()),
            frozen: AtomicBool::new(false),
            writer: Mutex::new(()),
            prefix: String::new(),
        }
    }

    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    fn ensure_unfrozen(&self) -> Result<()> {
        if self.is_frozen() {
            Err(Error::programmer_error("router is frozen; registration rejected"))
        } else {
            Ok(())
        }
    }

    /// Appends shared middleware. Only routes registered *after* this call
    /// observe it — earlier routes already captured their own snapshot.
    pub fn use_mw(&self, mw: Arc<dyn Link>) -> Result<()> {
        self.ensure_unfrozen()?;
        let _guard = self.writer.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        self.ensure_unfrozen()?;
        let current = self.table.load();
        let mut middleware = current.middleware.clone();
        middleware.push(mw);
        let routes = current.routes.clone();
        self.table.store(Arc::new(RouteTable { middleware, routes }));
        Ok(())
    }

    /// Compiles `pattern` and registers a route whose chain is the
    /// middleware snapshot captured right now, followed by `handlers`.
    pub fn route(&self, pattern: &str, handlers: Vec<Arc<dyn Link>>) -> Result<()> {
        self.ensure_unfrozen()?;
        let _guard = self.writer.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        self.ensure_unfrozen()?;

        let mut compiled = Pattern::compile(pattern)?;
        if !self.prefix.is_empty() {
            compiled = Pattern::compile(&format!("{} {}{}", compiled.method(), self.prefix, compiled.raw_path()))?;
        }

        let current = self.table.load();
        if current.routes.iter().any(|route| route.pattern == compiled) {
            return Err(Error::programmer_error(format!(
                "duplicate route pattern: {} {}",
                compiled.method(),
                compiled.raw_path()
            )));
        }

        let mut chain = current.middleware.clone();
        chain.extend(handlers);

        let mut routes = current.routes.clone();
        routes.push(Arc::new(Route { pattern: compiled, chain }));

        self.table.store(Arc::new(RouteTable {
            middleware: current.middleware.clone(),
            routes,
        }));
        Ok(())
    }

    /// One-way transition after which `use_mw`/`route` are rejected.
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }

    /// Produces an independent child router seeded with this router's
    /// current middleware snapshot, whose routes are registered under
    /// `prefix`. The child has its own table and its own frozen flag; it is
    /// the caller's responsibility to freeze it alongside the parent.
    #[must_use]
    pub fn group(&self, prefix: &str) -> Router {
        let current = self.table.load();
        Router {
            table: ArcSwap::from_pointee(RouteTable {
                middleware: current.middleware.clone(),
                routes: Vec::new(),
            }),
            frozen: AtomicBool::new(false),
            writer: Mutex::new(()),
            prefix: format!("{}{}", self.prefix, prefix),
        }
    }

    /// Matches and runs the first route whose pattern matches `method`
    /// and `path`; returns `404` if none match. This never takes a lock.
    pub async fn dispatch(&self, method: &str, path: &str, mut req: Request) -> Response {
        let table = self.table.load();
        for route in &table.routes {
            if let Some(params) = route.pattern.matches(method, path) {
                req.params = params.into_iter().collect();
                return Next::new(&route.chain).run(&req).await;
            }
        }
        Response::not_found()
    }

    #[must_use]
    pub fn route_count(&self) -> usize {
        self.table.load().routes.len()
    }
}
