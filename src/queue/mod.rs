//! C5 — Event Queue: durable at-least-once enqueue/claim/complete/fail with
//! visibility timeouts, dispatched by type via a handler registry.
//!
//! Grounded on the port shape of the teacher's `outbound::queue::StubRouteQueue`
//! (an explicit placeholder adapter, warned-on-fallback) and the retry/backoff
//! idiom of `domain::overpass_enrichment_worker`. The single-instance, in-process
//! store below is the shipped reference adapter — `spec.md` §1 explicitly
//! places SQL wiring for persistence out of scope, and §1's Non-goals scope the
//! queue to single-instance semantics, which an in-process store already meets.

mod dispatcher;
mod memory;

pub use dispatcher::{Dispatcher, Handler, HandlerFuture};
pub use memory::InMemoryQueue;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueItemStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Dead,
}

/// One durable work item. See `spec.md` §3 "Queue Item".
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub id: Uuid,
    pub item_type: String,
    pub payload: Value,
    pub status: QueueItemStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub visible_at: DateTime<Utc>,
    pub visibility_timeout_secs: i64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub worker_id: Option<String>,
}

/// Parameters accepted by `EventQueue::enqueue`.
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub item_type: String,
    pub payload: Value,
    pub max_retries: u32,
    pub visibility_timeout_secs: i64,
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl EnqueueRequest {
    #[must_use]
    pub fn new(item_type: impl Into<String>, payload: Value) -> Self {
        Self {
            item_type: item_type.into(),
            payload,
            max_retries: 3,
            visibility_timeout_secs: 300,
            scheduled_at: None,
        }
    }
}

/// The C5 contract. `spec.md` §4.5.
#[async_trait]
pub trait EventQueue: Send + Sync {
    async fn enqueue(&self, request: EnqueueRequest) -> Result<Uuid>;
    async fn claim_next(&self, worker_id: &str) -> Result<Option<QueueItem>>;
    async fn complete(&self, id: Uuid, worker_id: &str) -> Result<()>;
    async fn fail(&self, id: Uuid, worker_id: &str, message: &str, backoff_secs: i64) -> Result<()>;
    async fn list_by_type(&self, item_type: &str, limit: usize) -> Result<Vec<QueueItem>>;
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// `backoff_secs = base * 2^retry_count`, per `spec.md` §4.5.
#[must_use]
pub fn dispatcher_backoff_secs(base_secs: u64, retry_count: u32) -> u64 {
    let exponent = 2_u64.saturating_pow(retry_count);
    base_secs.saturating_mul(exponent)
}

pub type HandlerRegistry = HashMap<String, std::sync::Arc<dyn Handler>>;
