//! Claims items from an `EventQueue`, dispatches them to a type-keyed
//! handler registry under a timeout, and reports the outcome back to the
//! queue. Runs as an ordinary supervised worker (`crate::supervisor::WorkerFn`).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::{EventQueue, QueueItem};
use crate::error::Result;
use crate::metrics::Metrics;
use crate::supervisor::HeartbeatSender;

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// A unit of work registered against one queue item type.
pub trait Handler: Send + Sync {
    fn call(&self, payload: Value) -> HandlerFuture;
}

impl<F, Fut> Handler for F
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn call(&self, payload: Value) -> HandlerFuture {
        Box::pin(self(payload))
    }
}

/// Claims one item per tick, invokes its handler, and completes or fails it.
/// Built to be handed to `Supervisor::run` as the worker closure.
pub struct Dispatcher {
    worker_id: String,
    queue: Arc<dyn EventQueue>,
    handlers: HashMap<String, Arc<dyn Handler>>,
    metrics: Arc<dyn Metrics>,
    poll_interval: Duration,
    default_backoff_secs: u64,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        worker_id: impl Into<String>,
        queue: Arc<dyn EventQueue>,
        handlers: HashMap<String, Arc<dyn Handler>>,
    ) -> Self {
        Self::with_metrics(worker_id, queue, handlers, crate::metrics::noop())
    }

    #[must_use]
    pub fn with_metrics(
        worker_id: impl Into<String>,
        queue: Arc<dyn EventQueue>,
        handlers: HashMap<String, Arc<dyn Handler>>,
        metrics: Arc<dyn Metrics>,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            queue,
            handlers,
            metrics,
            poll_interval: Duration::from_millis(100),
            default_backoff_secs: 4,
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Runs until `cancel` fires. Sends a liveness heartbeat every tick so the
    /// enclosing supervisor can tell the dispatch loop apart from a hang.
    pub async fn run(&self, cancel: CancellationToken, heartbeat: HeartbeatSender) {
        loop {
            if cancel.is_cancelled() {
                return;
            }
            heartbeat.liveness();

            match self.queue.claim_next(&self.worker_id).await {
                Ok(Some(item)) => self.dispatch_one(item, &heartbeat).await,
                Ok(None) => {
                    tokio::select! {
                        () = cancel.cancelled() => return,
                        () = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
                Err(err) => {
                    tracing::error!(error = %err, "queue claim failed");
                    tokio::select! {
                        () = cancel.cancelled() => return,
                        () = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
            }
        }
    }

    async fn dispatch_one(&self, item: QueueItem, heartbeat: &HeartbeatSender) {
        let Some(handler) = self.handlers.get(&item.item_type).cloned() else {
            tracing::warn!(item_type = %item.item_type, id = %item.id, "no handler registered for queue item type");
            let _ = self
                .queue
                .fail(item.id, &self.worker_id, "unregistered item type", self.backoff_for(&item))
                .await;
            self.record_failure(&item);
            return;
        };

        // The item's own visibility timeout, not a dispatcher-wide constant:
        // a shorter timeout must bound its handler, or the item becomes
        // visible to another worker while this one is still running it.
        let timeout = Duration::from_secs(item.visibility_timeout_secs.max(0) as u64);
        let payload = item.payload.clone();
        let outcome = tokio::time::timeout(timeout, tokio::spawn(async move { handler.call(payload).await })).await;

        heartbeat.progress(1);

        match outcome {
            Ok(Ok(Ok(()))) => {
                let _ = self.queue.complete(item.id, &self.worker_id).await;
                self.metrics.queue_item_completed(&item.item_type);
            }
            Ok(Ok(Err(err))) => {
                let _ = self.queue.fail(item.id, &self.worker_id, err.message(), self.backoff_for(&item)).await;
                self.record_failure(&item);
            }
            Ok(Err(join_error)) => {
                let message = format!("worker-panicked: {join_error}");
                let _ = self.queue.fail(item.id, &self.worker_id, &message, self.backoff_for(&item)).await;
                self.record_failure(&item);
            }
            Err(_elapsed) => {
                let _ = self
                    .queue
                    .fail(item.id, &self.worker_id, "handler exceeded visibility timeout", self.backoff_for(&item))
                    .await;
                self.record_failure(&item);
            }
        }
    }

    /// Records whether this failure retried or killed the item, mirroring
    /// the `retry_count > max_retries` check `EventQueue::fail` applies.
    fn record_failure(&self, item: &QueueItem) {
        if item.retry_count + 1 > item.max_retries {
            self.metrics.queue_item_dead(&item.item_type);
        } else {
            self.metrics.queue_item_failed(&item.item_type);
        }
    }

    fn backoff_for(&self, item: &QueueItem) -> i64 {
        super::dispatcher_backoff_secs(self.default_backoff_secs, item.retry_count) as i64
    }
}
