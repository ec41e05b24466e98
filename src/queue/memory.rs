//! In-process `EventQueue` adapter backed by `dashmap`. Single-instance
//! semantics only — no cross-process visibility, matching the queue's
//! stated scope.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use dashmap::DashMap;
use mockable::Clock;
use uuid::Uuid;

use super::{EnqueueRequest, EventQueue, QueueItem, QueueItemStatus};
use crate::error::Result;
use crate::metrics::Metrics;

pub struct InMemoryQueue {
    items: DashMap<Uuid, QueueItem>,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn Metrics>,
}

impl InMemoryQueue {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_metrics(clock, crate::metrics::noop())
    }

    #[must_use]
    pub fn with_metrics(clock: Arc<dyn Clock>, metrics: Arc<dyn Metrics>) -> Self {
        Self { items: DashMap::new(), clock, metrics }
    }
}

#[async_trait]
impl EventQueue for InMemoryQueue {
    async fn enqueue(&self, request: EnqueueRequest) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let now = self.clock.utc();
        let item_type = request.item_type.clone();
        let item = QueueItem {
            id,
            item_type: request.item_type,
            payload: request.payload,
            status: QueueItemStatus::Pending,
            retry_count: 0,
            max_retries: request.max_retries,
            visible_at: request.scheduled_at.unwrap_or(now),
            visibility_timeout_secs: request.visibility_timeout_secs,
            started_at: None,
            completed_at: None,
            failed_at: None,
            last_error: None,
            worker_id: None,
        };
        self.items.insert(id, item);
        self.metrics.queue_item_enqueued(&item_type);
        Ok(id)
    }

    async fn claim_next(&self, worker_id: &str) -> Result<Option<QueueItem>> {
        let now = self.clock.utc();

        // Scanning the map and mutating the winning entry are necessarily two
        // separate steps with `dashmap`, so the scan only produces a
        // candidate ordering; it proves nothing about an entry's status by
        // the time we reach it below.
        let mut candidates: Vec<(chrono::DateTime<chrono::Utc>, Uuid)> = self
            .items
            .iter()
            .filter(|entry| {
                let item = entry.value();
                matches!(item.status, QueueItemStatus::Pending) && item.visible_at <= now
            })
            .map(|entry| (entry.value().visible_at, entry.value().id))
            .collect();
        candidates.sort_unstable();

        for (_, id) in candidates {
            let Some(mut entry) = self.items.get_mut(&id) else { continue };
            // Re-check under the lock: a concurrent `claim_next` may have
            // already claimed this item since the scan above.
            if !matches!(entry.status, QueueItemStatus::Pending) || entry.visible_at > now {
                continue;
            }
            entry.status = QueueItemStatus::Processing;
            entry.worker_id = Some(worker_id.to_owned());
            entry.started_at = Some(now);
            entry.visible_at = now + ChronoDuration::seconds(entry.visibility_timeout_secs);
            let claimed = entry.clone();
            self.metrics.queue_item_claimed(&claimed.item_type);
            return Ok(Some(claimed));
        }
        Ok(None)
    }

    /// A stale `worker_id` (the claim already expired and a different worker
    /// has it, or the item no longer exists) is a silent no-op: the caller
    /// lost the race and has nothing further to report.
    async fn complete(&self, id: Uuid, worker_id: &str) -> Result<()> {
        let Some(mut entry) = self.items.get_mut(&id) else { return Ok(()) };
        if entry.worker_id.as_deref() != Some(worker_id) || entry.status != QueueItemStatus::Processing {
            return Ok(());
        }
        entry.status = QueueItemStatus::Completed;
        entry.completed_at = Some(self.clock.utc());
        Ok(())
    }

    async fn fail(&self, id: Uuid, worker_id: &str, message: &str, backoff_secs: i64) -> Result<()> {
        let Some(mut entry) = self.items.get_mut(&id) else { return Ok(()) };
        if entry.worker_id.as_deref() != Some(worker_id) || entry.status != QueueItemStatus::Processing {
            return Ok(());
        }

        let now = self.clock.utc();
        entry.retry_count += 1;
        entry.last_error = Some(message.to_owned());
        entry.failed_at = Some(now);
        entry.worker_id = None;

        if entry.retry_count > entry.max_retries {
            entry.status = QueueItemStatus::Dead;
        } else {
            entry.status = QueueItemStatus::Pending;
            entry.visible_at = now + ChronoDuration::seconds(backoff_secs);
        }
        Ok(())
    }

    async fn list_by_type(&self, item_type: &str, limit: usize) -> Result<Vec<QueueItem>> {
        let mut matches: Vec<QueueItem> = self
            .items
            .iter()
            .filter(|entry| entry.value().item_type == item_type)
            .map(|entry| entry.value().clone())
            .collect();
        matches.sort_by_key(|item| item.visible_at);
        matches.truncate(limit);
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockable::DefaultClock;
    use serde_json::json;
    use std::sync::Mutex;

    fn queue() -> InMemoryQueue {
        InMemoryQueue::new(Arc::new(DefaultClock))
    }

    #[derive(Default)]
    struct RecordingMetrics {
        events: Mutex<Vec<(&'static str, String)>>,
    }

    impl Metrics for RecordingMetrics {
        fn queue_item_enqueued(&self, item_type: &str) {
            self.events.lock().unwrap().push(("enqueued", item_type.to_owned()));
        }
        fn queue_item_claimed(&self, item_type: &str) {
            self.events.lock().unwrap().push(("claimed", item_type.to_owned()));
        }
    }

    #[tokio::test]
    async fn enqueue_and_claim_record_matching_counters() {
        let metrics = Arc::new(RecordingMetrics::default());
        let queue = InMemoryQueue::with_metrics(Arc::new(DefaultClock), metrics.clone());

        queue
            .enqueue(EnqueueRequest::new("digest.send", json!({"user_id": "u1"})))
            .await
            .unwrap();
        queue.claim_next("worker-1").await.unwrap();

        let events = metrics.events.lock().unwrap();
        assert_eq!(events.as_slice(), [("enqueued", "digest.send".to_owned()), ("claimed", "digest.send".to_owned())]);
    }

    #[tokio::test]
    async fn s4_stale_claim_is_ignored_and_retry_then_dead() {
        let queue = queue();
        let mut request = EnqueueRequest::new("email.send", json!({"to": "a@example.com"}));
        request.max_retries = 1;
        request.visibility_timeout_secs = 0;
        let id = queue.enqueue(request).await.unwrap();

        let claimed_a = queue.claim_next("worker-a").await.unwrap().expect("worker a claims");
        assert_eq!(claimed_a.id, id);
        assert_eq!(claimed_a.retry_count, 0);

        // Visibility timeout was zero, so the item is immediately reclaimable.
        let claimed_b = queue.claim_next("worker-b").await.unwrap().expect("worker b reclaims");
        assert_eq!(claimed_b.id, id);

        // Worker A's completion is stale: worker B now owns the item.
        queue.complete(id, "worker-a").await.unwrap();
        let still_processing = queue.list_by_type("email.send", 10).await.unwrap();
        assert_eq!(still_processing[0].status, QueueItemStatus::Processing);

        // Worker B fails once: retry_count 0 -> 1, item re-queued.
        queue.fail(id, "worker-b", "smtp timeout", 0).await.unwrap();
        let item = queue.list_by_type("email.send", 10).await.unwrap().remove(0);
        assert_eq!(item.retry_count, 1);
        assert_eq!(item.status, QueueItemStatus::Pending);

        // Second failure exceeds max_retries=1 and the item dies.
        let claimed_again = queue.claim_next("worker-c").await.unwrap().expect("reclaimable");
        queue.fail(claimed_again.id, "worker-c", "smtp timeout again", 0).await.unwrap();
        let item = queue.list_by_type("email.send", 10).await.unwrap().remove(0);
        assert_eq!(item.retry_count, 2);
        assert_eq!(item.status, QueueItemStatus::Dead);
    }

    #[tokio::test]
    async fn complete_with_wrong_worker_id_is_a_noop() {
        let queue = queue();
        let mut request = EnqueueRequest::new("webhook.deliver", json!({}));
        request.visibility_timeout_secs = 300;
        let id = queue.enqueue(request).await.unwrap();
        queue.claim_next("real-worker").await.unwrap();

        queue.complete(id, "impostor").await.unwrap();
        let item = queue.list_by_type("webhook.deliver", 10).await.unwrap().remove(0);
        assert_eq!(item.status, QueueItemStatus::Processing);
    }

    #[tokio::test]
    async fn claim_next_returns_none_when_empty() {
        let queue = queue();
        assert!(queue.claim_next("worker").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_claims_never_double_claim_the_same_item() {
        let queue = Arc::new(queue());
        let id = queue
            .enqueue(EnqueueRequest::new("digest.send", json!({"user_id": "u1"})))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for worker in 0..16 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move { queue.claim_next(&format!("worker-{worker}")).await.unwrap() }));
        }

        let mut claims = Vec::new();
        for handle in handles {
            if let Some(item) = handle.await.unwrap() {
                claims.push(item);
            }
        }

        assert_eq!(claims.len(), 1, "exactly one concurrent claim should win the race");
        assert_eq!(claims[0].id, id);
    }

    mod claim_complete_fail_scenario {
        use super::*;
        use rstest_bdd_macros::{given, then, when};

        #[given("a pending item with one allowed retry")]
        async fn a_pending_item_with_one_allowed_retry() -> (InMemoryQueue, Uuid) {
            let queue = queue();
            let mut request = EnqueueRequest::new("digest.send", json!({"user_id": "u9"}));
            request.max_retries = 1;
            request.visibility_timeout_secs = 0;
            let id = queue.enqueue(request).await.unwrap();
            (queue, id)
        }

        #[when("a worker claims it, lets it expire, and a second worker fails it twice")]
        async fn a_worker_claims_it_lets_it_expire_and_a_second_worker_fails_it_twice(
            setup: (InMemoryQueue, Uuid),
        ) -> (InMemoryQueue, Uuid) {
            let (queue, id) = setup;
            let claimed = queue.claim_next("worker-1").await.unwrap().expect("first claim");
            assert_eq!(claimed.id, id);

            // Zero visibility timeout means the item is already reclaimable.
            let reclaimed = queue.claim_next("worker-2").await.unwrap().expect("reclaim");
            assert_eq!(reclaimed.id, id);

            queue.fail(id, "worker-2", "downstream unavailable", 0).await.unwrap();
            let reclaimed_again = queue.claim_next("worker-2").await.unwrap().expect("reclaim after fail");
            queue.fail(reclaimed_again.id, "worker-2", "still unavailable", 0).await.unwrap();
            (queue, id)
        }

        #[then("the item is dead and the stale first worker's claim never completed it")]
        async fn the_item_is_dead_and_the_stale_claim_never_completed_it(outcome: (InMemoryQueue, Uuid)) {
            let (queue, id) = outcome;

            // The first worker's claim is long stale; its completion must be a no-op.
            queue.complete(id, "worker-1").await.unwrap();

            let item = queue.list_by_type("digest.send", 10).await.unwrap().remove(0);
            assert_eq!(item.status, QueueItemStatus::Dead);
            assert_eq!(item.retry_count, 2);
        }

        #[tokio::test]
        async fn claiming_then_exhausting_retries_kills_the_item_despite_a_stale_claim() {
            let setup = a_pending_item_with_one_allowed_retry().await;
            let outcome = a_worker_claims_it_lets_it_expire_and_a_second_worker_fails_it_twice(setup).await;
            the_item_is_dead_and_the_stale_claim_never_completed_it(outcome).await;
        }
    }
}
