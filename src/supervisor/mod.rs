//! C4 — Supervisor & Registry: heartbeat-based worker supervision with
//! exponential-backoff restarts, plus a name-keyed registry aggregating
//! worker health.
//!
//! Grounded on the retry/backoff shape of
//! `domain::overpass_enrichment_worker::OverpassEnrichmentWorker` (jittered
//! exponential backoff, `Mutex`-guarded policy state, `mockable::Clock`
//! injection) generalized from a single retrying call to a
//! restart-the-whole-worker supervision loop.

pub mod registry;
pub mod runner;

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use mockable::Clock;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::metrics::Metrics;

pub use registry::{Registry, Summary};

/// Kind of signal a worker emits to prove liveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatKind {
    Liveness,
    Progress,
}

/// A single heartbeat sent from a worker to its supervisor.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    pub kind: HeartbeatKind,
    pub worker_id: String,
    pub timestamp: DateTime<Utc>,
    pub progress: Option<u64>,
}

/// Handed to a worker so it can prove liveness. The sender is non-blocking:
/// a full channel means the supervisor will detect the stall via timeout
/// instead, so `send` never stalls the worker itself.
#[derive(Clone)]
pub struct HeartbeatSender {
    worker_id: String,
    tx: Option<mpsc::Sender<Heartbeat>>,
    clock: Arc<dyn Clock>,
}

impl HeartbeatSender {
    fn new(worker_id: String, tx: mpsc::Sender<Heartbeat>, clock: Arc<dyn Clock>) -> Self {
        Self { worker_id, tx: Some(tx), clock }
    }

    /// A sender that discards every heartbeat. Returned to unsupervised
    /// workers so instrumented worker bodies remain portable.
    #[must_use]
    pub fn noop(worker_id: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self { worker_id: worker_id.into(), tx: None, clock }
    }

    pub fn liveness(&self) {
        self.send(HeartbeatKind::Liveness, None);
    }

    pub fn progress(&self, increment: u64) {
        self.send(HeartbeatKind::Progress, Some(increment));
    }

    fn send(&self, kind: HeartbeatKind, progress: Option<u64>) {
        let Some(tx) = &self.tx else { return };
        let heartbeat = Heartbeat {
            kind,
            worker_id: self.worker_id.clone(),
            timestamp: self.clock.utc(),
            progress,
        };
        // Non-blocking by design: a full channel means the supervisor will
        // still catch the stall via heartbeat-timeout evaluation.
        let _ = tx.try_send(heartbeat);
    }
}

type WorkerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A supervised worker body: given a cancellation token and a heartbeat
/// sender, run until cancelled.
pub trait WorkerFn: Send + Sync {
    fn call(&self, cancel: CancellationToken, heartbeat: HeartbeatSender) -> WorkerFuture;
}

impl<F, Fut> WorkerFn for F
where
    F: Fn(CancellationToken, HeartbeatSender) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn call(&self, cancel: CancellationToken, heartbeat: HeartbeatSender) -> WorkerFuture {
        Box::pin(self(cancel, heartbeat))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Running,
    Stuck,
    Restarting,
    Failed,
}

impl WorkerState {
    #[must_use]
    pub fn is_healthy(self) -> bool {
        matches!(self, WorkerState::Idle | WorkerState::Running)
    }
}

/// Observable worker health, per `spec.md` §3 "Worker Status".
#[derive(Debug, Clone)]
pub struct WorkerStatus {
    pub name: String,
    pub state: WorkerState,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub consecutive_restarts: u32,
    pub cumulative_restarts: u32,
    pub last_error: Option<String>,
    pub items_processed: u64,
    pub start_time: DateTime<Utc>,
    pub last_restart_time: Option<DateTime<Utc>>,
}

impl WorkerStatus {
    fn new(name: String, now: DateTime<Utc>) -> Self {
        Self {
            name,
            state: WorkerState::Idle,
            last_heartbeat: None,
            consecutive_restarts: 0,
            cumulative_restarts: 0,
            last_error: None,
            items_processed: 0,
            start_time: now,
            last_restart_time: None,
        }
    }
}

/// Validated configuration for one supervised worker.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub name: String,
    pub heartbeat_timeout: Duration,
    pub max_restarts: u32,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    pub backoff_multiplier: f64,
}

impl SupervisorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::configuration("supervisor name must not be empty"));
        }
        if self.heartbeat_timeout.is_zero() {
            return Err(Error::configuration("heartbeat_timeout must be > 0"));
        }
        if self.backoff_initial.is_zero() {
            return Err(Error::configuration("backoff_initial must be > 0"));
        }
        if self.backoff_max < self.backoff_initial {
            return Err(Error::configuration("backoff_max must be >= backoff_initial"));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(Error::configuration("backoff_multiplier must be >= 1.0"));
        }
        Ok(())
    }
}

/// Why the supervision loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Cancelled,
    MaxRestartsExceeded,
}

/// Owns one worker's lifecycle end to end: start, monitor heartbeats,
/// restart with backoff, permanently fail after exhausting restarts.
pub struct Supervisor {
    config: SupervisorConfig,
    status: Arc<Mutex<WorkerStatus>>,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn Metrics>,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig, clock: Arc<dyn Clock>, metrics: Arc<dyn Metrics>) -> Result<Self> {
        config.validate()?;
        let now = clock.utc();
        Ok(Self {
            status: Arc::new(Mutex::new(WorkerStatus::new(config.name.clone(), now))),
            config,
            clock,
            metrics,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    #[must_use]
    pub fn status(&self) -> WorkerStatus {
        self.status.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
    }

    fn with_status<T>(&self, f: impl FnOnce(&mut WorkerStatus) -> T) -> T {
        let mut guard = self.status.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&mut guard)
    }

    /// Runs the supervision loop until `parent_cancel` fires or the restart
    /// budget is exhausted.
    pub async fn run(&self, worker: Arc<dyn WorkerFn>, parent_cancel: CancellationToken) -> StopReason {
        let mut backoff = self.config.backoff_initial;

        loop {
            if parent_cancel.is_cancelled() {
                return StopReason::Cancelled;
            }

            self.with_status(|s| s.state = WorkerState::Running);
            let outcome = self.run_one_attempt(&worker, &parent_cancel).await;

            match outcome {
                AttemptOutcome::Cancelled => return StopReason::Cancelled,
                AttemptOutcome::Stalled { last_error, healed } => {
                    // A heartbeat observed during this attempt proves the
                    // worker recovered; the next restart delay starts fresh
                    // instead of continuing to grow from the prior stall.
                    if healed {
                        backoff = self.config.backoff_initial;
                    }

                    let consecutive = self.with_status(|s| {
                        s.state = WorkerState::Stuck;
                        s.last_error = last_error.clone();
                        s.consecutive_restarts += 1;
                        s.cumulative_restarts += 1;
                        self.metrics.worker_stuck(&s.name);
                        s.consecutive_restarts
                    });

                    if consecutive > self.config.max_restarts {
                        self.with_status(|s| s.state = WorkerState::Failed);
                        self.metrics.worker_failed(&self.config.name);
                        return StopReason::MaxRestartsExceeded;
                    }

                    self.with_status(|s| {
                        s.state = WorkerState::Restarting;
                        s.last_restart_time = Some(self.clock.utc());
                    });
                    self.metrics.worker_restart(&self.config.name);

                    tokio::select! {
                        () = parent_cancel.cancelled() => return StopReason::Cancelled,
                        () = tokio::time::sleep(backoff) => {}
                    }
                    backoff = self.advance_backoff(backoff);
                }
            }
        }
    }

    #[allow(clippy::float_arithmetic)]
    fn advance_backoff(&self, current: Duration) -> Duration {
        let grown_ms = (current.as_millis() as f64 * self.config.backoff_multiplier).round();
        let grown = Duration::from_millis(grown_ms as u64);
        grown.min(self.config.backoff_max)
    }

    async fn run_one_attempt(&self, worker: &Arc<dyn WorkerFn>, parent_cancel: &CancellationToken) -> AttemptOutcome {
        let child_cancel = parent_cancel.child_token();
        let (tx, mut rx) = mpsc::channel(32);
        let sender = HeartbeatSender::new(self.config.name.clone(), tx, self.clock.clone());

        let worker = worker.clone();
        let cancel_for_task = child_cancel.clone();
        let mut handle = tokio::spawn(async move { worker.call(cancel_for_task, sender).await });

        let mut deadline = Instant::now() + self.config.heartbeat_timeout;
        let mut healed = false;

        loop {
            tokio::select! {
                () = parent_cancel.cancelled() => {
                    child_cancel.cancel();
                    handle.abort();
                    let _ = handle.await;
                    return AttemptOutcome::Cancelled;
                }
                received = rx.recv() => {
                    match received {
                        Some(heartbeat) => {
                            healed = true;
                            self.with_status(|s| {
                                s.last_heartbeat = Some(heartbeat.timestamp);
                                s.consecutive_restarts = 0;
                                if let Some(increment) = heartbeat.progress {
                                    s.items_processed += increment;
                                }
                                self.metrics.worker_heartbeat(&s.name);
                            });
                            deadline = Instant::now() + self.config.heartbeat_timeout;
                        }
                        None => {
                            // Sender dropped: the worker task ended. Wait for
                            // its join result on the next loop iteration via
                            // the handle branch below rather than spinning.
                        }
                    }
                }
                () = tokio::time::sleep_until(deadline) => {
                    if handle.is_finished() {
                        let result = (&mut handle).await;
                        return Self::outcome_from_join(result, healed);
                    }
                    child_cancel.cancel();
                    handle.abort();
                    let _ = handle.await;
                    return AttemptOutcome::Stalled { last_error: Some("heartbeat timeout exceeded".to_owned()), healed };
                }
                result = &mut handle => {
                    return Self::outcome_from_join(result, healed);
                }
            }
        }
    }

    fn outcome_from_join(result: std::result::Result<(), tokio::task::JoinError>, healed: bool) -> AttemptOutcome {
        match result {
            Ok(()) => AttemptOutcome::Stalled { last_error: Some("worker exited before cancellation".to_owned()), healed },
            Err(join_error) if join_error.is_cancelled() => AttemptOutcome::Cancelled,
            Err(join_error) => AttemptOutcome::Stalled { last_error: Some(format!("worker panicked: {join_error}")), healed },
        }
    }
}

enum AttemptOutcome {
    Stalled { last_error: Option<String>, healed: bool },
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockable::DefaultClock;
    use rstest::rstest;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config(name: &str) -> SupervisorConfig {
        SupervisorConfig {
            name: name.to_owned(),
            heartbeat_timeout: Duration::from_millis(200),
            max_restarts: 2,
            backoff_initial: Duration::from_millis(20),
            backoff_max: Duration::from_millis(200),
            backoff_multiplier: 2.0,
        }
    }

    #[rstest]
    #[case(SupervisorConfig { name: String::new(), ..config("x") })]
    #[case(SupervisorConfig { heartbeat_timeout: Duration::ZERO, ..config("x") })]
    #[case(SupervisorConfig { backoff_max: Duration::from_millis(1), ..config("x") })]
    #[case(SupervisorConfig { backoff_multiplier: 0.5, ..config("x") })]
    fn invalid_config_is_rejected(#[case] cfg: SupervisorConfig) {
        assert!(cfg.validate().is_err());
    }

    #[tokio::test]
    async fn healthy_heartbeats_keep_worker_running_until_cancelled() {
        let clock: Arc<dyn Clock> = Arc::new(DefaultClock);
        let supervisor = Supervisor::new(config("healthy"), clock, crate::metrics::noop()).unwrap();
        let cancel = CancellationToken::new();

        let worker = Arc::new(|cancel: CancellationToken, heartbeat: HeartbeatSender| async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    () = tokio::time::sleep(Duration::from_millis(20)) => heartbeat.liveness(),
                }
            }
        });

        let cancel_clone = cancel.clone();
        let run = tokio::spawn(async move { supervisor.run(worker, cancel_clone).await });

        tokio::time::sleep(Duration::from_millis(80)).await;
        cancel.cancel();
        let reason = run.await.unwrap();
        assert_eq!(reason, StopReason::Cancelled);
    }

    #[tokio::test]
    async fn a_heartbeat_resets_backoff_for_the_next_stall() {
        let clock: Arc<dyn Clock> = Arc::new(DefaultClock);
        let cfg = SupervisorConfig {
            name: "flapping".to_owned(),
            heartbeat_timeout: Duration::from_millis(20),
            max_restarts: 10,
            backoff_initial: Duration::from_millis(10),
            backoff_max: Duration::from_secs(1),
            backoff_multiplier: 3.0,
        };
        let supervisor = Arc::new(Supervisor::new(cfg, clock, crate::metrics::noop()).unwrap());
        let cancel = CancellationToken::new();

        let attempt = Arc::new(AtomicU32::new(0));
        let starts = Arc::new(Mutex::new(Vec::<tokio::time::Instant>::new()));
        let attempt_for_worker = attempt.clone();
        let starts_for_worker = starts.clone();

        // Attempts 0 and 1 never heartbeat (two growing-backoff stalls).
        // Attempt 2 sends one heartbeat before going silent again, which
        // must reset the backoff used ahead of attempt 3.
        let worker: Arc<dyn WorkerFn> = Arc::new(move |cancel: CancellationToken, heartbeat: HeartbeatSender| {
            let attempt = attempt_for_worker.clone();
            let starts = starts_for_worker.clone();
            async move {
                let index = attempt.fetch_add(1, Ordering::SeqCst);
                starts.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push(tokio::time::Instant::now());
                if index == 2 {
                    heartbeat.liveness();
                }
                tokio::select! {
                    () = cancel.cancelled() => {}
                    () = tokio::time::sleep(Duration::from_secs(3600)) => {}
                }
            }
        });

        let cancel_clone = cancel.clone();
        let run = tokio::spawn(async move { supervisor.run(worker, cancel_clone).await });

        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if starts.lock().unwrap_or_else(std::sync::PoisonError::into_inner).len() >= 4 {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("four attempts should start well within the timeout");

        cancel.cancel();
        run.await.unwrap();

        let starts = starts.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let gap_1_2 = starts[2] - starts[1];
        let gap_2_3 = starts[3] - starts[2];
        assert!(
            gap_2_3 < gap_1_2,
            "backoff after a healed-then-stalled attempt must reset, not keep growing: {gap_2_3:?} >= {gap_1_2:?}"
        );
    }
}
