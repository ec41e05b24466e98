//! Alternate worker shape for periodic work: run immediately, then on every
//! tick of an interval (or continuously when `interval` is zero), with a
//! trigger channel for ad-hoc "run now" signals. Per `spec.md` §4.4.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// A skip is not an error: it is a counted, logged no-op (e.g. "nothing due
/// yet").
pub enum RunOutcome {
    Ran,
    Skipped,
}

type RunnerFuture = Pin<Box<dyn Future<Output = Result<RunOutcome>> + Send>>;

pub trait RunnerFn: Send + Sync {
    fn call(&self) -> RunnerFuture;
}

impl<F, Fut> RunnerFn for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<RunOutcome>> + Send + 'static,
{
    fn call(&self) -> RunnerFuture {
        Box::pin(self())
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunnerStats {
    pub runs: u64,
    pub skips: u64,
    pub errors: u64,
    pub last_error: Option<String>,
}

/// Periodic-work runner. `interval = Duration::ZERO` means "run again as
/// soon as the previous run finishes".
pub struct Runner {
    name: String,
    interval: Duration,
    stats: Mutex<RunnerStats>,
    trigger_tx: mpsc::Sender<()>,
    trigger_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

impl Runner {
    #[must_use]
    pub fn new(name: impl Into<String>, interval: Duration) -> Self {
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        Self {
            name: name.into(),
            interval,
            stats: Mutex::new(RunnerStats::default()),
            trigger_tx,
            trigger_rx: Mutex::new(Some(trigger_rx)),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Signals "run now" without waiting for the next tick. Non-blocking:
    /// a pending trigger already queued makes this a no-op.
    pub fn trigger(&self) {
        let _ = self.trigger_tx.try_send(());
    }

    #[must_use]
    pub fn stats(&self) -> RunnerStats {
        self.stats.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
    }

    /// Runs `work` immediately, then on every subsequent tick/trigger until
    /// `cancel` fires. Must be called at most once per `Runner`.
    pub async fn run(&self, work: Arc<dyn RunnerFn>, cancel: CancellationToken) {
        let mut rx = self
            .trigger_rx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
            .expect("Runner::run called more than once");

        self.execute(&work).await;

        loop {
            if cancel.is_cancelled() {
                return;
            }

            if self.interval.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    _ = rx.recv() => {}
                    () = tokio::time::sleep(self.interval) => {}
                }
            }

            if cancel.is_cancelled() {
                return;
            }
            self.execute(&work).await;
        }
    }

    async fn execute(&self, work: &Arc<dyn RunnerFn>) {
        let work = work.clone();
        let result = tokio::spawn(async move { work.call().await }).await;
        match result {
            Ok(Ok(RunOutcome::Ran)) => self.record(|s| s.runs += 1),
            Ok(Ok(RunOutcome::Skipped)) => self.record(|s| s.skips += 1),
            Ok(Err(err)) => {
                tracing::warn!(name = %self.name, error = %err, "runner work returned an error");
                self.record_error(err.message().to_owned());
            }
            Err(join_error) => {
                tracing::error!(name = %self.name, error = %join_error, "runner work panicked");
                self.record_error(format!("runner panicked: {join_error}"));
            }
        }
    }

    fn record(&self, f: impl FnOnce(&mut RunnerStats)) {
        let mut guard = self.stats.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&mut guard);
    }

    fn record_error(&self, message: String) {
        self.record(|s| {
            s.errors += 1;
            s.last_error = Some(message);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn runs_immediately_and_on_trigger() {
        let runner = Arc::new(Runner::new("demo", Duration::from_secs(3600)));
        let count = Arc::new(AtomicU32::new(0));
        let count_for_work = count.clone();
        let work: Arc<dyn RunnerFn> = Arc::new(move || {
            let count = count_for_work.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(RunOutcome::Ran)
            }
        });

        let cancel = CancellationToken::new();
        let runner_for_task = runner.clone();
        let work_for_task = work.clone();
        let cancel_for_task = cancel.clone();
        let handle = tokio::spawn(async move { runner_for_task.run(work_for_task, cancel_for_task).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        runner.trigger();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(runner.stats().runs, 2);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn panic_is_caught_and_recorded_as_error() {
        let runner = Runner::new("panicky", Duration::from_secs(3600));
        let work: Arc<dyn RunnerFn> = Arc::new(|| async { panic!("boom") });
        let cancel = CancellationToken::new();
        cancel.cancel();
        runner.run(work, cancel).await;
        assert_eq!(runner.stats().errors, 1);
        assert!(runner.stats().last_error.unwrap().contains("panicked"));
    }

    #[tokio::test]
    async fn skip_is_counted_not_an_error() {
        let runner = Runner::new("skipper", Duration::from_secs(3600));
        let work: Arc<dyn RunnerFn> = Arc::new(|| async { Ok(RunOutcome::Skipped) });
        let cancel = CancellationToken::new();
        cancel.cancel();
        runner.run(work, cancel).await;
        assert_eq!(runner.stats().skips, 1);
        assert_eq!(runner.stats().errors, 0);
    }
}
