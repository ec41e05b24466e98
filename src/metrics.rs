//! Metrics facade, per `SPEC_FULL.md` §4.12.
//!
//! The framework always has a metrics sink to call into; without the
//! `metrics-prometheus` feature it is a no-op, mirroring the teacher's
//! optional Prometheus layer in `main.rs`.

use std::sync::Arc;

/// Counters and gauges every component may record into.
///
/// Implementations must not panic and must not block the caller
/// meaningfully — recording is always on a hot or near-hot path.
pub trait Metrics: Send + Sync {
    fn worker_heartbeat(&self, worker: &str) {
        let _ = worker;
    }
    fn worker_restart(&self, worker: &str) {
        let _ = worker;
    }
    fn worker_stuck(&self, worker: &str) {
        let _ = worker;
    }
    fn worker_failed(&self, worker: &str) {
        let _ = worker;
    }

    fn http_connection_opened(&self) {}
    fn http_connection_closed(&self) {}

    fn queue_item_enqueued(&self, item_type: &str) {
        let _ = item_type;
    }
    fn queue_item_claimed(&self, item_type: &str) {
        let _ = item_type;
    }
    fn queue_item_completed(&self, item_type: &str) {
        let _ = item_type;
    }
    fn queue_item_failed(&self, item_type: &str) {
        let _ = item_type;
    }
    fn queue_item_dead(&self, item_type: &str) {
        let _ = item_type;
    }
}

/// Default sink: every call is discarded.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {}

#[must_use]
pub fn noop() -> Arc<dyn Metrics> {
    Arc::new(NoopMetrics)
}

#[cfg(feature = "metrics-prometheus")]
pub use prometheus_backed::PrometheusMetrics;

#[cfg(feature = "metrics-prometheus")]
mod prometheus_backed {
    use std::sync::Arc;

    use super::Metrics;
    use metrics::{counter, gauge};
    use metrics_exporter_prometheus::PrometheusBuilder;

    /// Records into the process-global recorder installed by
    /// `metrics_exporter_prometheus::PrometheusBuilder`.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct PrometheusMetrics;

    impl PrometheusMetrics {
        /// Installs the process-global Prometheus recorder and HTTP exporter,
        /// returning a sink wired to it. Falls back to a no-op sink with a
        /// warning if installation fails (e.g. a recorder is already
        /// installed), since metrics are never worth failing startup over.
        #[must_use]
        pub fn install() -> Arc<dyn Metrics> {
            match PrometheusBuilder::new().install() {
                Ok(()) => Arc::new(Self),
                Err(err) => {
                    tracing::warn!(error = %err, "failed to install Prometheus recorder; using no-op metrics");
                    super::noop()
                }
            }
        }
    }

    impl Metrics for PrometheusMetrics {
        fn worker_heartbeat(&self, worker: &str) {
            counter!("worker_heartbeat", "worker" => worker.to_owned()).increment(1);
        }

        fn worker_restart(&self, worker: &str) {
            counter!("worker_restart", "worker" => worker.to_owned()).increment(1);
        }

        fn worker_stuck(&self, worker: &str) {
            counter!("worker_stuck", "worker" => worker.to_owned()).increment(1);
        }

        fn worker_failed(&self, worker: &str) {
            counter!("worker_failed", "worker" => worker.to_owned()).increment(1);
        }

        fn http_connection_opened(&self) {
            gauge!("http_connections_active").increment(1.0);
            counter!("http_connections_total").increment(1);
        }

        fn http_connection_closed(&self) {
            gauge!("http_connections_active").decrement(1.0);
        }

        fn queue_item_enqueued(&self, item_type: &str) {
            counter!("queue_item_enqueued", "type" => item_type.to_owned()).increment(1);
        }

        fn queue_item_claimed(&self, item_type: &str) {
            counter!("queue_item_claimed", "type" => item_type.to_owned()).increment(1);
        }

        fn queue_item_completed(&self, item_type: &str) {
            counter!("queue_item_completed", "type" => item_type.to_owned()).increment(1);
        }

        fn queue_item_failed(&self, item_type: &str) {
            counter!("queue_item_failed", "type" => item_type.to_owned()).increment(1);
        }

        fn queue_item_dead(&self, item_type: &str) {
            counter!("queue_item_dead", "type" => item_type.to_owned()).increment(1);
        }
    }
}
