#![cfg_attr(not(any(test, doctest)), deny(clippy::unwrap_used))]
#![cfg_attr(not(any(test, doctest)), forbid(clippy::expect_used))]
//! Process entry point: loads configuration, assembles the router, queue
//! dispatcher, and auth/pow services, and serves until a shutdown signal
//! arrives.

use std::sync::Arc;

use aya_core::audit::AuditLog;
use aya_core::auth::jwt::JwtCodec;
use aya_core::auth::AuthCore;
use aya_core::config::AppConfig;
use aya_core::http_service::tls::TlsMode;
use aya_core::http_service::{HttpService, HttpServiceConfig};
use aya_core::listener::ListenerConfig;
use aya_core::metrics::Metrics;
use aya_core::pow::PowService;
use aya_core::queue::{Dispatcher, EventQueue, InMemoryQueue};
use aya_core::router::{Response, Router};
use aya_core::supervisor::registry::Registry;
use aya_core::supervisor::{HeartbeatSender, Supervisor, SupervisorConfig};
use mockable::DefaultClock;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(err) = fmt().with_env_filter(EnvFilter::from_default_env()).json().try_init() {
        warn!(error = %err, "tracing init failed");
    }

    let config = AppConfig::from_env()?;
    let metrics = select_metrics();
    let clock: Arc<dyn mockable::Clock> = Arc::new(DefaultClock);

    let router = Arc::new(build_router());
    let shutdown = CancellationToken::new();
    spawn_signal_watcher(shutdown.clone());

    let queue: Arc<dyn EventQueue> = Arc::new(InMemoryQueue::new(clock.clone()));
    let registry = Arc::new(Registry::new());
    spawn_dispatcher(&config, queue.clone(), &registry, clock.clone(), metrics.clone(), shutdown.clone());

    let auth = Arc::new(AuthCore::new(
        JwtCodec::new(config.jwt_signing_key()),
        Arc::new(AuditLog::new(clock.clone())),
        clock.clone(),
        config.cors_allowed_origins.clone(),
        chrono::Duration::seconds(config.session_ttl_secs),
        config.anonymous_session_rate_limit_per_hour,
    ));
    let _pow = Arc::new(PowService::new(config.pow_difficulty, config.pow_ttl_secs, clock.clone()));
    let _auth = auth;

    let service = HttpService::new(router, metrics);
    let http_config = HttpServiceConfig {
        bind_addr: config.bind_address().parse()?,
        tls: TlsMode::None,
        listener: ListenerConfig::default(),
        shutdown_deadline: std::time::Duration::from_secs(config.shutdown_deadline_secs),
    };

    service.serve(http_config, shutdown).await?;
    tracing::info!(healthy = registry.summary().is_healthy, "process shutdown complete");
    Ok(())
}

fn build_router() -> Router {
    let router = Router::new();
    router
        .route(
            "GET /healthz",
            vec![aya_core::router::FnLink::new(|_req| {
                Response::new(200, bytes::Bytes::from_static(b"ok"))
            })],
        )
        .unwrap_or_else(|err| panic!("failed to register health route: {err}"));
    router
}

fn select_metrics() -> Arc<dyn Metrics> {
    #[cfg(feature = "metrics-prometheus")]
    {
        aya_core::metrics::PrometheusMetrics::install()
    }
    #[cfg(not(feature = "metrics-prometheus"))]
    {
        aya_core::metrics::noop()
    }
}

fn spawn_signal_watcher(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut terminate = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(err) => {
                    warn!(error = %err, "failed to install SIGTERM handler");
                    let _ = ctrl_c.await;
                    shutdown.cancel();
                    return;
                }
            };
            tokio::select! {
                _ = ctrl_c => {}
                _ = terminate.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        tracing::info!("shutdown signal received");
        shutdown.cancel();
    });
}

fn spawn_dispatcher(
    config: &AppConfig,
    queue: Arc<dyn EventQueue>,
    registry: &Arc<Registry>,
    clock: Arc<dyn mockable::Clock>,
    metrics: Arc<dyn Metrics>,
    shutdown: CancellationToken,
) {
    let handlers = std::collections::HashMap::new();
    let dispatcher = Arc::new(
        Dispatcher::with_metrics("queue-dispatcher", queue, handlers, metrics)
            .with_poll_interval(std::time::Duration::from_millis(200)),
    );

    let supervisor_config = SupervisorConfig {
        name: "queue-dispatcher".to_owned(),
        heartbeat_timeout: std::time::Duration::from_secs(30),
        max_restarts: config.queue_max_retries,
        backoff_initial: std::time::Duration::from_secs(config.queue_retry_base_secs as u64),
        backoff_max: std::time::Duration::from_secs(300),
        backoff_multiplier: 2.0,
    };

    let supervisor = match Supervisor::new(supervisor_config, clock, aya_core::metrics::noop()) {
        Ok(supervisor) => Arc::new(supervisor),
        Err(err) => {
            warn!(error = %err, "invalid dispatcher supervisor configuration; queue dispatcher disabled");
            return;
        }
    };

    if let Err(err) = registry.register(supervisor.clone()) {
        warn!(error = %err, "failed to register queue dispatcher supervisor");
        return;
    }

    tokio::spawn(async move {
        let worker: Arc<dyn aya_core::supervisor::WorkerFn> = Arc::new(move |cancel: CancellationToken, heartbeat: HeartbeatSender| {
            let dispatcher = dispatcher.clone();
            async move { dispatcher.run(cancel, heartbeat).await }
        });
        supervisor.run(worker, shutdown).await;
    });
}
