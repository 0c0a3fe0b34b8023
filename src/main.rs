//! WrestleBot, the standalone wrestling data collection service.
//! Binary entrypoint: wires configuration, registries, adapters, the
//! orchestrator loop, and the status/metrics HTTP surface.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use wrestlebot::api::{self, AppState};
use wrestlebot::breaker::{BreakerPolicy, BreakerRegistry};
use wrestlebot::clock::{Clock, SystemClock};
use wrestlebot::config::Config;
use wrestlebot::metrics::Metrics;
use wrestlebot::orchestrator::Orchestrator;
use wrestlebot::process::Processor;
use wrestlebot::publish::{ContentApiClient, Publisher};
use wrestlebot::ratelimit::{RatePolicy, RateRegistry};
use wrestlebot::retry::RetryQueue;
use wrestlebot::sources::{self, SourceGate};

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("wrestlebot=info,warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    init_tracing();
    let metrics = Metrics::init();

    tracing::info!("WrestleBot Service v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load_default().context("loading configuration")?;
    if config.api_token().is_empty() {
        tracing::warn!("no API token configured; /status and writes will be rejected");
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let now = clock.now();

    // Per-source circuit/rate state, one registry each, shared by handle.
    let mut breakers = BreakerRegistry::new();
    let mut rates = RateRegistry::new();
    for src in config.enabled_sources() {
        breakers.register(
            &src.name,
            BreakerPolicy {
                failure_threshold: src.failure_threshold,
                open_timeout: chrono::Duration::seconds(src.open_secs as i64),
                ..BreakerPolicy::default()
            },
        );
        rates.register(
            &src.name,
            RatePolicy {
                per_minute: src.requests_per_minute,
                per_hour: src.requests_per_hour,
            },
            now,
        );
    }
    let breakers = Arc::new(breakers);
    let rates = Arc::new(rates);

    let fetch_timeout = Duration::from_secs(config.api.request_timeout_secs);
    let mut adapters = Vec::new();
    for src in config.enabled_sources() {
        let gate = SourceGate::new(
            &src.name,
            breakers.get(&src.name).expect("breaker registered above"),
            rates.get(&src.name).expect("limiter registered above"),
            clock.clone(),
        );
        let adapter = sources::build_adapter(src, gate, fetch_timeout)
            .with_context(|| format!("building adapter for source '{}'", src.name))?;
        adapters.push(adapter);
    }

    let queue = Arc::new(
        RetryQueue::open(&config.retry.queue_path, &config.retry.delay_schedule_secs)
            .context("opening retry queue")?,
    );
    let api_client = Arc::new(
        ContentApiClient::new(&config.api.base_url, config.api_token())
            .with_timeout(config.api.request_timeout_secs),
    );
    let publisher = Arc::new(Publisher::new(api_client.clone(), queue.clone(), clock.clone()));
    let processor = Arc::new(Processor::new());

    // Startup gate: the collaborator may still be coming up; log and carry
    // on either way.
    if api_client.health().await {
        tracing::info!(base_url = %config.api.base_url, "collaborator health check: OK");
        if let Some(status) = api_client.status().await {
            tracing::info!(status = %status, "collaborator status");
        }
    } else {
        tracing::warn!(
            base_url = %config.api.base_url,
            "collaborator health check failed, will retry next cycle"
        );
    }

    let orchestrator = Orchestrator::new(
        config.workers.clone(),
        adapters,
        processor,
        publisher,
        queue.clone(),
        breakers.clone(),
        clock.clone(),
    );

    // Status + metrics surface.
    let state = AppState {
        heartbeat: orchestrator.heartbeat(),
        breakers,
        rates,
        queue,
        clock,
    };
    let router = api::router(state).merge(metrics.router());
    let listener = tokio::net::TcpListener::bind(&config.status.bind_addr)
        .await
        .with_context(|| format!("binding status server to {}", config.status.bind_addr))?;
    tracing::info!(addr = %config.status.bind_addr, "status server listening");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "status server exited");
        }
    });

    // Graceful shutdown: finish the current cycle, then stop.
    let shutdown = orchestrator.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received, finishing current cycle");
            shutdown.store(true, Ordering::Relaxed);
        }
    });

    orchestrator.run().await;
    tracing::info!("shutdown complete");
    Ok(())
}
