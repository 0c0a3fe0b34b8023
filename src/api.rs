// src/api.rs
//
// The service's own status surface: liveness, heartbeat, per-source
// circuit/rate snapshots, retry queue depths. Strictly read-only.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use tower_http::cors::CorsLayer;

use crate::breaker::{BreakerRegistry, BreakerSnapshot};
use crate::clock::Clock;
use crate::orchestrator::Heartbeat;
use crate::ratelimit::{RateRegistry, RateSnapshot};
use crate::retry::RetryQueue;

#[derive(Clone)]
pub struct AppState {
    pub heartbeat: Arc<Heartbeat>,
    pub breakers: Arc<BreakerRegistry>,
    pub rates: Arc<RateRegistry>,
    pub queue: Arc<RetryQueue>,
    pub clock: Arc<dyn Clock>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/status", get(status))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(serde::Serialize)]
struct SourceStatus {
    circuit: BreakerSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    rate: Option<RateSnapshot>,
}

#[derive(serde::Serialize)]
struct RetryStatus {
    pending: usize,
    dead_letter: usize,
}

#[derive(serde::Serialize)]
struct StatusResponse {
    service: &'static str,
    version: &'static str,
    uptime_secs: i64,
    cycle: u64,
    last_cycle_at: Option<chrono::DateTime<chrono::Utc>>,
    circuits_open: usize,
    sources: HashMap<String, SourceStatus>,
    retry: RetryStatus,
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let hb = state.heartbeat.snapshot();
    let now = state.clock.now();

    let mut rates = state.rates.snapshots();
    let sources = state
        .breakers
        .snapshots()
        .into_iter()
        .map(|(name, circuit)| {
            let rate = rates.remove(&name);
            (name, SourceStatus { circuit, rate })
        })
        .collect();

    Json(StatusResponse {
        service: "wrestlebot",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: (now - hb.started_at).num_seconds(),
        cycle: hb.cycle,
        last_cycle_at: hb.last_cycle_at,
        circuits_open: state.breakers.open_count(),
        sources,
        retry: RetryStatus {
            pending: state.queue.pending_count(),
            dead_letter: state.queue.dead_letter_count(),
        },
    })
}
