// src/metrics.rs

use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Initialize the Prometheus recorder and describe every series the
    /// pipeline emits (so they show up on /metrics before first use).
    pub fn init() -> Self {
        let builder = PrometheusBuilder::new();
        let handle = builder
            .install_recorder()
            .expect("prometheus: install recorder");
        ensure_described();
        Self { handle }
    }

    /// Router exposing `/metrics` in Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

/// One-time series registration.
pub fn ensure_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("fetch_records_total", "Raw records fetched per source.");
        describe_counter!("fetch_errors_total", "Fetch transport/parse failures per source.");
        describe_counter!("fetch_timeouts_total", "Per-cycle fetch deadlines exceeded.");
        describe_counter!(
            "fetch_skipped_total",
            "Fetches skipped before network contact (circuit open / rate limited)."
        );
        describe_counter!("records_processed_total", "Raw records seen by the processor.");
        describe_counter!(
            "drafts_filtered_total",
            "Records filtered out as not wrestling content."
        );
        describe_counter!("drafts_rejected_total", "Drafts refused by validation.");
        describe_counter!("publish_ok_total", "Successful publishes.");
        describe_counter!("publish_transient_total", "Publishes queued for retry.");
        describe_counter!("publish_terminal_total", "Publishes failed terminally.");
        describe_counter!("retry_enqueued_total", "Tasks added to the retry queue.");
        describe_counter!("retry_replayed_total", "Retry tasks replayed.");
        describe_counter!("retry_dead_letter_total", "Tasks moved to dead-letter.");
        describe_gauge!("cycle_last_run_ts", "Unix ts when the last cycle ran.");
        describe_histogram!("cycle_duration_seconds", "Wall time per cycle.");
    });
}
