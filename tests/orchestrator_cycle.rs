// tests/orchestrator_cycle.rs
//
// End-to-end cycle behavior: circuit opening after repeated source
// failures, a timing-out source leaving healthy sources unharmed, and
// per-cycle replay of due retry tasks. Source fixtures feed the real
// adapters; the collaborator is a live mock HTTP server.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Map, Value};

use wrestlebot::breaker::{BreakerPolicy, BreakerRegistry, CircuitState};
use wrestlebot::clock::{Clock, SystemClock};
use wrestlebot::config::WorkerConfig;
use wrestlebot::error::BotError;
use wrestlebot::orchestrator::Orchestrator;
use wrestlebot::process::Processor;
use wrestlebot::publish::{ContentApiClient, Publisher};
use wrestlebot::ratelimit::{RatePolicy, RateRegistry};
use wrestlebot::retry::RetryQueue;
use wrestlebot::sources::{
    matchdb::MatchDbAdapter, news_rss::NewsRssAdapter, wikipedia::WikipediaAdapter, FetchMode,
    FetchOutcome, SkipReason, SourceAdapter, SourceGate,
};
use wrestlebot::types::{EntityDraft, EntityKind, Provenance};

// --- mock collaborator -------------------------------------------------

#[derive(Clone, Default)]
struct MockCollaborator {
    entities: Arc<Mutex<HashMap<String, i64>>>,
}

async fn create_entity(
    State(api): State<MockCollaborator>,
    Path(_kind): Path<String>,
    Json(fields): Json<Map<String, Value>>,
) -> impl IntoResponse {
    let slug = fields
        .get("slug")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let mut entities = api.entities.lock().unwrap();
    let next_id = entities.len() as i64 + 1;
    let (id, created) = match entities.get(&slug) {
        Some(id) => (*id, false),
        None => {
            entities.insert(slug, next_id);
            (next_id, true)
        }
    };
    (StatusCode::OK, Json(json!({"id": id, "created": created})))
}

async fn spawn_collaborator(api: MockCollaborator) -> String {
    let app = Router::new()
        .route("/entities/{kind}", post(create_entity))
        .with_state(api);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("mock serve");
    });
    format!("http://{addr}")
}

// --- mock source servers ------------------------------------------------

/// Always answers 500 and counts hits.
async fn spawn_failing_source(hits: Arc<AtomicUsize>) -> String {
    let app = Router::new().fallback(move || {
        let hits = hits.clone();
        async move {
            hits.fetch_add(1, Ordering::SeqCst);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("mock serve");
    });
    format!("http://{addr}")
}

/// Stalls well past any test deadline before answering.
async fn spawn_slow_source() -> String {
    let app = Router::new().fallback(|| async {
        tokio::time::sleep(Duration::from_secs(5)).await;
        StatusCode::OK
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("mock serve");
    });
    format!("http://{addr}")
}

// --- wiring helpers -----------------------------------------------------

fn registries(names: &[&str]) -> (Arc<BreakerRegistry>, Arc<RateRegistry>) {
    let now = Utc::now();
    let mut breakers = BreakerRegistry::new();
    let mut rates = RateRegistry::new();
    for name in names {
        breakers.register(*name, BreakerPolicy::default());
        rates.register(
            *name,
            RatePolicy {
                per_minute: 10_000,
                per_hour: 100_000,
            },
            now,
        );
    }
    (Arc::new(breakers), Arc::new(rates))
}

fn gate(
    name: &str,
    breakers: &Arc<BreakerRegistry>,
    rates: &Arc<RateRegistry>,
    clock: Arc<dyn Clock>,
) -> SourceGate {
    SourceGate::new(
        name,
        breakers.get(name).expect("registered"),
        rates.get(name).expect("registered"),
        clock,
    )
}

fn worker_config() -> WorkerConfig {
    WorkerConfig {
        max_concurrent_sources: 5,
        publish_queue_depth: 64,
        source_timeout_secs: 1,
        cycle_idle_secs: 0,
    }
}

// --- tests --------------------------------------------------------------

#[tokio::test]
async fn five_failures_open_circuit_sixth_fetch_skips_network() {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (breakers, rates) = registries(&["cagematch"]);
    let hits = Arc::new(AtomicUsize::new(0));
    let endpoint = spawn_failing_source(hits.clone()).await;

    let adapter = MatchDbAdapter::new(
        gate("cagematch", &breakers, &rates, clock.clone()),
        FetchMode::http(endpoint, Duration::from_secs(5)).unwrap(),
    );

    for i in 0..5 {
        let err = adapter.fetch(None).await.expect_err("scripted 500");
        assert!(
            matches!(err, BotError::SourceUnavailable { .. }),
            "attempt {i}: {err}"
        );
    }
    assert_eq!(hits.load(Ordering::SeqCst), 5);
    assert_eq!(
        breakers.get("cagematch").unwrap().state(),
        CircuitState::Open
    );

    // Sixth attempt inside the open window: skipped, no network contact.
    let outcome = adapter.fetch(None).await.expect("skip is not an error");
    assert!(matches!(
        outcome,
        FetchOutcome::Skipped {
            reason: SkipReason::CircuitOpen
        }
    ));
    assert_eq!(hits.load(Ordering::SeqCst), 5, "no sixth request went out");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn timed_out_source_does_not_stop_healthy_sources() {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (breakers, rates) = registries(&["wikipedia", "news-feed", "slow-db"]);

    let collaborator = MockCollaborator::default();
    let base_url = spawn_collaborator(collaborator.clone()).await;
    let slow_endpoint = spawn_slow_source().await;

    let wiki: Arc<dyn SourceAdapter> = Arc::new(WikipediaAdapter::new(
        gate("wikipedia", &breakers, &rates, clock.clone()),
        FetchMode::Fixture(include_str!("fixtures/wikipedia_members.json").to_string()),
        vec!["American_professional_wrestlers".into()],
    ));
    let rss: Arc<dyn SourceAdapter> = Arc::new(NewsRssAdapter::new(
        gate("news-feed", &breakers, &rates, clock.clone()),
        FetchMode::Fixture(include_str!("fixtures/news_rss.xml").to_string()),
    ));
    let slow: Arc<dyn SourceAdapter> = Arc::new(MatchDbAdapter::new(
        gate("slow-db", &breakers, &rates, clock.clone()),
        FetchMode::http(slow_endpoint, Duration::from_secs(30)).unwrap(),
    ));

    let dir = tempfile::tempdir().unwrap();
    let queue = Arc::new(
        RetryQueue::open(dir.path().join("retry.jsonl"), &[60, 300, 900, 3600]).unwrap(),
    );
    let client = Arc::new(ContentApiClient::new(&base_url, "test-token").with_timeout(5));
    let publisher = Arc::new(Publisher::new(client, queue.clone(), clock.clone()));

    let orchestrator = Orchestrator::new(
        worker_config(),
        vec![wiki, rss, slow],
        Arc::new(Processor::new()),
        publisher,
        queue.clone(),
        breakers.clone(),
        clock,
    );

    orchestrator.run_cycle().await;

    // The stalled source was abandoned and recorded as a breaker failure.
    let slow_snapshot = breakers.get("slow-db").unwrap().snapshot();
    assert_eq!(slow_snapshot.failure_count, 1);
    assert_eq!(slow_snapshot.state, CircuitState::Closed);

    // The two healthy sources still published their drafts.
    let entities = collaborator.entities.lock().unwrap();
    assert!(
        entities.contains_key("stone-cold-steve-austin"),
        "wikipedia wrestler published, got {:?}",
        entities.keys().collect::<Vec<_>>()
    );
    assert!(entities.contains_key("title-change-headlines-wrestle-kingdom-19"));
    assert_eq!(entities.len(), 6, "3 wrestlers + 3 articles");

    let hb = orchestrator.heartbeat().snapshot();
    assert_eq!(hb.cycle, 1);
    assert!(hb.last_cycle_at.is_some());
}

#[tokio::test]
async fn cycle_replays_due_retry_tasks() {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (breakers, _rates) = registries(&[]);

    let collaborator = MockCollaborator::default();
    let base_url = spawn_collaborator(collaborator.clone()).await;

    let dir = tempfile::tempdir().unwrap();
    // Zero-delay schedule so the seeded task is due this cycle.
    let queue = Arc::new(RetryQueue::open(dir.path().join("retry.jsonl"), &[0, 60]).unwrap());

    let mut fields = Map::new();
    fields.insert("name".into(), Value::String("Rey Mysterio".into()));
    fields.insert("slug".into(), Value::String("rey-mysterio".into()));
    let draft = EntityDraft {
        kind: EntityKind::Wrestler,
        fields,
        provenance: Provenance {
            source: "wikipedia".into(),
            url: None,
        },
    };
    queue
        .enqueue(&draft, "503 from an earlier cycle", clock.now())
        .unwrap();

    let client = Arc::new(ContentApiClient::new(&base_url, "test-token").with_timeout(5));
    let publisher = Arc::new(Publisher::new(client, queue.clone(), clock.clone()));
    let orchestrator = Orchestrator::new(
        worker_config(),
        Vec::new(),
        Arc::new(Processor::new()),
        publisher,
        queue.clone(),
        breakers,
        clock,
    );

    orchestrator.run_cycle().await;

    assert_eq!(queue.pending_count(), 0, "replayed task was acknowledged");
    assert!(collaborator
        .entities
        .lock()
        .unwrap()
        .contains_key("rey-mysterio"));
}
