// src/orchestrator.rs
//
// Cycle driver. Each cycle: fan out one bounded worker per enabled source
// (fetch under a deadline, stream records to the publish lane in fetch
// order), replay due retry tasks, stamp the heartbeat. One source's
// failure, timeout, or panic never stops the others or the loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Semaphore};

use crate::breaker::BreakerRegistry;
use crate::clock::Clock;
use crate::config::WorkerConfig;
use crate::process::Processor;
use crate::publish::Publisher;
use crate::retry::RetryQueue;
use crate::sources::{FetchOutcome, SourceAdapter};
use crate::types::RawRecord;

/// Per-cycle liveness record for external supervision.
#[derive(Debug)]
pub struct Heartbeat {
    started_at: DateTime<Utc>,
    cycle: AtomicU64,
    last_cycle_at: Mutex<Option<DateTime<Utc>>>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct HeartbeatSnapshot {
    pub started_at: DateTime<Utc>,
    pub cycle: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
}

impl Heartbeat {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            cycle: AtomicU64::new(0),
            last_cycle_at: Mutex::new(None),
        }
    }

    fn beat(&self, now: DateTime<Utc>) -> u64 {
        let cycle = self.cycle.fetch_add(1, Ordering::Relaxed) + 1;
        *self.last_cycle_at.lock().expect("heartbeat mutex poisoned") = Some(now);
        metrics::gauge!("cycle_last_run_ts").set(now.timestamp() as f64);
        cycle
    }

    pub fn snapshot(&self) -> HeartbeatSnapshot {
        HeartbeatSnapshot {
            started_at: self.started_at,
            cycle: self.cycle.load(Ordering::Relaxed),
            last_cycle_at: *self.last_cycle_at.lock().expect("heartbeat mutex poisoned"),
        }
    }
}

pub struct Orchestrator {
    workers: WorkerConfig,
    adapters: Vec<Arc<dyn SourceAdapter>>,
    processor: Arc<Processor>,
    publisher: Arc<Publisher>,
    queue: Arc<RetryQueue>,
    breakers: Arc<BreakerRegistry>,
    clock: Arc<dyn Clock>,
    heartbeat: Arc<Heartbeat>,
    shutdown: Arc<AtomicBool>,
    semaphore: Arc<Semaphore>,
    cursors: Arc<Mutex<HashMap<String, String>>>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        workers: WorkerConfig,
        adapters: Vec<Arc<dyn SourceAdapter>>,
        processor: Arc<Processor>,
        publisher: Arc<Publisher>,
        queue: Arc<RetryQueue>,
        breakers: Arc<BreakerRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let max = workers.max_concurrent_sources;
        let heartbeat = Arc::new(Heartbeat::new(clock.now()));
        Self {
            workers,
            adapters,
            processor,
            publisher,
            queue,
            breakers,
            clock,
            heartbeat,
            shutdown: Arc::new(AtomicBool::new(false)),
            semaphore: Arc::new(Semaphore::new(max)),
            cursors: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn heartbeat(&self) -> Arc<Heartbeat> {
        self.heartbeat.clone()
    }

    /// Flip this to stop the loop after the current cycle.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Main service loop. Sources self-throttle via their rate budgets;
    /// `cycle_idle_secs` only keeps an all-skipped cycle from spinning.
    pub async fn run(&self) {
        tracing::info!(sources = self.adapters.len(), "starting main service loop");
        while !self.shutdown.load(Ordering::Relaxed) {
            self.run_cycle().await;
            if self.workers.cycle_idle_secs > 0 {
                tokio::time::sleep(Duration::from_secs(self.workers.cycle_idle_secs)).await;
            }
        }
        let uptime = self.clock.now() - self.heartbeat.started_at;
        tracing::info!(uptime_secs = uptime.num_seconds(), "service loop ended");
    }

    /// One discover -> process -> publish -> replay pass.
    pub async fn run_cycle(&self) {
        let cycle_started = std::time::Instant::now();
        let cycle = self.heartbeat.beat(self.clock.now());
        tracing::info!(cycle, "cycle started");

        let (tx, mut rx) = mpsc::channel::<RawRecord>(self.workers.publish_queue_depth);

        // Publish lane: a slow collaborator must not stall fetching.
        let processor = self.processor.clone();
        let publisher = self.publisher.clone();
        let publish_task = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                match processor.process(&record).await {
                    // Transient publish errors were already queued by the
                    // publisher; terminal ones were logged. Nothing more to
                    // do on either.
                    Ok(Some(draft)) => {
                        let _ = publisher.publish(&draft).await;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(source = %record.source, error = %e, "record rejected");
                    }
                }
            }
        });

        let mut handles = Vec::with_capacity(self.adapters.len());
        for adapter in &self.adapters {
            let adapter = adapter.clone();
            let tx = tx.clone();
            let semaphore = self.semaphore.clone();
            let cursors = self.cursors.clone();
            let breakers = self.breakers.clone();
            let clock = self.clock.clone();
            let deadline = Duration::from_secs(self.workers.source_timeout_secs);

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                let name = adapter.name().to_string();
                let cursor = cursors
                    .lock()
                    .expect("cursor mutex poisoned")
                    .get(&name)
                    .cloned();

                match tokio::time::timeout(deadline, adapter.fetch(cursor.as_deref())).await {
                    Ok(Ok(FetchOutcome::Fetched {
                        records,
                        next_cursor,
                    })) => {
                        {
                            let mut cursors = cursors.lock().expect("cursor mutex poisoned");
                            match next_cursor {
                                Some(c) => {
                                    cursors.insert(name.clone(), c);
                                }
                                None => {
                                    cursors.remove(&name);
                                }
                            }
                        }
                        tracing::debug!(source = %name, records = records.len(), "fetched");
                        for record in records {
                            // Receiver gone means the cycle is tearing down.
                            if tx.send(record).await.is_err() {
                                break;
                            }
                        }
                    }
                    Ok(Ok(FetchOutcome::Skipped { reason })) => {
                        tracing::debug!(source = %name, reason = reason.as_str(), "skipped");
                    }
                    Ok(Err(e)) => {
                        // Breaker/limiter already informed by the adapter.
                        tracing::warn!(source = %name, error = %e, "fetch failed");
                    }
                    Err(_elapsed) => {
                        if let Some(breaker) = breakers.get(&name) {
                            breaker.record_failure(clock.now());
                        }
                        metrics::counter!("fetch_timeouts_total", "source" => name.clone())
                            .increment(1);
                        tracing::warn!(source = %name, timeout_secs = deadline.as_secs(), "fetch timed out, abandoned for this cycle");
                    }
                }
            }));
        }
        drop(tx);

        for handle in handles {
            if let Err(e) = handle.await {
                // A panicking source worker must not take the cycle down.
                tracing::error!(error = %e, "source worker panicked");
            }
        }
        if let Err(e) = publish_task.await {
            tracing::error!(error = %e, "publish lane panicked");
        }

        self.replay_due().await;

        let elapsed = cycle_started.elapsed().as_secs_f64();
        metrics::histogram!("cycle_duration_seconds").record(elapsed);
        tracing::info!(cycle, elapsed_secs = elapsed, "cycle finished");
    }

    /// Replay every retry task that has come due. One single-threaded
    /// dequeue-and-acknowledge pass per cycle, so two workers can never
    /// double-process the same task.
    async fn replay_due(&self) {
        let due = self.queue.dequeue_due(self.clock.now());
        if due.is_empty() {
            return;
        }
        tracing::info!(count = due.len(), "replaying due retry tasks");
        for task in due {
            if let Err(e) = self.publisher.replay(&task).await {
                tracing::error!(task_id = %task.id, error = %e, "retry bookkeeping failed");
            }
        }
    }
}
