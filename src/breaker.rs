// src/breaker.rs
//
// Per-source circuit breaker.
//
// States: closed (normal) -> open (failure threshold reached) -> half_open
// (open timeout elapsed) -> closed (success threshold in half_open) or back
// to open on any half_open failure. A flapping source cannot sit in
// half_open: one failure restarts a full open period.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Thresholds for one source, from configuration.
#[derive(Debug, Clone)]
pub struct BreakerPolicy {
    pub failure_threshold: u32,
    pub open_timeout: Duration,
    pub success_threshold: u32,
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout: Duration::seconds(300),
            success_threshold: 2,
        }
    }
}

#[derive(Debug)]
struct BreakerCell {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<DateTime<Utc>>,
}

/// Point-in-time view for the status surface.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub opened_at: Option<DateTime<Utc>>,
}

/// Breaker for a single source. All transitions take an explicit `now` so
/// tests never sleep through an open window.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    policy: BreakerPolicy,
    cell: Mutex<BreakerCell>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, policy: BreakerPolicy) -> Self {
        Self {
            name: name.into(),
            policy,
            cell: Mutex::new(BreakerCell {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                opened_at: None,
            }),
        }
    }

    /// Whether a call may go out right now. In `open`, flips to `half_open`
    /// as a side effect once the timeout has elapsed.
    pub fn can_proceed(&self, now: DateTime<Utc>) -> bool {
        let mut cell = self.cell.lock().expect("breaker mutex poisoned");
        match cell.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let opened_at = cell.opened_at.unwrap_or(now);
                if now - opened_at >= self.policy.open_timeout {
                    tracing::info!(source = %self.name, "circuit half-open, probing");
                    cell.state = CircuitState::HalfOpen;
                    cell.success_count = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self, _now: DateTime<Utc>) {
        let mut cell = self.cell.lock().expect("breaker mutex poisoned");
        match cell.state {
            CircuitState::Closed => {
                cell.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                cell.success_count += 1;
                if cell.success_count >= self.policy.success_threshold {
                    tracing::info!(source = %self.name, "circuit closed again");
                    cell.state = CircuitState::Closed;
                    cell.failure_count = 0;
                    cell.success_count = 0;
                    cell.opened_at = None;
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self, now: DateTime<Utc>) {
        let mut cell = self.cell.lock().expect("breaker mutex poisoned");
        match cell.state {
            CircuitState::Closed => {
                cell.failure_count += 1;
                if cell.failure_count >= self.policy.failure_threshold {
                    tracing::warn!(
                        source = %self.name,
                        failures = cell.failure_count,
                        "circuit open"
                    );
                    cell.state = CircuitState::Open;
                    cell.opened_at = Some(now);
                }
            }
            CircuitState::HalfOpen => {
                // Recovery probe failed: fresh open period.
                tracing::warn!(source = %self.name, "recovery probe failed, circuit open");
                cell.state = CircuitState::Open;
                cell.failure_count += 1;
                cell.success_count = 0;
                cell.opened_at = Some(now);
            }
            CircuitState::Open => {
                cell.failure_count += 1;
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        self.cell.lock().expect("breaker mutex poisoned").state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let cell = self.cell.lock().expect("breaker mutex poisoned");
        BreakerSnapshot {
            state: cell.state,
            failure_count: cell.failure_count,
            success_count: cell.success_count,
            opened_at: cell.opened_at,
        }
    }
}

/// One breaker per source, built at startup. No global singletons: workers
/// get per-source handles cloned out of this registry.
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    breakers: HashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, policy: BreakerPolicy) {
        let name = name.into();
        self.breakers
            .insert(name.clone(), Arc::new(CircuitBreaker::new(name, policy)));
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).cloned()
    }

    pub fn snapshots(&self) -> HashMap<String, BreakerSnapshot> {
        self.breakers
            .iter()
            .map(|(k, v)| (k.clone(), v.snapshot()))
            .collect()
    }

    /// Count of sources currently in `open`.
    pub fn open_count(&self) -> usize {
        self.breakers
            .values()
            .filter(|b| b.state() == CircuitState::Open)
            .count()
    }
}
