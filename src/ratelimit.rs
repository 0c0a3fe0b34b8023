// src/ratelimit.rs
//
// Per-source request budgets: two fixed windows (minute, hour) that must
// both have tokens, plus a backoff multiplier driven by server-signalled
// rate limits. Backoff is multiplicative (x2 per signal, capped at 10),
// recovery is additive (-0.5 per success, floor 1.0), so backing off is
// fast and recovery is cautious.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

const MAX_MULTIPLIER: f64 = 10.0;
const DECAY_STEP: f64 = 0.5;

/// Configured caps for one source.
#[derive(Debug, Clone, Copy)]
pub struct RatePolicy {
    pub per_minute: u32,
    pub per_hour: u32,
}

impl Default for RatePolicy {
    fn default() -> Self {
        Self {
            per_minute: 30,
            per_hour: 500,
        }
    }
}

#[derive(Debug)]
struct BudgetCell {
    minute_tokens: u32,
    hour_tokens: u32,
    minute_reset: DateTime<Utc>,
    hour_reset: DateTime<Utc>,
    multiplier: f64,
    last_granted: Option<DateTime<Utc>>,
}

/// Point-in-time view for the status surface.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RateSnapshot {
    pub minute_remaining: u32,
    pub hour_remaining: u32,
    pub backoff_multiplier: f64,
}

#[derive(Debug)]
pub struct RateLimiter {
    policy: RatePolicy,
    cell: Mutex<BudgetCell>,
}

impl RateLimiter {
    pub fn new(policy: RatePolicy, now: DateTime<Utc>) -> Self {
        Self {
            policy,
            cell: Mutex::new(BudgetCell {
                minute_tokens: policy.per_minute,
                hour_tokens: policy.per_hour,
                minute_reset: now + Duration::seconds(60),
                hour_reset: now + Duration::seconds(3600),
                multiplier: 1.0,
                last_granted: None,
            }),
        }
    }

    /// Take one token from both windows, or deny. Under backoff the
    /// effective inter-request gap is `(60 / per_minute) * multiplier`.
    pub fn try_acquire(&self, now: DateTime<Utc>) -> bool {
        let mut cell = self.cell.lock().expect("rate mutex poisoned");

        if now >= cell.minute_reset {
            cell.minute_tokens = self.policy.per_minute;
            cell.minute_reset = now + Duration::seconds(60);
        }
        if now >= cell.hour_reset {
            cell.hour_tokens = self.policy.per_hour;
            cell.hour_reset = now + Duration::seconds(3600);
        }

        if cell.multiplier > 1.0 {
            let gap_secs = (60.0 / self.policy.per_minute as f64) * cell.multiplier;
            if let Some(last) = cell.last_granted {
                let elapsed = (now - last).num_milliseconds() as f64 / 1000.0;
                if elapsed < gap_secs {
                    return false;
                }
            }
        }

        if cell.minute_tokens == 0 || cell.hour_tokens == 0 {
            return false;
        }

        cell.minute_tokens -= 1;
        cell.hour_tokens -= 1;
        cell.last_granted = Some(now);
        true
    }

    /// Server said 429 (or equivalent): double the backoff, capped.
    pub fn record_rate_limited(&self) {
        let mut cell = self.cell.lock().expect("rate mutex poisoned");
        cell.multiplier = (cell.multiplier * 2.0).min(MAX_MULTIPLIER);
    }

    /// A request went through fine: decay the backoff toward 1.0.
    pub fn record_success(&self) {
        let mut cell = self.cell.lock().expect("rate mutex poisoned");
        cell.multiplier = (cell.multiplier - DECAY_STEP).max(1.0);
    }

    pub fn snapshot(&self) -> RateSnapshot {
        let cell = self.cell.lock().expect("rate mutex poisoned");
        RateSnapshot {
            minute_remaining: cell.minute_tokens,
            hour_remaining: cell.hour_tokens,
            backoff_multiplier: cell.multiplier,
        }
    }
}

/// One budget per source, built at startup.
#[derive(Debug, Default)]
pub struct RateRegistry {
    limiters: HashMap<String, Arc<RateLimiter>>,
}

impl RateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, policy: RatePolicy, now: DateTime<Utc>) {
        self.limiters
            .insert(name.into(), Arc::new(RateLimiter::new(policy, now)));
    }

    pub fn get(&self, name: &str) -> Option<Arc<RateLimiter>> {
        self.limiters.get(name).cloned()
    }

    pub fn snapshots(&self) -> HashMap<String, RateSnapshot> {
        self.limiters
            .iter()
            .map(|(k, v)| (k.clone(), v.snapshot()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denies_when_minute_budget_exhausted_replenishes_next_window() {
        let t0 = Utc::now();
        let rl = RateLimiter::new(
            RatePolicy {
                per_minute: 3,
                per_hour: 100,
            },
            t0,
        );
        assert!(rl.try_acquire(t0));
        assert!(rl.try_acquire(t0));
        assert!(rl.try_acquire(t0));
        assert!(!rl.try_acquire(t0), "minute budget exhausted");
        assert!(!rl.try_acquire(t0 + Duration::seconds(59)));
        assert!(rl.try_acquire(t0 + Duration::seconds(60)), "window rolled");
    }

    #[test]
    fn hour_cap_binds_independently() {
        let t0 = Utc::now();
        let rl = RateLimiter::new(
            RatePolicy {
                per_minute: 10,
                per_hour: 2,
            },
            t0,
        );
        assert!(rl.try_acquire(t0));
        assert!(rl.try_acquire(t0));
        // Minute tokens remain but the hour budget is gone.
        assert!(!rl.try_acquire(t0 + Duration::seconds(61)));
        assert!(rl.try_acquire(t0 + Duration::seconds(3600)));
    }

    #[test]
    fn backoff_doubles_and_caps_recovery_is_additive() {
        let t0 = Utc::now();
        let rl = RateLimiter::new(RatePolicy::default(), t0);
        for _ in 0..6 {
            rl.record_rate_limited();
        }
        assert_eq!(rl.snapshot().backoff_multiplier, 10.0, "capped at 10x");
        rl.record_success();
        assert_eq!(rl.snapshot().backoff_multiplier, 9.5);
        for _ in 0..40 {
            rl.record_success();
        }
        assert_eq!(rl.snapshot().backoff_multiplier, 1.0, "never below 1.0");
    }

    #[test]
    fn backoff_enforces_inter_request_gap() {
        let t0 = Utc::now();
        let rl = RateLimiter::new(
            RatePolicy {
                per_minute: 60, // base gap 1s
                per_hour: 10_000,
            },
            t0,
        );
        assert!(rl.try_acquire(t0));
        rl.record_rate_limited(); // multiplier 2.0 -> gap 2s
        assert!(!rl.try_acquire(t0 + Duration::seconds(1)));
        assert!(rl.try_acquire(t0 + Duration::seconds(2)));
    }
}
