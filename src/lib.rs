// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod api;
pub mod breaker;
pub mod clock;
pub mod config;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod process;
pub mod publish;
pub mod ratelimit;
pub mod retry;
pub mod sources;
pub mod types;

// ---- Re-exports for stable public API ----
pub use crate::breaker::{BreakerPolicy, BreakerRegistry, CircuitBreaker, CircuitState};
pub use crate::clock::{Clock, ManualClock, SystemClock};
pub use crate::config::{Config, SourceKind};
pub use crate::error::{BotError, Result};
pub use crate::orchestrator::Orchestrator;
pub use crate::process::{Processor, Verdict, Verifier};
pub use crate::publish::{Ack, ContentApiClient, Publisher, ReplayOutcome};
pub use crate::ratelimit::{RateLimiter, RatePolicy, RateRegistry};
pub use crate::retry::{FailedTask, RetryDisposition, RetryQueue, TaskStatus};
pub use crate::sources::{FetchMode, FetchOutcome, SkipReason, SourceAdapter, SourceGate};
pub use crate::types::{EntityDraft, EntityKind, RawRecord};
