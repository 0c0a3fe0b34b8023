// src/sources/mod.rs
//
// Source adapter framework. Every adapter consults its gate (rate budget +
// circuit state) before touching the network; denial is a skip, never an
// error. Transport failures are reported to the gate and surfaced as
// SourceUnavailable. Retrying a fetch is the next cycle's job, not the
// adapter's.

pub mod matchdb;
pub mod news_rss;
pub mod wikipedia;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::breaker::CircuitBreaker;
use crate::clock::Clock;
use crate::config::{SourceConfig, SourceKind};
use crate::error::{BotError, Result};
use crate::ratelimit::RateLimiter;
use crate::types::RawRecord;

/// Why a fetch was skipped without network contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    CircuitOpen,
    RateLimited,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::CircuitOpen => "circuit_open",
            SkipReason::RateLimited => "rate_limited",
        }
    }
}

/// Result of one fetch call.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Fetched {
        records: Vec<RawRecord>,
        next_cursor: Option<String>,
    },
    Skipped {
        reason: SkipReason,
    },
}

/// Contract: lazy, finite, restartable per cursor: a fresh call with the
/// same cursor yields a consistent or superset result.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn name(&self) -> &str;
    async fn fetch(&self, cursor: Option<&str>) -> Result<FetchOutcome>;
}

/// Shared pre-flight gate and failure-reporting handle for one source.
pub struct SourceGate {
    name: String,
    breaker: Arc<CircuitBreaker>,
    limiter: Arc<RateLimiter>,
    clock: Arc<dyn Clock>,
}

impl SourceGate {
    pub fn new(
        name: impl Into<String>,
        breaker: Arc<CircuitBreaker>,
        limiter: Arc<RateLimiter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name: name.into(),
            breaker,
            limiter,
            clock,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Must pass before any network contact.
    pub fn check(&self) -> std::result::Result<(), SkipReason> {
        let now = self.clock.now();
        if !self.breaker.can_proceed(now) {
            metrics::counter!("fetch_skipped_total", "reason" => "circuit_open").increment(1);
            return Err(SkipReason::CircuitOpen);
        }
        if !self.limiter.try_acquire(now) {
            metrics::counter!("fetch_skipped_total", "reason" => "rate_limited").increment(1);
            return Err(SkipReason::RateLimited);
        }
        Ok(())
    }

    pub fn report_success(&self) {
        let now = self.clock.now();
        self.breaker.record_success(now);
        self.limiter.record_success();
    }

    /// Transport-level failure: circuit signal only, no retry-queue entry.
    pub fn report_failure(&self) {
        self.breaker.record_failure(self.clock.now());
        metrics::counter!("fetch_errors_total", "source" => self.name.clone()).increment(1);
    }

    /// Server-signalled rate limit: backoff signal, not a circuit failure.
    pub fn report_rate_limited(&self) {
        self.limiter.record_rate_limited();
    }

    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }
}

/// How an adapter reaches its source. Fixture mode feeds a canned payload
/// through the same parser the HTTP path uses.
pub enum FetchMode {
    Fixture(String),
    Http {
        endpoint: String,
        client: reqwest::Client,
    },
}

impl FetchMode {
    pub fn http(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("WrestleBot/2.0 (Wrestling Database; https://wrestlingdb.org)")
            .timeout(timeout)
            .build()
            .map_err(|e| BotError::config(format!("building http client: {e}")))?;
        Ok(Self::Http {
            endpoint: endpoint.into(),
            client,
        })
    }
}

/// Build the adapter for one configured source. Closed set: kinds map to
/// concrete adapters here, nothing is resolved by name at runtime.
pub fn build_adapter(
    cfg: &SourceConfig,
    gate: SourceGate,
    timeout: Duration,
) -> Result<Arc<dyn SourceAdapter>> {
    let endpoint = cfg.endpoint.clone();
    match cfg.kind {
        SourceKind::Wikipedia => {
            let endpoint =
                endpoint.unwrap_or_else(|| wikipedia::DEFAULT_API_ENDPOINT.to_string());
            let mode = FetchMode::http(endpoint, timeout)?;
            Ok(Arc::new(wikipedia::WikipediaAdapter::new(
                gate,
                mode,
                cfg.categories.clone(),
            )))
        }
        SourceKind::Rss => {
            let endpoint = endpoint
                .ok_or_else(|| BotError::config(format!("source '{}': rss needs endpoint", cfg.name)))?;
            let mode = FetchMode::http(endpoint, timeout)?;
            Ok(Arc::new(news_rss::NewsRssAdapter::new(gate, mode)))
        }
        SourceKind::MatchDb => {
            let endpoint = endpoint
                .ok_or_else(|| BotError::config(format!("source '{}': match_db needs endpoint", cfg.name)))?;
            let mode = FetchMode::http(endpoint, timeout)?;
            Ok(Arc::new(matchdb::MatchDbAdapter::new(gate, mode)))
        }
    }
}

/// Map a reqwest transport error onto the taxonomy and report it.
pub(crate) fn transport_error(gate: &SourceGate, err: reqwest::Error) -> BotError {
    gate.report_failure();
    BotError::source_unavailable(gate.name(), err)
}

/// Map a non-2xx response onto the taxonomy: 429 feeds the limiter, the
/// rest count against the breaker.
pub(crate) fn status_error(gate: &SourceGate, status: reqwest::StatusCode) -> BotError {
    if status.as_u16() == 429 {
        gate.report_rate_limited();
        BotError::rate_limited(gate.name())
    } else {
        gate.report_failure();
        BotError::source_unavailable(gate.name(), format!("HTTP {status}"))
    }
}
