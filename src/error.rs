// src/error.rs

//! Unified error taxonomy for the collection pipeline.

use std::fmt;

use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, BotError>;

/// Unified pipeline error type.
///
/// The first six variants mirror the pipeline failure taxonomy; `Config`,
/// `Storage` and `Json` cover the ambient faults around it.
#[derive(Error, Debug)]
pub enum BotError {
    /// A source could not be reached or answered with garbage (transient,
    /// source-local; counts against that source's circuit breaker).
    #[error("source '{src}' unavailable: {message}")]
    SourceUnavailable { src: String, message: String },

    /// The remote signalled a rate limit (transient; feeds the rate
    /// limiter's backoff, not the circuit breaker).
    #[error("rate limited by '{src}'")]
    RateLimited { src: String },

    /// A draft failed validation, locally or at the verifier (terminal).
    #[error("validation rejected for '{slug}': {message}")]
    ValidationRejected { slug: String, message: String },

    /// A publish attempt failed in a way that is worth retrying.
    #[error("transient publish failure: {message}")]
    PublishTransient { message: String },

    /// A publish attempt failed in a way that retrying cannot fix.
    #[error("terminal publish failure{}: {message}", fmt_status(.status))]
    PublishTerminal { status: Option<u16>, message: String },

    /// A queued task exhausted its retry schedule.
    #[error("retries exhausted for task {task_id}")]
    RetryExhausted { task_id: String },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Retry-log or filesystem fault
    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn fmt_status(status: &Option<u16>) -> String {
    match status {
        Some(s) => format!(" (status {s})"),
        None => String::new(),
    }
}

impl BotError {
    /// Create a source-unavailable error.
    pub fn source_unavailable(source: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::SourceUnavailable {
            src: source.into(),
            message: message.to_string(),
        }
    }

    /// Create a rate-limited error.
    pub fn rate_limited(source: impl Into<String>) -> Self {
        Self::RateLimited {
            src: source.into(),
        }
    }

    /// Create a validation-rejected error.
    pub fn validation_rejected(slug: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::ValidationRejected {
            slug: slug.into(),
            message: message.to_string(),
        }
    }

    /// Create a transient publish error.
    pub fn publish_transient(message: impl fmt::Display) -> Self {
        Self::PublishTransient {
            message: message.to_string(),
        }
    }

    /// Create a terminal publish error.
    pub fn publish_terminal(status: Option<u16>, message: impl fmt::Display) -> Self {
        Self::PublishTerminal {
            status,
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// True for failures the retry queue should pick up.
    pub fn is_retryable_publish(&self) -> bool {
        matches!(self, Self::PublishTransient { .. } | Self::RateLimited { .. })
    }
}
