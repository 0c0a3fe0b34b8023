// src/publish/mod.rs
//
// Publisher: the only component that talks to the collaborator's write
// endpoints. Keeps the pipeline invariant: a draft is in flight here XOR
// recorded as exactly one FailedTask XOR published and gone.

pub mod client;

use std::sync::Arc;

use chrono::{DateTime, Utc};

pub use client::{Ack, BulkItemResult, ContentApiClient};

use crate::clock::Clock;
use crate::error::{BotError, Result};
use crate::retry::{FailedTask, RetryDisposition, RetryQueue};
use crate::types::EntityDraft;

/// What happened to a replayed task.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplayOutcome {
    Published(Ack),
    Rescheduled { next_retry_at: DateTime<Utc> },
    DeadLettered,
}

pub struct Publisher {
    api: Arc<ContentApiClient>,
    queue: Arc<RetryQueue>,
    clock: Arc<dyn Clock>,
}

impl Publisher {
    pub fn new(api: Arc<ContentApiClient>, queue: Arc<RetryQueue>, clock: Arc<dyn Clock>) -> Self {
        Self { api, queue, clock }
    }

    /// Publish one draft. Transient failures are enqueued for retry before
    /// the error is returned; terminal failures are reported and dropped
    /// from the pipeline.
    pub async fn publish(&self, draft: &EntityDraft) -> Result<Ack> {
        match self.api.create_entity(draft.kind, &draft.fields).await {
            Ok(ack) => {
                metrics::counter!("publish_ok_total").increment(1);
                tracing::info!(
                    kind = %draft.kind,
                    slug = draft.slug(),
                    id = ack.id,
                    created = ack.created,
                    "published"
                );
                Ok(ack)
            }
            Err(e) if e.is_retryable_publish() => {
                metrics::counter!("publish_transient_total").increment(1);
                let task = self
                    .queue
                    .enqueue(draft, &e.to_string(), self.clock.now())?;
                tracing::warn!(
                    kind = %draft.kind,
                    slug = draft.slug(),
                    task_id = %task.id,
                    next_retry_at = %task.next_retry_at,
                    error = %e,
                    "publish failed, queued for retry"
                );
                Err(e)
            }
            Err(e) => {
                metrics::counter!("publish_terminal_total").increment(1);
                tracing::error!(
                    kind = %draft.kind,
                    slug = draft.slug(),
                    source = %draft.provenance.source,
                    error = %e,
                    "publish failed terminally"
                );
                Err(e)
            }
        }
    }

    /// Replay one due task from the retry queue. Success acknowledges and
    /// removes it; a transient failure reschedules (or dead-letters once
    /// the schedule is exhausted); a terminal failure dead-letters at once.
    pub async fn replay(&self, task: &FailedTask) -> Result<ReplayOutcome> {
        metrics::counter!("retry_replayed_total").increment(1);
        match self
            .api
            .create_entity(task.draft.kind, &task.draft.fields)
            .await
        {
            Ok(ack) => {
                self.queue.ack_success(&task.id)?;
                tracing::info!(task_id = %task.id, id = ack.id, "retried publish succeeded");
                Ok(ReplayOutcome::Published(ack))
            }
            Err(e) if e.is_retryable_publish() => {
                match self
                    .queue
                    .record_failure(&task.id, &e.to_string(), self.clock.now())?
                {
                    RetryDisposition::Rescheduled { next_retry_at } => {
                        tracing::warn!(
                            task_id = %task.id,
                            attempts = task.attempts + 1,
                            next_retry_at = %next_retry_at,
                            error = %e,
                            "retry failed, rescheduled"
                        );
                        Ok(ReplayOutcome::Rescheduled { next_retry_at })
                    }
                    RetryDisposition::DeadLettered => {
                        let exhausted = BotError::RetryExhausted {
                            task_id: task.id.clone(),
                        };
                        tracing::error!(
                            task_id = %task.id,
                            slug = task.draft.slug(),
                            error = %exhausted,
                            "retry schedule exhausted, dead-lettered"
                        );
                        Ok(ReplayOutcome::DeadLettered)
                    }
                }
            }
            Err(e) => {
                self.queue.give_up(&task.id, &e.to_string())?;
                tracing::error!(
                    task_id = %task.id,
                    slug = task.draft.slug(),
                    error = %e,
                    "terminal failure on retry, dead-lettered"
                );
                Ok(ReplayOutcome::DeadLettered)
            }
        }
    }
}
