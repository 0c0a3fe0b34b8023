// src/retry.rs
//
// Durable retry queue: a JSON-lines log of failed publish tasks with
// scheduled re-attempt times. Enqueue appends; every other mutation
// compacts the log via atomic rewrite (temp file + rename). Dequeue does
// NOT remove: removal happens only on explicit acknowledgment, so a crash
// between dequeue and processing cannot lose a task. Tasks that exhaust the
// delay schedule become dead letters and stay in the log for operators.

use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};

use crate::error::{BotError, Result};
use crate::types::EntityDraft;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Publish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    DeadLetter,
}

/// One durable record of a failed attempt.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FailedTask {
    pub id: String,
    pub kind: TaskKind,
    pub draft: EntityDraft,
    pub error: String,
    pub attempts: u32,
    pub next_retry_at: DateTime<Utc>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
}

/// What happened to a task after another failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDisposition {
    Rescheduled { next_retry_at: DateTime<Utc> },
    DeadLettered,
}

pub struct RetryQueue {
    path: PathBuf,
    schedule: Vec<Duration>,
    tasks: Mutex<Vec<FailedTask>>,
}

impl RetryQueue {
    /// Open (or create) the log at `path` with the given delay schedule in
    /// seconds. Corrupt lines are skipped with a warning, not fatal.
    pub fn open(path: impl Into<PathBuf>, schedule_secs: &[u64]) -> Result<Self> {
        if schedule_secs.is_empty() {
            return Err(BotError::config("retry delay schedule must not be empty"));
        }
        let path = path.into();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }

        let mut tasks = Vec::new();
        if path.exists() {
            for (lineno, line) in fs::read_to_string(&path)?.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<FailedTask>(line) {
                    Ok(task) => tasks.push(task),
                    Err(e) => {
                        tracing::warn!(
                            path = %path.display(),
                            line = lineno + 1,
                            error = %e,
                            "skipping corrupt retry-log line"
                        );
                    }
                }
            }
        }

        Ok(Self {
            path,
            schedule: schedule_secs
                .iter()
                .map(|s| Duration::seconds(*s as i64))
                .collect(),
            tasks: Mutex::new(tasks),
        })
    }

    /// Store a freshly failed draft: attempt 1, due after the first delay.
    pub fn enqueue(
        &self,
        draft: &EntityDraft,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<FailedTask> {
        let task = FailedTask {
            id: task_id(draft, now),
            kind: TaskKind::Publish,
            draft: draft.clone(),
            error: error.to_string(),
            attempts: 1,
            next_retry_at: now + self.schedule[0],
            status: TaskStatus::Pending,
            created_at: now,
        };

        let mut tasks = self.tasks.lock().expect("retry mutex poisoned");
        let line = serde_json::to_string(&task)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")?;
        tasks.push(task.clone());

        metrics::counter!("retry_enqueued_total").increment(1);
        Ok(task)
    }

    /// All pending tasks due at `now`, oldest-due first. Non-destructive.
    pub fn dequeue_due(&self, now: DateTime<Utc>) -> Vec<FailedTask> {
        let tasks = self.tasks.lock().expect("retry mutex poisoned");
        let mut due: Vec<FailedTask> = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending && t.next_retry_at <= now)
            .cloned()
            .collect();
        due.sort_by_key(|t| t.next_retry_at);
        due
    }

    /// The replayed task succeeded: remove it from the log.
    pub fn ack_success(&self, id: &str) -> Result<()> {
        let mut tasks = self.tasks.lock().expect("retry mutex poisoned");
        tasks.retain(|t| t.id != id);
        self.rewrite(&tasks)
    }

    /// The replayed task failed again: reschedule with the next delay, or
    /// dead-letter once the schedule is exhausted.
    pub fn record_failure(
        &self,
        id: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<RetryDisposition> {
        let mut tasks = self.tasks.lock().expect("retry mutex poisoned");
        let task = tasks
            .iter_mut()
            .find(|t| t.id == id && t.status == TaskStatus::Pending)
            .ok_or_else(|| BotError::config(format!("unknown pending task '{id}'")))?;

        task.attempts += 1;
        task.error = error.to_string();

        let disposition = match self.schedule.get(task.attempts as usize - 1) {
            Some(delay) => {
                // next_retry_at must strictly increase across failures.
                let candidate = now + *delay;
                task.next_retry_at = if candidate > task.next_retry_at {
                    candidate
                } else {
                    task.next_retry_at + *delay
                };
                RetryDisposition::Rescheduled {
                    next_retry_at: task.next_retry_at,
                }
            }
            None => {
                task.status = TaskStatus::DeadLetter;
                metrics::counter!("retry_dead_letter_total").increment(1);
                RetryDisposition::DeadLettered
            }
        };

        self.rewrite(&tasks)?;
        Ok(disposition)
    }

    /// Terminal failure on replay: no point retrying, surface it for
    /// operator inspection instead of deleting.
    pub fn give_up(&self, id: &str, error: &str) -> Result<()> {
        let mut tasks = self.tasks.lock().expect("retry mutex poisoned");
        let task = tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| BotError::config(format!("unknown task '{id}'")))?;
        task.status = TaskStatus::DeadLetter;
        task.error = error.to_string();
        metrics::counter!("retry_dead_letter_total").increment(1);
        self.rewrite(&tasks)
    }

    pub fn pending_count(&self) -> usize {
        self.tasks
            .lock()
            .expect("retry mutex poisoned")
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .count()
    }

    pub fn dead_letter_count(&self) -> usize {
        self.tasks
            .lock()
            .expect("retry mutex poisoned")
            .iter()
            .filter(|t| t.status == TaskStatus::DeadLetter)
            .count()
    }

    pub fn dead_letters(&self) -> Vec<FailedTask> {
        self.tasks
            .lock()
            .expect("retry mutex poisoned")
            .iter()
            .filter(|t| t.status == TaskStatus::DeadLetter)
            .cloned()
            .collect()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn rewrite(&self, tasks: &[FailedTask]) -> Result<()> {
        let tmp = self.path.with_extension("jsonl.tmp");
        let mut buf = String::new();
        for task in tasks {
            buf.push_str(&serde_json::to_string(task)?);
            buf.push('\n');
        }
        fs::write(&tmp, buf)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn task_id(draft: &EntityDraft, now: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(draft.kind.as_str().as_bytes());
    hasher.update(draft.slug().as_bytes());
    hasher.update(now.timestamp_millis().to_be_bytes());
    let digest = hasher.finalize();
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}
