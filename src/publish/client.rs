// src/publish/client.rs
//
// REST client for the content platform. The collaborator upserts on slug:
// POST /entities/{kind} answers {id, created} for new and existing rows
// alike, so replaying a publish can never duplicate an entity.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{BotError, Result};
use crate::types::{EntityDraft, EntityKind};

/// Successful publish acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Ack {
    pub id: i64,
    pub created: bool,
}

/// Per-item outcome of a bulk call, ordered 1:1 with the input.
#[derive(Debug, Clone, Deserialize)]
pub struct BulkItemResult {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub created: Option<bool>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    results: Vec<BulkItemResult>,
}

#[derive(Clone)]
pub struct ContentApiClient {
    base_url: String,
    token: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl ContentApiClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.into(),
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    /// Create-or-upsert one entity. Transient conditions (connect/timeout,
    /// 5xx, 429) come back as retryable errors; other 4xx are terminal.
    pub async fn create_entity(&self, kind: EntityKind, fields: &Map<String, Value>) -> Result<Ack> {
        let url = format!("{}/entities/{}", self.base_url, kind.as_str());
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .timeout(self.timeout)
            .json(fields)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = resp.status();
        if status.is_success() {
            return resp
                .json::<Ack>()
                .await
                .map_err(|e| BotError::publish_transient(format!("malformed ack: {e}")));
        }

        let body = resp.text().await.unwrap_or_default();
        Err(classify_status(status.as_u16(), &body))
    }

    /// Batch upsert of drafts sharing one kind; the response is ordered
    /// 1:1 with the input.
    pub async fn create_bulk(
        &self,
        kind: EntityKind,
        drafts: &[EntityDraft],
    ) -> Result<Vec<BulkItemResult>> {
        let url = format!("{}/entities/bulk", self.base_url);
        let items: Vec<&Map<String, Value>> = drafts.iter().map(|d| &d.fields).collect();
        let body = serde_json::json!({ "kind": kind.as_str(), "items": items });

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = resp.status();
        if status.is_success() {
            let parsed: BulkResponse = resp
                .json()
                .await
                .map_err(|e| BotError::publish_transient(format!("malformed bulk ack: {e}")))?;
            if parsed.results.len() != drafts.len() {
                return Err(BotError::publish_transient(format!(
                    "bulk result count {} != input {}",
                    parsed.results.len(),
                    drafts.len()
                )));
            }
            return Ok(parsed.results);
        }

        let body = resp.text().await.unwrap_or_default();
        Err(classify_status(status.as_u16(), &body))
    }

    /// Collaborator liveness. No auth required on this endpoint.
    pub async fn health(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self.client.get(&url).timeout(self.timeout).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::warn!(error = %e, "collaborator health check failed");
                false
            }
        }
    }

    /// Collaborator status/capacity details (authenticated). `None` when
    /// unreachable; callers treat that as "unknown", not fatal.
    pub async fn status(&self) -> Option<Value> {
        let url = format!("{}/status", self.base_url);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .timeout(self.timeout)
            .send()
            .await
            .ok()?;
        if !resp.status().is_success() {
            return None;
        }
        resp.json().await.ok()
    }
}

fn classify_transport(err: reqwest::Error) -> BotError {
    BotError::publish_transient(err)
}

fn classify_status(status: u16, body: &str) -> BotError {
    let summary: String = body.chars().take(200).collect();
    match status {
        429 => BotError::rate_limited("collaborator"),
        500..=599 => BotError::publish_transient(format!("HTTP {status}: {summary}")),
        _ => BotError::publish_terminal(Some(status), summary),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(matches!(
            classify_status(503, "overloaded"),
            BotError::PublishTransient { .. }
        ));
        assert!(matches!(
            classify_status(429, ""),
            BotError::RateLimited { .. }
        ));
        assert!(matches!(
            classify_status(400, "bad slug"),
            BotError::PublishTerminal {
                status: Some(400),
                ..
            }
        ));
        assert!(matches!(
            classify_status(401, ""),
            BotError::PublishTerminal { .. }
        ));
    }
}
