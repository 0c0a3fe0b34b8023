// src/config.rs

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{BotError, Result};

const ENV_CONFIG_PATH: &str = "WRESTLEBOT_CONFIG_PATH";
const ENV_API_TOKEN: &str = "WRESTLEBOT_API_TOKEN";
const DEFAULT_CONFIG_PATH: &str = "config/wrestlebot.toml";

/// Top-level service configuration, loaded once at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    #[serde(default)]
    pub workers: WorkerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub status: StatusConfig,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

/// Collaborator (content platform) endpoint + credential.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    /// Bearer token; falls back to $WRESTLEBOT_API_TOKEN when absent.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_max_concurrent_sources")]
    pub max_concurrent_sources: usize,
    #[serde(default = "default_publish_queue_depth")]
    pub publish_queue_depth: usize,
    /// Per-source fetch+process deadline per cycle.
    #[serde(default = "default_source_timeout")]
    pub source_timeout_secs: u64,
    /// Pause between cycles; 0 means none (sources self-throttle).
    #[serde(default = "default_cycle_idle")]
    pub cycle_idle_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sources: default_max_concurrent_sources(),
            publish_queue_depth: default_publish_queue_depth(),
            source_timeout_secs: default_source_timeout(),
            cycle_idle_secs: default_cycle_idle(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_delay_schedule")]
    pub delay_schedule_secs: Vec<u64>,
    #[serde(default = "default_queue_path")]
    pub queue_path: PathBuf,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            delay_schedule_secs: default_delay_schedule(),
            queue_path: default_queue_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

/// Closed set of adapter kinds; selected from config, never loaded by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Wikipedia,
    Rss,
    MatchDb,
}

/// One named external data origin. Immutable during a run; its live
/// circuit/rate state lives in the registries.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub kind: SourceKind,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Endpoint (wikipedia/match_db) or feed URL (rss). Empty means the
    /// adapter runs on its fixture payload, if one is configured.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Wikipedia only: categories to walk.
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default = "default_per_minute")]
    pub requests_per_minute: u32,
    #[serde(default = "default_per_hour")]
    pub requests_per_hour: u32,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_open_secs")]
    pub open_secs: u64,
}

fn default_true() -> bool {
    true
}
fn default_request_timeout() -> u64 {
    30
}
fn default_max_concurrent_sources() -> usize {
    5
}
fn default_publish_queue_depth() -> usize {
    64
}
fn default_source_timeout() -> u64 {
    300
}
fn default_cycle_idle() -> u64 {
    5
}
fn default_delay_schedule() -> Vec<u64> {
    vec![60, 300, 900, 3600]
}
fn default_queue_path() -> PathBuf {
    PathBuf::from("data/retry_queue.jsonl")
}
fn default_bind_addr() -> String {
    "127.0.0.1:8900".to_string()
}
fn default_per_minute() -> u32 {
    30
}
fn default_per_hour() -> u32 {
    500
}
fn default_failure_threshold() -> u32 {
    5
}
fn default_open_secs() -> u64 {
    300
}

impl Config {
    /// Load from an explicit TOML path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| BotError::config(format!("reading {}: {e}", path.display())))?;
        let mut cfg: Config = toml::from_str(&content)
            .map_err(|e| BotError::config(format!("parsing {}: {e}", path.display())))?;
        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load using $WRESTLEBOT_CONFIG_PATH, falling back to
    /// `config/wrestlebot.toml`.
    pub fn load_default() -> Result<Self> {
        let path = std::env::var(ENV_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::load_from(&path)
    }

    fn apply_env(&mut self) {
        if self.api.token.is_none() {
            if let Ok(tok) = std::env::var(ENV_API_TOKEN) {
                if !tok.trim().is_empty() {
                    self.api.token = Some(tok);
                }
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.api.base_url.trim().is_empty() {
            return Err(BotError::config("api.base_url must not be empty"));
        }
        if self.workers.max_concurrent_sources == 0 {
            return Err(BotError::config("workers.max_concurrent_sources must be >= 1"));
        }
        if self.retry.delay_schedule_secs.is_empty() {
            return Err(BotError::config("retry.delay_schedule_secs must not be empty"));
        }
        let mut seen = std::collections::HashSet::new();
        for s in &self.sources {
            if !seen.insert(s.name.as_str()) {
                return Err(BotError::config(format!("duplicate source name '{}'", s.name)));
            }
            if s.requests_per_minute == 0 || s.requests_per_hour == 0 {
                return Err(BotError::config(format!(
                    "source '{}': rate caps must be >= 1",
                    s.name
                )));
            }
        }
        Ok(())
    }

    /// Sources that take part in a cycle.
    pub fn enabled_sources(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.enabled)
    }

    pub fn api_token(&self) -> &str {
        self.api.token.as_deref().unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[api]
base_url = "http://localhost:8000/api/wrestlebot"
token = "secret-token"

[workers]
max_concurrent_sources = 3
cycle_idle_secs = 0

[retry]
delay_schedule_secs = [60, 300, 900, 3600]
queue_path = "data/retry_queue.jsonl"

[[sources]]
name = "wikipedia"
kind = "wikipedia"
categories = ["American_professional_wrestlers"]
requests_per_minute = 30
requests_per_hour = 500

[[sources]]
name = "news-feed"
kind = "rss"
endpoint = "https://example.com/wrestling.rss"
requests_per_minute = 10000
requests_per_hour = 100000

[[sources]]
name = "cagematch"
kind = "match_db"
enabled = false
endpoint = "https://www.cagematch.net"
requests_per_minute = 20
"#;

    #[test]
    fn parses_sample_and_applies_defaults() {
        let cfg: Config = toml::from_str(SAMPLE).unwrap();
        assert_eq!(cfg.sources.len(), 3);
        assert_eq!(cfg.workers.max_concurrent_sources, 3);
        assert_eq!(cfg.workers.source_timeout_secs, 300); // default
        assert_eq!(cfg.retry.delay_schedule_secs, vec![60, 300, 900, 3600]);

        let wiki = &cfg.sources[0];
        assert_eq!(wiki.kind, SourceKind::Wikipedia);
        assert!(wiki.enabled);
        assert_eq!(wiki.failure_threshold, 5); // default
        assert_eq!(wiki.open_secs, 300); // default

        let matchdb = &cfg.sources[2];
        assert_eq!(matchdb.kind, SourceKind::MatchDb);
        assert!(!matchdb.enabled);
        assert_eq!(cfg.enabled_sources().count(), 2);
    }

    #[test]
    fn rejects_duplicate_source_names() {
        let mut cfg: Config = toml::from_str(SAMPLE).unwrap();
        cfg.sources[1].name = "wikipedia".into();
        assert!(matches!(cfg.validate(), Err(BotError::Config(_))));
    }

    #[serial_test::serial]
    #[test]
    fn token_falls_back_to_env() {
        let toml_src = r#"
[api]
base_url = "http://localhost:8000/api/wrestlebot"
"#;
        let mut cfg: Config = toml::from_str(toml_src).unwrap();
        std::env::set_var(ENV_API_TOKEN, "env-token");
        cfg.apply_env();
        std::env::remove_var(ENV_API_TOKEN);
        assert_eq!(cfg.api_token(), "env-token");
    }
}
