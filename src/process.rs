// src/process.rs
//
// Pure transformation: RawRecord -> zero-or-one EntityDraft. Filters out
// records that are not wrestling content, normalizes text, and runs the
// optional external verifier. Never touches the publish target.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Datelike;
use serde_json::{Map, Value};

use crate::error::{BotError, Result};
use crate::types::{slugify, EntityDraft, EntityKind, Provenance, RawRecord};

/// Outcome of an external verification call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    Rejected,
    Unavailable,
}

/// Optional external verifier capability (e.g. an AI relevance checker).
/// `Unavailable` must never block the pipeline; the processor falls back
/// to structural validation.
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(&self, draft: &EntityDraft) -> Verdict;
}

/// Keywords that mark an article as wrestling-related.
const WRESTLING_KEYWORDS: &[&str] = &[
    "wrestl", "wwe", "aew", "njpw", "impact", "ring of honor", "champion",
    "title match", "heel", "babyface", "pay-per-view", "ppv", "smackdown",
    "raw", "dynamite", "cagematch", "promotion",
];

pub struct Processor {
    verifier: Option<Arc<dyn Verifier>>,
}

impl Processor {
    pub fn new() -> Self {
        Self { verifier: None }
    }

    pub fn with_verifier(verifier: Arc<dyn Verifier>) -> Self {
        Self {
            verifier: Some(verifier),
        }
    }

    /// Map, filter, validate. `Ok(None)` means filtered out (not an error);
    /// `Err(ValidationRejected)` means the draft existed but was refused.
    pub async fn process(&self, record: &RawRecord) -> Result<Option<EntityDraft>> {
        metrics::counter!("records_processed_total").increment(1);

        let Some(draft) = map_record(record) else {
            metrics::counter!("drafts_filtered_total").increment(1);
            return Ok(None);
        };

        if let Some(verifier) = &self.verifier {
            match verifier.verify(&draft).await {
                Verdict::Accepted => return Ok(Some(draft)),
                Verdict::Rejected => {
                    metrics::counter!("drafts_rejected_total").increment(1);
                    return Err(BotError::validation_rejected(
                        draft.slug(),
                        "rejected by verifier",
                    ));
                }
                Verdict::Unavailable => {
                    tracing::debug!(slug = draft.slug(), "verifier unavailable, local validation");
                }
            }
        }

        match validate_structure(&draft, record) {
            Ok(()) => Ok(Some(draft)),
            Err(reason) => {
                metrics::counter!("drafts_rejected_total").increment(1);
                Err(BotError::validation_rejected(draft.slug(), reason))
            }
        }
    }
}

impl Default for Processor {
    fn default() -> Self {
        Self::new()
    }
}

fn map_record(record: &RawRecord) -> Option<EntityDraft> {
    let p = &record.payload;
    let mut fields = Map::new();
    let mut url = None;

    match record.kind {
        EntityKind::Wrestler => {
            let title = normalize_text(p.get("title")?.as_str()?);
            // Category listings mix in meta pages that are not people.
            if title.is_empty() || title.starts_with("List of") {
                return None;
            }
            fields.insert("name".into(), Value::String(title.clone()));
            fields.insert("slug".into(), Value::String(slugify(&title)));
            url = p.get("url").and_then(Value::as_str).map(str::to_string);
        }
        EntityKind::Article => {
            let title = normalize_text(p.get("title")?.as_str()?);
            let content = normalize_text(p.get("description").and_then(Value::as_str).unwrap_or(""));
            if title.is_empty() {
                return None;
            }
            let haystack = format!("{title} {content}").to_lowercase();
            if !WRESTLING_KEYWORDS.iter().any(|k| haystack.contains(k)) {
                return None;
            }
            fields.insert("title".into(), Value::String(title.clone()));
            fields.insert("slug".into(), Value::String(slugify(&title)));
            fields.insert("content".into(), Value::String(content));
            fields.insert("category".into(), Value::String("news".into()));
            fields.insert("author".into(), Value::String("WrestleBot".into()));
            url = p.get("link").and_then(Value::as_str).map(str::to_string);
        }
        EntityKind::Event => {
            let name = normalize_text(p.get("name")?.as_str()?);
            if name.is_empty() {
                return None;
            }
            fields.insert("name".into(), Value::String(name.clone()));
            fields.insert("slug".into(), Value::String(slugify(&name)));
            if let Some(date) = p.get("date").and_then(Value::as_str) {
                fields.insert("date".into(), Value::String(date.to_string()));
            }
            if let Some(promotion) = p.get("promotion").and_then(Value::as_str) {
                fields.insert("promotion".into(), Value::String(promotion.to_string()));
            }
            if let Some(location) = p.get("location").and_then(Value::as_str) {
                fields.insert("location".into(), Value::String(location.to_string()));
            }
        }
        EntityKind::Promotion => {
            let name = normalize_text(p.get("name")?.as_str()?);
            if name.is_empty() {
                return None;
            }
            fields.insert("name".into(), Value::String(name.clone()));
            fields.insert("slug".into(), Value::String(slugify(&name)));
        }
    }

    Some(EntityDraft {
        kind: record.kind,
        fields,
        provenance: Provenance {
            source: record.source.clone(),
            url,
        },
    })
}

/// Local fallback: required fields present, plausible value ranges.
fn validate_structure(draft: &EntityDraft, record: &RawRecord) -> std::result::Result<(), String> {
    if draft.slug().is_empty() {
        return Err("missing slug".into());
    }
    let name_field = match draft.kind {
        EntityKind::Article => "title",
        _ => "name",
    };
    let name_ok = draft
        .fields
        .get(name_field)
        .and_then(Value::as_str)
        .map(|s| !s.trim().is_empty())
        .unwrap_or(false);
    if !name_ok {
        return Err(format!("missing {name_field}"));
    }

    if let Some(year) = draft.fields.get("debut_year").and_then(Value::as_i64) {
        let max = record.fetched_at.year() as i64 + 1;
        if !(1900..=max).contains(&year) {
            return Err(format!("implausible debut_year {year}"));
        }
    }

    if draft.kind == EntityKind::Article {
        let has_content = draft
            .fields
            .get("content")
            .and_then(Value::as_str)
            .map(|s| !s.is_empty())
            .unwrap_or(false);
        if !has_content {
            return Err("article without content".into());
        }
    }

    Ok(())
}

/// Normalize text: decode entities, strip tags, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, "").to_string();

    // 3) Normalize curly quotes to ASCII
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").to_string();
    out = out.trim().to_string();

    // 5) Length cap: 2000 chars
    if out.chars().count() > 2000 {
        out = out.chars().take(2000).collect();
    }

    out
}
