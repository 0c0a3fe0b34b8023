// src/sources/wikipedia.rs
//
// MediaWiki category-members adapter. Walks the configured wrestler
// categories one API page at a time; the cursor is "{category index}:{
// cmcontinue token}", so a repeated fetch with the same cursor asks the API
// the same question and gets a consistent (or superset) answer.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::error::{BotError, Result};
use crate::types::{EntityKind, RawRecord};

use super::{status_error, transport_error, FetchMode, FetchOutcome, SourceAdapter, SourceGate};

pub const DEFAULT_API_ENDPOINT: &str = "https://en.wikipedia.org/w/api.php";
const PAGE_LIMIT: u32 = 50;

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    query: Option<QueryBlock>,
    #[serde(rename = "continue", default)]
    cont: Option<ContinueBlock>,
}

#[derive(Debug, Deserialize)]
struct QueryBlock {
    #[serde(default)]
    categorymembers: Vec<Member>,
}

#[derive(Debug, Deserialize)]
struct Member {
    pageid: u64,
    title: String,
}

#[derive(Debug, Deserialize)]
struct ContinueBlock {
    #[serde(default)]
    cmcontinue: Option<String>,
}

pub struct WikipediaAdapter {
    gate: SourceGate,
    mode: FetchMode,
    categories: Vec<String>,
}

impl WikipediaAdapter {
    pub fn new(gate: SourceGate, mode: FetchMode, categories: Vec<String>) -> Self {
        Self {
            gate,
            mode,
            categories,
        }
    }

    fn parse_body(&self, body: &str, category: &str) -> Result<(Vec<RawRecord>, Option<String>)> {
        let resp: ApiResponse = serde_json::from_str(body).map_err(|e| {
            self.gate.report_failure();
            BotError::source_unavailable(self.gate.name(), format!("bad API response: {e}"))
        })?;

        let now = self.gate.now();
        let members = resp.query.map(|q| q.categorymembers).unwrap_or_default();
        let records = members
            .into_iter()
            .filter(|m| !m.title.starts_with("Category:"))
            .map(|m| RawRecord {
                source: self.gate.name().to_string(),
                fetched_at: now,
                kind: EntityKind::Wrestler,
                payload: json!({
                    "title": m.title,
                    "pageid": m.pageid,
                    "category": category,
                    "url": page_url(&m.title),
                }),
            })
            .collect::<Vec<_>>();

        metrics::counter!("fetch_records_total", "source" => self.gate.name().to_string())
            .increment(records.len() as u64);
        Ok((records, resp.cont.and_then(|c| c.cmcontinue)))
    }
}

#[async_trait]
impl SourceAdapter for WikipediaAdapter {
    fn name(&self) -> &str {
        self.gate.name()
    }

    async fn fetch(&self, cursor: Option<&str>) -> Result<FetchOutcome> {
        if self.categories.is_empty() {
            return Ok(FetchOutcome::Fetched {
                records: Vec::new(),
                next_cursor: None,
            });
        }

        let (cat_idx, cm_token) = parse_cursor(cursor, self.categories.len());
        let category = &self.categories[cat_idx];

        if let Err(reason) = self.gate.check() {
            tracing::debug!(source = %self.gate.name(), reason = reason.as_str(), "fetch skipped");
            return Ok(FetchOutcome::Skipped { reason });
        }

        let body = match &self.mode {
            FetchMode::Fixture(s) => s.clone(),
            FetchMode::Http { endpoint, client } => {
                let mut params: Vec<(&str, String)> = vec![
                    ("action", "query".into()),
                    ("format", "json".into()),
                    ("list", "categorymembers".into()),
                    ("cmtitle", format!("Category:{category}")),
                    ("cmlimit", PAGE_LIMIT.to_string()),
                    ("cmtype", "page".into()),
                ];
                if let Some(token) = &cm_token {
                    params.push(("cmcontinue", token.clone()));
                }
                let resp = client
                    .get(endpoint)
                    .query(&params)
                    .send()
                    .await
                    .map_err(|e| transport_error(&self.gate, e))?;
                if !resp.status().is_success() {
                    return Err(status_error(&self.gate, resp.status()));
                }
                resp.text()
                    .await
                    .map_err(|e| transport_error(&self.gate, e))?
            }
        };

        let (records, cm_next) = self.parse_body(&body, category)?;
        self.gate.report_success();

        // Exhausted category -> move on; exhausted list -> start over.
        let next_cursor = match cm_next {
            Some(token) => Some(format!("{cat_idx}:{token}")),
            None if cat_idx + 1 < self.categories.len() => Some(format!("{}:", cat_idx + 1)),
            None => None,
        };

        Ok(FetchOutcome::Fetched {
            records,
            next_cursor,
        })
    }
}

fn parse_cursor(cursor: Option<&str>, categories: usize) -> (usize, Option<String>) {
    let Some(cursor) = cursor else {
        return (0, None);
    };
    let (idx, token) = cursor.split_once(':').unwrap_or((cursor, ""));
    let idx = idx.parse::<usize>().unwrap_or(0).min(categories - 1);
    let token = if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    };
    (idx, token)
}

fn page_url(title: &str) -> String {
    format!("https://en.wikipedia.org/wiki/{}", title.replace(' ', "_"))
}
