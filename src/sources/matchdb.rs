// src/sources/matchdb.rs
//
// Match-database adapter (cagematch-style event listings). The listing is
// server-rendered HTML; rows are lifted out with regexes rather than a full
// DOM parse. Cursor is the page offset, so a repeated fetch re-reads the
// same page.

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use regex::Regex;
use serde_json::json;

use crate::error::Result;
use crate::types::{EntityKind, RawRecord};

use super::{status_error, transport_error, FetchMode, FetchOutcome, SourceAdapter, SourceGate};

const PAGE_SIZE: usize = 100;

pub struct MatchDbAdapter {
    gate: SourceGate,
    mode: FetchMode,
}

impl MatchDbAdapter {
    pub fn new(gate: SourceGate, mode: FetchMode) -> Self {
        Self { gate, mode }
    }

    fn parse_rows(&self, body: &str) -> Vec<RawRecord> {
        static RE_ROW: OnceCell<Regex> = OnceCell::new();
        static RE_CELL: OnceCell<Regex> = OnceCell::new();
        let re_row = RE_ROW.get_or_init(|| Regex::new(r"(?is)<tr[^>]*>(.*?)</tr>").unwrap());
        let re_cell = RE_CELL.get_or_init(|| Regex::new(r"(?is)<td[^>]*>(.*?)</td>").unwrap());

        let now = self.gate.now();
        let mut records = Vec::new();
        for row in re_row.captures_iter(body) {
            let cells: Vec<String> = re_cell
                .captures_iter(&row[1])
                .map(|c| strip_tags(&c[1]))
                .collect();
            // Listing layout: date | event | promotion | location. Header
            // rows carry no digits in the date column; malformed rows have
            // fewer cells.
            if cells.len() < 4 || cells[1].is_empty() {
                continue;
            }
            if !cells[0].chars().any(|c| c.is_ascii_digit()) {
                continue;
            }
            records.push(RawRecord {
                source: self.gate.name().to_string(),
                fetched_at: now,
                kind: EntityKind::Event,
                payload: json!({
                    "date": cells[0],
                    "name": cells[1],
                    "promotion": cells[2],
                    "location": cells[3],
                }),
            });
        }

        metrics::counter!("fetch_records_total", "source" => self.gate.name().to_string())
            .increment(records.len() as u64);
        records
    }
}

#[async_trait]
impl SourceAdapter for MatchDbAdapter {
    fn name(&self) -> &str {
        self.gate.name()
    }

    async fn fetch(&self, cursor: Option<&str>) -> Result<FetchOutcome> {
        let offset: usize = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);

        if let Err(reason) = self.gate.check() {
            tracing::debug!(source = %self.gate.name(), reason = reason.as_str(), "fetch skipped");
            return Ok(FetchOutcome::Skipped { reason });
        }

        let body = match &self.mode {
            FetchMode::Fixture(s) => s.clone(),
            FetchMode::Http { endpoint, client } => {
                let url = format!("{endpoint}?view=events&s={offset}");
                let resp = client
                    .get(&url)
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

        let records = self.parse_rows(&body);
        self.gate.report_success();

        // An empty page means the listing is exhausted; start over next time.
        let next_cursor = if records.is_empty() {
            None
        } else {
            Some((offset + PAGE_SIZE).to_string())
        };
        Ok(FetchOutcome::Fetched {
            records,
            next_cursor,
        })
    }
}

fn strip_tags(s: &str) -> String {
    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    let re = RE_TAGS.get_or_init(|| Regex::new(r"(?is)</?[^>]+>").unwrap());
    let out = re.replace_all(s, "");
    html_escape::decode_html_entities(out.trim()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::{BreakerPolicy, CircuitBreaker};
    use crate::clock::SystemClock;
    use crate::ratelimit::{RateLimiter, RatePolicy};
    use std::sync::Arc;

    const FIXTURE: &str = r#"
<table class="TBase">
  <tr class="THeaderRow"><td>Date</td><td>Event</td><td>Promotion</td><td>Location</td></tr>
  <tr class="TRow1">
    <td>05.01.2025</td>
    <td><a href="?id=1&amp;nr=40512">Wrestle Kingdom 19</a></td>
    <td>NJPW</td>
    <td>Tokyo Dome, Tokyo</td>
  </tr>
  <tr class="TRow2">
    <td>04.01.2025</td>
    <td><a href="?id=1&amp;nr=40511">New Year Dash</a></td>
    <td>NJPW</td>
    <td>Ota City Gymnasium, Tokyo</td>
  </tr>
</table>"#;

    fn adapter(fixture: &str) -> MatchDbAdapter {
        let clock = Arc::new(SystemClock);
        let gate = SourceGate::new(
            "cagematch",
            Arc::new(CircuitBreaker::new("cagematch", BreakerPolicy::default())),
            Arc::new(RateLimiter::new(RatePolicy::default(), chrono::Utc::now())),
            clock,
        );
        MatchDbAdapter::new(gate, FetchMode::Fixture(fixture.to_string()))
    }

    #[tokio::test]
    async fn extracts_event_rows_skipping_header() {
        let a = adapter(FIXTURE);
        let FetchOutcome::Fetched {
            records,
            next_cursor,
        } = a.fetch(None).await.unwrap()
        else {
            panic!("expected Fetched");
        };
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].kind, EntityKind::Event);
        assert_eq!(records[0].payload["name"], "Wrestle Kingdom 19");
        assert_eq!(records[0].payload["promotion"], "NJPW");
        assert_eq!(next_cursor.as_deref(), Some("100"));
    }

    #[tokio::test]
    async fn empty_listing_resets_cursor() {
        let a = adapter("<table></table>");
        let FetchOutcome::Fetched {
            records,
            next_cursor,
        } = a.fetch(Some("300")).await.unwrap()
        else {
            panic!("expected Fetched");
        };
        assert!(records.is_empty());
        assert!(next_cursor.is_none());
    }
}
