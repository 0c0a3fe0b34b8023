// src/sources/news_rss.rs
//
// Wrestling-news RSS adapter. The cursor is the newest pubDate seen (unix
// seconds), so re-fetching with the same cursor returns everything newer:
// consistent or superset, never less.

use async_trait::async_trait;
use quick_xml::de::from_str;
use serde::Deserialize;
use serde_json::json;
use time::{format_description::well_known::Rfc2822, OffsetDateTime, UtcOffset};

use crate::error::{BotError, Result};
use crate::types::{EntityKind, RawRecord};

use super::{status_error, transport_error, FetchMode, FetchOutcome, SourceAdapter, SourceGate};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
}

fn parse_rfc2822_to_unix(ts: &str) -> u64 {
    OffsetDateTime::parse(ts, &Rfc2822)
        .ok()
        .map(|dt| dt.to_offset(UtcOffset::UTC).unix_timestamp())
        .and_then(|x| u64::try_from(x).ok())
        .unwrap_or(0)
}

pub struct NewsRssAdapter {
    gate: SourceGate,
    mode: FetchMode,
}

impl NewsRssAdapter {
    pub fn new(gate: SourceGate, mode: FetchMode) -> Self {
        Self { gate, mode }
    }

    fn parse_items(&self, body: &str, since: u64) -> Result<(Vec<RawRecord>, u64)> {
        let xml_clean = scrub_html_entities_for_xml(body);
        let rss: Rss = from_str(&xml_clean).map_err(|e| {
            self.gate.report_failure();
            BotError::source_unavailable(self.gate.name(), format!("bad feed xml: {e}"))
        })?;

        let now = self.gate.now();
        let mut newest = since;
        let mut records = Vec::with_capacity(rss.channel.item.len());
        for it in rss.channel.item {
            let published = it
                .pub_date
                .as_deref()
                .map(parse_rfc2822_to_unix)
                .unwrap_or(0);
            if published <= since && since > 0 {
                continue; // already seen in an earlier cycle
            }
            newest = newest.max(published);

            records.push(RawRecord {
                source: self.gate.name().to_string(),
                fetched_at: now,
                kind: EntityKind::Article,
                payload: json!({
                    "title": it.title.unwrap_or_default(),
                    "link": it.link,
                    "published_at": published,
                    "description": it.description.unwrap_or_default(),
                }),
            });
        }

        metrics::counter!("fetch_records_total", "source" => self.gate.name().to_string())
            .increment(records.len() as u64);
        Ok((records, newest))
    }
}

#[async_trait]
impl SourceAdapter for NewsRssAdapter {
    fn name(&self) -> &str {
        self.gate.name()
    }

    async fn fetch(&self, cursor: Option<&str>) -> Result<FetchOutcome> {
        let since: u64 = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);

        if let Err(reason) = self.gate.check() {
            tracing::debug!(source = %self.gate.name(), reason = reason.as_str(), "fetch skipped");
            return Ok(FetchOutcome::Skipped { reason });
        }

        let body = match &self.mode {
            FetchMode::Fixture(s) => s.clone(),
            FetchMode::Http { endpoint, client } => {
                let resp = client
                    .get(endpoint)
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

        let (records, newest) = self.parse_items(&body, since)?;
        self.gate.report_success();

        let next_cursor = if newest > 0 {
            Some(newest.to_string())
        } else {
            cursor.map(str::to_string)
        };
        Ok(FetchOutcome::Fetched {
            records,
            next_cursor,
        })
    }
}

fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::{BreakerPolicy, CircuitBreaker};
    use crate::clock::SystemClock;
    use crate::ratelimit::{RateLimiter, RatePolicy};
    use std::sync::Arc;

    const FIXTURE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"><channel>
  <title>Wrestling News</title>
  <item>
    <title>Title change at Wrestle Kingdom</title>
    <link>https://example.com/news/wk-title-change</link>
    <pubDate>Mon, 06 Jan 2025 12:00:00 GMT</pubDate>
    <description>The IWGP World Heavyweight Championship changed hands&nbsp;last night.</description>
  </item>
  <item>
    <title>Veteran announces retirement tour</title>
    <link>https://example.com/news/retirement-tour</link>
    <pubDate>Sun, 05 Jan 2025 09:30:00 GMT</pubDate>
    <description>A 30-year career winds down.</description>
  </item>
</channel></rss>"#;

    fn adapter(fixture: &str) -> NewsRssAdapter {
        let clock = Arc::new(SystemClock);
        let gate = SourceGate::new(
            "news-feed",
            Arc::new(CircuitBreaker::new("news-feed", BreakerPolicy::default())),
            Arc::new(RateLimiter::new(RatePolicy::default(), chrono::Utc::now())),
            clock,
        );
        NewsRssAdapter::new(gate, FetchMode::Fixture(fixture.to_string()))
    }

    #[tokio::test]
    async fn parses_items_and_advances_cursor() {
        let a = adapter(FIXTURE);
        let outcome = a.fetch(None).await.expect("fetch fixture");
        let FetchOutcome::Fetched {
            records,
            next_cursor,
        } = outcome
        else {
            panic!("expected Fetched");
        };
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].kind, EntityKind::Article);
        let newest: u64 = next_cursor.expect("cursor").parse().unwrap();
        assert_eq!(newest, parse_rfc2822_to_unix("Mon, 06 Jan 2025 12:00:00 GMT"));
    }

    #[tokio::test]
    async fn cursor_filters_already_seen_items() {
        let a = adapter(FIXTURE);
        let older = parse_rfc2822_to_unix("Sun, 05 Jan 2025 09:30:00 GMT");
        let outcome = a.fetch(Some(&older.to_string())).await.unwrap();
        let FetchOutcome::Fetched { records, .. } = outcome else {
            panic!("expected Fetched");
        };
        assert_eq!(records.len(), 1, "only the newer item comes back");
        assert_eq!(
            records[0].payload["title"],
            "Title change at Wrestle Kingdom"
        );
    }

    #[tokio::test]
    async fn malformed_feed_is_source_unavailable() {
        let a = adapter("<rss><channel><item>truncated");
        let err = a.fetch(None).await.expect_err("must fail");
        assert!(matches!(err, BotError::SourceUnavailable { .. }));
    }
}
