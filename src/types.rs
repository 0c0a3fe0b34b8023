// src/types.rs

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// The entity kinds the collaborator API accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Wrestler,
    Promotion,
    Event,
    Article,
}

impl EntityKind {
    /// Path segment for `POST /entities/{kind}`.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Wrestler => "wrestler",
            EntityKind::Promotion => "promotion",
            EntityKind::Event => "event",
            EntityKind::Article => "article",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unprocessed fetch result. Lives only inside the pipeline: produced by
/// an adapter, consumed by the processor, never persisted.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RawRecord {
    pub source: String,
    pub fetched_at: DateTime<Utc>,
    /// What the adapter believes this record is; the processor re-validates.
    pub kind: EntityKind,
    pub payload: Value,
}

/// Where a draft came from, kept for audit logging.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Provenance {
    pub source: String,
    pub url: Option<String>,
}

/// A normalized candidate record, ready for the collaborator API.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EntityDraft {
    pub kind: EntityKind,
    pub fields: Map<String, Value>,
    pub provenance: Provenance,
}

impl EntityDraft {
    /// The natural key the collaborator upserts on.
    pub fn slug(&self) -> &str {
        self.fields
            .get("slug")
            .and_then(Value::as_str)
            .unwrap_or("")
    }
}

/// Lowercased, hyphenated natural key derived from an entity name.
pub fn slugify(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_dash = true; // suppress leading dashes
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_collapses_punctuation() {
        assert_eq!(slugify("Stone Cold Steve Austin"), "stone-cold-steve-austin");
        assert_eq!(slugify("  \"Macho Man\" Randy Savage! "), "macho-man-randy-savage");
        assert_eq!(slugify("André the Giant"), "andr-the-giant");
    }

    #[test]
    fn draft_slug_reads_fields() {
        let mut fields = Map::new();
        fields.insert("slug".into(), Value::String("hulk-hogan".into()));
        let draft = EntityDraft {
            kind: EntityKind::Wrestler,
            fields,
            provenance: Provenance {
                source: "wikipedia".into(),
                url: None,
            },
        };
        assert_eq!(draft.slug(), "hulk-hogan");
    }
}
