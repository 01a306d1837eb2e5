use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::models::record::{Record, embedding_text};
use crate::normalize::{normalize_title, resolve_normalized_title};

const DEFAULT_KIND: &str = "unknown";

/// A record under evaluation that has not been accepted yet.
///
/// `similarity_score` and `match_index` are scratch fields written by the
/// decision engine; they are never serialized or persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub normalized_title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_topic: Option<String>,
    pub added_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,

    #[serde(skip)]
    pub similarity_score: Option<f64>,
    #[serde(skip)]
    pub match_index: Option<usize>,
}

impl Candidate {
    pub fn new(title: impl Into<String>, added_by: impl Into<String>) -> Self {
        let title = title.into();
        Self {
            kind: DEFAULT_KIND.to_string(),
            normalized_title: normalize_title(&title),
            title,
            authors: Vec::new(),
            year: None,
            source: None,
            unique_id: None,
            search_topic: None,
            added_by: added_by.into(),
            embedding: None,
            similarity_score: None,
            match_index: None,
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn with_authors<I, S>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authors = authors.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_unique_id(mut self, unique_id: impl Into<String>) -> Self {
        self.unique_id = Some(unique_id.into());
        self.ensure_title();
        self
    }

    pub fn with_search_topic(mut self, topic: impl Into<String>) -> Self {
        self.search_topic = Some(topic.into());
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Build a candidate from one loosely-structured submission entry.
    ///
    /// Returns `None` for entries that are not objects or carry neither a
    /// title nor a unique identifier.
    pub fn from_entry(entry: &Value, added_by: &str) -> Option<Self> {
        let obj = entry.as_object()?;

        let unique_id = ["unique_id", "arxiv_id", "isbn"]
            .iter()
            .find_map(|key| string_field(obj.get(*key)));
        let title = string_field(obj.get("title")).unwrap_or_default();
        if title.is_empty() && unique_id.is_none() {
            return None;
        }

        let kind = string_field(obj.get("resource_type"))
            .or_else(|| string_field(obj.get("type")))
            .unwrap_or_else(|| DEFAULT_KIND.to_string());

        let mut candidate = Self {
            kind,
            normalized_title: String::new(),
            title,
            authors: authors_field(obj.get("authors")),
            year: year_field(obj.get("year")),
            source: string_field(obj.get("source")),
            unique_id,
            search_topic: string_field(obj.get("search_topic")),
            added_by: added_by.to_string(),
            embedding: embedding_field(obj.get("embedding")),
            similarity_score: None,
            match_index: None,
        };
        candidate.ensure_title();
        candidate.normalized_title = resolve_normalized_title(
            &candidate.title,
            obj.get("normalized_title").and_then(Value::as_str),
        );
        Some(candidate)
    }

    /// A candidate needs a title or a unique id to be evaluated at all.
    pub fn is_valid(&self) -> bool {
        !self.title.trim().is_empty() || self.unique_id.is_some()
    }

    /// Derive a title from the unique id when none was given.
    pub fn ensure_title(&mut self) {
        if !self.title.trim().is_empty() {
            return;
        }
        let Some(unique_id) = self.unique_id.as_deref() else {
            return;
        };
        self.title = if self.source.as_deref() == Some("arXiv") {
            format!("arXiv:{unique_id}")
        } else {
            unique_id.to_string()
        };
        self.normalized_title = normalize_title(&self.title);
    }

    pub fn embedding_text(&self) -> String {
        embedding_text(&self.title, &self.authors)
    }

    pub fn has_embedding(&self) -> bool {
        self.embedding.as_deref().is_some_and(usable_embedding)
    }

    /// Turn the candidate into a canonical record accepted at `added_at`.
    pub fn into_record(self, added_at: DateTime<Utc>) -> Record {
        Record {
            id: Uuid::now_v7(),
            kind: self.kind,
            title: self.title,
            normalized_title: self.normalized_title,
            authors: self.authors,
            year: self.year,
            source: self.source,
            unique_id: self.unique_id,
            search_topic: self.search_topic,
            added_by: self.added_by,
            added_at,
            embedding: self.embedding.filter(|v| usable_embedding(v)),
        }
    }
}

// ─── Field helpers ──────────────────────────────────────────

fn string_field(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn authors_field(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items.iter().filter_map(|v| string_field(Some(v))).collect(),
        Some(other) => string_field(Some(other)).into_iter().collect(),
        None => Vec::new(),
    }
}

fn year_field(value: Option<&Value>) -> Option<i32> {
    match value? {
        Value::Number(n) => n.as_i64().and_then(|y| i32::try_from(y).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Non-empty and free of NaN or infinite components.
fn usable_embedding(vector: &[f32]) -> bool {
    !vector.is_empty() && vector.iter().all(|v| v.is_finite())
}

/// Values beyond the `f32` range overflow to infinity and void the vector.
fn embedding_field(value: Option<&Value>) -> Option<Vec<f32>> {
    let items = value?.as_array()?;
    let vector: Option<Vec<f32>> = items.iter().map(|v| v.as_f64().map(|f| f as f32)).collect();
    vector.filter(|v| usable_embedding(v))
}
