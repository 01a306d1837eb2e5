use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Record ─────────────────────────────────────────────────

/// A canonical, accepted document (book, paper, article).
///
/// Records are only created by the ingestion path after the duplicate
/// check has passed; `added_at` is the acceptance timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: Uuid,

    /// Free-form category tag, e.g. `ResearchPaper` or `Book`.
    #[serde(rename = "type")]
    pub kind: String,

    pub title: String,
    pub normalized_title: String,

    #[serde(default)]
    pub authors: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,

    /// Provenance system, e.g. `arXiv` or `Z-Library`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// arXiv id, ISBN or any other globally unique key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,

    /// Topic the document was collected for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_topic: Option<String>,

    pub added_by: String,
    pub added_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Record {
    /// Text fed to the embedding provider for this record.
    pub fn embedding_text(&self) -> String {
        embedding_text(&self.title, &self.authors)
    }

    pub fn has_embedding(&self) -> bool {
        self.embedding.as_ref().is_some_and(|v| !v.is_empty())
    }

    /// Short human-readable label, used in logs and CLI output.
    pub fn label(&self) -> String {
        if self.authors.is_empty() {
            self.title.clone()
        } else {
            format!("{} ({})", self.title, self.authors.join(", "))
        }
    }
}

/// `"<title> by <authors>"`, or just the title when there are no authors.
pub fn embedding_text(title: &str, authors: &[String]) -> String {
    let authors: Vec<&str> = authors
        .iter()
        .map(|a| a.trim())
        .filter(|a| !a.is_empty())
        .collect();
    if authors.is_empty() {
        title.trim().to_string()
    } else {
        format!("{} by {}", title.trim(), authors.join(", "))
    }
}

// ─── Store outcomes ─────────────────────────────────────────

/// Result of a store insert. A uniqueness violation is an outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Conflict,
}

/// Selection used by bulk deletes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordFilter {
    All,
    AddedBy(String),
}

// ─── Stats ──────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordStats {
    pub total: usize,
    pub with_embedding: usize,
    pub by_contributor: Vec<(String, usize)>,
    pub by_type: Vec<(String, usize)>,
    pub top_topics: Vec<(String, usize)>,
}
