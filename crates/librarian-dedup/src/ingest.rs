use librarian_core::{Candidate, InsertOutcome, Record};
use serde::Serialize;
use serde_json::Value;

use crate::decision::Decision;
use crate::engine::DuplicateEngine;
use crate::error::{DedupError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestOptions {
    /// Skip the semantic and lexical layers. Unique id and title checks still apply.
    pub force: bool,
}

/// Per-batch counters.
///
/// `invalid` counts entries with neither title nor unique id; `failed`
/// counts candidates whose evaluation or insert hit a store error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestCounts {
    pub saved: usize,
    pub skipped: usize,
    pub invalid: usize,
    pub failed: usize,
}

/// The batch stopped at an ambiguous candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConflictReport {
    pub explanation: String,
    pub existing: Record,
    pub similarity: f64,
    pub candidate_title: String,
    /// Records saved before the halt.
    pub processed_count: usize,
    /// Position of the offending entry in the submitted sequence.
    pub problem_index: usize,
    #[serde(flatten)]
    pub counts: IngestCounts,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestReport {
    Ok(IngestCounts),
    Conflict(ConflictReport),
}

impl IngestReport {
    pub fn counts(&self) -> IngestCounts {
        match self {
            Self::Ok(counts) => *counts,
            Self::Conflict(conflict) => conflict.counts,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    pub fn message(&self) -> String {
        match self {
            Self::Ok(c) => format!(
                "Batch processed. Saved: {}, skipped (already existed): {}, invalid: {}, failed: {}",
                c.saved, c.skipped, c.invalid, c.failed
            ),
            Self::Conflict(c) => format!(
                "Potential duplicate at entry {}: \"{}\" vs existing \"{}\" ({}). Saved {} before stopping.",
                c.problem_index, c.candidate_title, c.existing.title, c.explanation, c.processed_count
            ),
        }
    }
}

/// Flatten a submission into its ordered entries.
///
/// Accepts `{"resources": [...]}` or any object whose only field is an
/// array, a bare array, or a single entry object.
pub fn submission_entries(value: Value) -> Result<Vec<Value>> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(mut obj) => {
            if let Some(Value::Array(_)) = obj.get("resources") {
                if let Some(Value::Array(items)) = obj.remove("resources") {
                    return Ok(items);
                }
            }
            if obj.len() == 1 {
                if let Some(Value::Array(items)) = obj.values().next() {
                    return Ok(items.clone());
                }
            }
            Ok(vec![Value::Object(obj)])
        }
        other => Err(DedupError::InvalidSubmission(format!(
            "expected an object or an array, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Applies the duplicate engine to an ordered batch.
///
/// Candidates are evaluated strictly in order and each acceptance is written
/// before the next candidate is looked at, so later entries see earlier ones.
pub struct Ingestor {
    engine: DuplicateEngine,
}

impl Ingestor {
    pub fn new(engine: DuplicateEngine) -> Self {
        Self { engine }
    }

    pub async fn ingest(&self, candidates: Vec<Candidate>, options: IngestOptions) -> IngestReport {
        self.run(candidates.into_iter().map(Some).collect(), options).await
    }

    /// Parse a loosely-structured submission and ingest it.
    pub async fn ingest_value(
        &self,
        submission: Value,
        added_by: &str,
        options: IngestOptions,
    ) -> Result<IngestReport> {
        let entries = submission_entries(submission)?;
        let candidates = entries
            .iter()
            .map(|entry| Candidate::from_entry(entry, added_by))
            .collect();
        Ok(self.run(candidates, options).await)
    }

    async fn run(&self, candidates: Vec<Option<Candidate>>, options: IngestOptions) -> IngestReport {
        let mut counts = IngestCounts::default();
        let total = candidates.len();

        for (index, entry) in candidates.into_iter().enumerate() {
            let Some(mut candidate) = entry.filter(Candidate::is_valid) else {
                tracing::debug!(index, "skipping entry without title or unique id");
                counts.invalid += 1;
                continue;
            };

            let decision = match self.engine.decide(&mut candidate, options.force).await {
                Ok(decision) => decision,
                Err(e) => {
                    tracing::warn!(index, title = %candidate.title, "evaluation failed: {e}");
                    counts.failed += 1;
                    continue;
                }
            };

            match decision {
                Decision::Accept => match self.engine.commit(candidate) {
                    Ok((InsertOutcome::Inserted, record)) => {
                        tracing::info!(index, id = %record.id, title = %record.title, "saved");
                        counts.saved += 1;
                    }
                    Ok((InsertOutcome::Conflict, record)) => {
                        tracing::warn!(index, title = %record.title, "store reported a uniqueness conflict");
                        counts.skipped += 1;
                    }
                    Err(e) => {
                        tracing::warn!(index, "insert failed: {e}");
                        counts.failed += 1;
                    }
                },
                Decision::Reject { existing, reason } => {
                    tracing::debug!(index, existing = %existing.id, ?reason, "duplicate");
                    counts.skipped += 1;
                }
                Decision::Escalate { suspect, explanation } => {
                    tracing::warn!(
                        index,
                        title = %candidate.title,
                        existing = %suspect.record.title,
                        "batch halted on ambiguous duplicate"
                    );
                    return IngestReport::Conflict(ConflictReport {
                        explanation,
                        existing: suspect.record,
                        similarity: suspect.score,
                        candidate_title: candidate.title,
                        processed_count: counts.saved,
                        problem_index: index,
                        counts,
                    });
                }
            }
        }

        tracing::info!(
            total,
            saved = counts.saved,
            skipped = counts.skipped,
            invalid = counts.invalid,
            failed = counts.failed,
            "batch processed"
        );
        IngestReport::Ok(counts)
    }
}
