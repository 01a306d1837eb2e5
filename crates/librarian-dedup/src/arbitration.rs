use std::time::Duration;

use async_trait::async_trait;
use librarian_core::{Candidate, Record};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{DedupError, Result};
use crate::http::{RateLimitedClient, bearer_headers};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerdictStatus {
    Same,
    Different,
    Uncertain,
}

impl VerdictStatus {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "SAME" => Some(Self::Same),
            "DIFFERENT" => Some(Self::Different),
            "UNCERTAIN" => Some(Self::Uncertain),
            _ => None,
        }
    }
}

/// Oracle answer about a candidate and its suspects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub status: VerdictStatus,
    pub explanation: String,
    /// 0-based index into the suspects the oracle was shown.
    pub matched_index: Option<usize>,
}

impl Verdict {
    pub fn same(matched_index: usize, explanation: impl Into<String>) -> Self {
        Self {
            status: VerdictStatus::Same,
            explanation: explanation.into(),
            matched_index: Some(matched_index),
        }
    }

    pub fn different(explanation: impl Into<String>) -> Self {
        Self {
            status: VerdictStatus::Different,
            explanation: explanation.into(),
            matched_index: None,
        }
    }

    pub fn uncertain(explanation: impl Into<String>) -> Self {
        Self {
            status: VerdictStatus::Uncertain,
            explanation: explanation.into(),
            matched_index: None,
        }
    }
}

/// Decides whether a candidate is the same logical document as one of the suspects.
///
/// Only consulted for lexically ambiguous candidates. Errors are never read as
/// DIFFERENT by the engine.
#[async_trait]
pub trait ArbitrationOracle: Send + Sync {
    async fn arbitrate(&self, candidate: &Candidate, suspects: &[Record]) -> Result<Verdict>;
}

// ─── OpenAI-compatible chat oracle ──────────────────────────

const SYSTEM_PROMPT: &str =
    "You are an assistant managing a library dataset. Your job is to detect duplicate entries.";

/// Fields shown to the model; embeddings and bookkeeping stay out of the prompt.
#[derive(Serialize)]
struct PromptResource<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    title: &'a str,
    authors: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    unique_id: Option<&'a str>,
}

impl<'a> PromptResource<'a> {
    fn from_candidate(c: &'a Candidate) -> Self {
        Self {
            kind: &c.kind,
            title: &c.title,
            authors: &c.authors,
            year: c.year,
            source: c.source.as_deref(),
            unique_id: c.unique_id.as_deref(),
        }
    }

    fn from_record(r: &'a Record) -> Self {
        Self {
            kind: &r.kind,
            title: &r.title,
            authors: &r.authors,
            year: r.year,
            source: r.source.as_deref(),
            unique_id: r.unique_id.as_deref(),
        }
    }
}

pub fn build_user_prompt(candidate: &Candidate, suspects: &[Record]) -> String {
    let new_resource = serde_json::to_string(&PromptResource::from_candidate(candidate))
        .unwrap_or_else(|_| candidate.title.clone());
    let listed: Vec<String> = suspects
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let desc = serde_json::to_string(&PromptResource::from_record(r))
                .unwrap_or_else(|_| r.title.clone());
            format!("Candidate {}: {desc}", i + 1)
        })
        .collect();

    format!(
        "Determine if the 'New Resource' is the SAME logical resource as any of the 'Existing Candidates'.\n\
         Resources are SAME if they refer to the same paper, book or article, even if title formatting, \
         the author list or the source differ slightly.\n\
         Resources are DIFFERENT if they are different editions, different works by the same authors, \
         or unrelated.\n\n\
         New Resource: {new_resource}\n\n\
         Existing Candidates:\n{}\n\n\
         Respond in JSON only:\n\
         {{\"status\": \"SAME\" | \"DIFFERENT\" | \"UNCERTAIN\", \
         \"explanation\": \"one line\", \
         \"match_index\": <1-based index of the matched candidate, or null>}}",
        listed.join("\n")
    )
}

/// Read the model's JSON reply. `match_index` arrives 1-based.
pub fn parse_verdict(content: &str, suspect_count: usize) -> Result<Verdict> {
    let trimmed = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    let value: Value = serde_json::from_str(trimmed)
        .map_err(|e| DedupError::Parse(format!("oracle reply is not JSON: {e}")))?;

    let explanation = value
        .get("explanation")
        .and_then(Value::as_str)
        .unwrap_or("no explanation given")
        .to_string();

    let Some(status) = value
        .get("status")
        .and_then(Value::as_str)
        .and_then(VerdictStatus::parse)
    else {
        return Ok(Verdict::uncertain(format!("unrecognized oracle status: {explanation}")));
    };

    let matched_index = match value.get("match_index") {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
    .and_then(|one_based| usize::try_from(one_based).ok())
    .filter(|i| (1..=suspect_count).contains(i))
    .map(|i| i - 1);

    Ok(Verdict {
        status,
        explanation,
        matched_index: if status == VerdictStatus::Same { matched_index } else { None },
    })
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

pub struct OpenAiArbitrationOracle {
    client: RateLimitedClient,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiArbitrationOracle {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        Self::with_params(
            "https://api.openai.com/v1",
            api_key,
            model,
            Duration::from_secs(60),
        )
    }

    pub fn with_params(
        base_url: &str,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = RateLimitedClient::new(
            Duration::from_millis(200),
            1,
            concat!("librarian/", env!("CARGO_PKG_VERSION")),
            timeout,
        )?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
        })
    }
}

#[async_trait]
impl ArbitrationOracle for OpenAiArbitrationOracle {
    async fn arbitrate(&self, candidate: &Candidate, suspects: &[Record]) -> Result<Verdict> {
        if suspects.is_empty() {
            return Ok(Verdict::different("no similar records to compare against"));
        }

        let url = format!("{}/chat/completions", self.base_url);
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": build_user_prompt(candidate, suspects)},
            ],
            "response_format": {"type": "json_object"},
        });

        let resp: ChatResponse = self
            .client
            .post_json_with_headers(&url, &body, bearer_headers(&self.api_key)?)
            .await?;

        let content = resp
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| DedupError::Parse("oracle reply had no content".to_string()))?;

        let verdict = parse_verdict(&content, suspects.len())?;
        tracing::debug!(status = ?verdict.status, title = %candidate.title, "oracle verdict");
        Ok(verdict)
    }
}
