use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{DedupError, Result};
use crate::http::{DiskCache, RateLimitedClient, bearer_headers};

/// Maps text to a fixed-length vector.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// `POST {base_url}/embeddings` against any OpenAI-compatible endpoint.
pub struct OpenAiEmbeddingProvider {
    client: RateLimitedClient,
    base_url: String,
    api_key: String,
    model: String,
    cache: Option<DiskCache>,
}

impl OpenAiEmbeddingProvider {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        Self::with_params(
            "https://api.openai.com/v1",
            api_key,
            model,
            Duration::from_secs(30),
        )
    }

    pub fn with_params(
        base_url: &str,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = RateLimitedClient::new(
            Duration::from_millis(50),
            2,
            concat!("librarian/", env!("CARGO_PKG_VERSION")),
            timeout,
        )?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            cache: None,
        })
    }

    pub fn with_cache(mut self, cache: DiskCache) -> Self {
        self.cache = Some(cache);
        self
    }

    fn cache_key(&self, text: &str) -> String {
        format!("{}\n{}", self.model, text)
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let key = self.cache_key(text);
        if let Some(cache) = &self.cache {
            if let Some(vector) = cache.get::<Vec<f32>>(&key).await {
                tracing::debug!(model = %self.model, "embedding cache hit");
                return Ok(vector);
            }
        }

        let url = format!("{}/embeddings", self.base_url);
        let body = EmbeddingRequest {
            model: &self.model,
            input: text,
        };
        let resp: EmbeddingResponse = self
            .client
            .post_json_with_headers(&url, &body, bearer_headers(&self.api_key)?)
            .await?;

        let vector = resp
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| DedupError::Parse("embedding response carried no vector".to_string()))?;

        if let Some(cache) = &self.cache {
            cache.set(&key, &vector).await;
        }
        Ok(vector)
    }
}
