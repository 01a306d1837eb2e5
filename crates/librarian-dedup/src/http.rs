use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, RETRY_AFTER};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tokio::time::sleep;

use crate::error::{DedupError, Result};

// ─── RateLimitedClient ────────────────────────────────────────────────────────

pub struct RateLimitedClient {
    client: reqwest::Client,
    min_interval: Duration,
    last_request: Arc<Mutex<Option<Instant>>>,
    max_retries: u32,
}

impl RateLimitedClient {
    pub fn new(
        min_interval: Duration,
        max_retries: u32,
        user_agent: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .gzip(true)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            min_interval,
            last_request: Arc::new(Mutex::new(None)),
            max_retries,
        })
    }

    async fn wait_for_rate_limit(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(t) = *last {
            let elapsed = t.elapsed();
            if elapsed < self.min_interval {
                sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    pub async fn post_json_with_headers<B: Serialize, R: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
        headers: HeaderMap,
    ) -> Result<R> {
        let mut attempt = 0u32;
        loop {
            self.wait_for_rate_limit().await;
            let resp = self
                .client
                .post(url)
                .headers(headers.clone())
                .json(body)
                .send()
                .await;

            match resp {
                Ok(r) if r.status() == 429 => {
                    let wait = r
                        .headers()
                        .get(RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|s| s.parse::<u64>().ok())
                        .unwrap_or(60);
                    if attempt >= self.max_retries {
                        return Err(DedupError::RateLimit(url.to_string(), wait));
                    }
                    tracing::warn!(url, wait, "rate limited, backing off");
                    sleep(Duration::from_secs(wait)).await;
                    attempt += 1;
                }
                Ok(r) if !r.status().is_success() => {
                    let status = r.status().as_u16();
                    let msg = r.text().await.unwrap_or_default();
                    return Err(DedupError::ApiError(
                        url.to_string(),
                        format!("HTTP {status}: {msg}"),
                    ));
                }
                Ok(r) => {
                    let text = r.text().await.map_err(DedupError::Http)?;
                    return serde_json::from_str(&text)
                        .map_err(|e| DedupError::Parse(e.to_string()));
                }
                Err(e) => {
                    if attempt >= self.max_retries {
                        return Err(DedupError::Http(e));
                    }
                    let backoff = 2u64.pow(attempt);
                    tracing::debug!(url, attempt, "request failed, retrying in {backoff}s: {e}");
                    sleep(Duration::from_secs(backoff)).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// `Authorization: Bearer <key>` header map for OpenAI-compatible APIs.
pub fn bearer_headers(api_key: &str) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    let value = HeaderValue::from_str(&format!("Bearer {api_key}"))
        .map_err(|e| DedupError::ProviderUnavailable(format!("invalid API key header: {e}")))?;
    headers.insert(AUTHORIZATION, value);
    Ok(headers)
}

// ─── DiskCache ────────────────────────────────────────────────────────────────

pub struct DiskCache {
    dir: PathBuf,
    ttl: Duration,
}

fn cache_key_to_path(dir: &Path, key: &str) -> PathBuf {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    let hash = hasher.finish();
    dir.join(format!("{hash:016x}.json"))
}

#[derive(Serialize, serde::Deserialize)]
struct CacheEntry<T> {
    stored_at: u64, // Unix timestamp secs
    key: String,
    value: T,
}

impl DiskCache {
    /// Cache under `<data_local_dir>/librarian/cache/<namespace>`.
    pub fn new(namespace: &str, ttl: Duration) -> Self {
        let dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("librarian")
            .join("cache")
            .join(namespace);
        Self::at(dir, ttl)
    }

    pub fn at(dir: PathBuf, ttl: Duration) -> Self {
        let _ = std::fs::create_dir_all(&dir);
        Self { dir, ttl }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let path = cache_key_to_path(&self.dir, key);
        let data = tokio::fs::read(&path).await.ok()?;
        let entry: CacheEntry<T> = serde_json::from_slice(&data).ok()?;
        // Hash collisions are possible; the stored key settles it.
        if entry.key != key {
            return None;
        }
        if unix_now().saturating_sub(entry.stored_at) > self.ttl.as_secs() {
            let _ = tokio::fs::remove_file(&path).await;
            return None;
        }
        Some(entry.value)
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T) {
        let path = cache_key_to_path(&self.dir, key);
        let entry = CacheEntry {
            stored_at: unix_now(),
            key: key.to_string(),
            value,
        };
        if let Ok(data) = serde_json::to_vec(&entry) {
            let _ = tokio::fs::write(&path, data).await;
        }
    }
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
