use std::sync::Arc;
use std::time::Duration;

use librarian_core::{AppConfig, ArbitrationConfig, EmbeddingConfig, ProviderKind, RecordStore};

use crate::arbitration::{ArbitrationOracle, OpenAiArbitrationOracle};
use crate::embedding::{EmbeddingProvider, OpenAiEmbeddingProvider};
use crate::engine::{DuplicateEngine, EngineSettings};
use crate::error::Result;
use crate::http::DiskCache;

const EMBEDDING_CACHE_TTL: Duration = Duration::from_secs(30 * 24 * 3600);

fn env_key(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Wire store, providers and thresholds from configuration.
pub fn build_engine(config: &AppConfig, store: Arc<dyn RecordStore>) -> Result<DuplicateEngine> {
    build_engine_with(config, store, env_key)
}

pub(crate) fn build_engine_with(
    config: &AppConfig,
    store: Arc<dyn RecordStore>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<DuplicateEngine> {
    let mut engine =
        DuplicateEngine::new(store).with_settings(EngineSettings::from(&config.dedup));
    if let Some(embedder) = embedding_provider(&config.embedding, &lookup)? {
        engine = engine.with_embedder(embedder);
    }
    if let Some(oracle) = arbitration_oracle(&config.arbitration, &lookup)? {
        engine = engine.with_oracle(oracle);
    }
    Ok(engine)
}

fn embedding_provider(
    cfg: &EmbeddingConfig,
    lookup: &impl Fn(&str) -> Option<String>,
) -> Result<Option<Arc<dyn EmbeddingProvider>>> {
    match cfg.provider {
        ProviderKind::None => Ok(None),
        ProviderKind::Openai => {
            let Some(api_key) = lookup(&cfg.api_key_env) else {
                tracing::warn!(env = %cfg.api_key_env, "embedding provider disabled: API key not set");
                return Ok(None);
            };
            let mut provider = OpenAiEmbeddingProvider::with_params(
                &cfg.base_url,
                api_key,
                cfg.model.clone(),
                Duration::from_secs(cfg.timeout_secs),
            )?;
            if cfg.cache {
                provider = provider.with_cache(DiskCache::new("embeddings", EMBEDDING_CACHE_TTL));
            }
            let provider: Arc<dyn EmbeddingProvider> = Arc::new(provider);
            Ok(Some(provider))
        }
    }
}

fn arbitration_oracle(
    cfg: &ArbitrationConfig,
    lookup: &impl Fn(&str) -> Option<String>,
) -> Result<Option<Arc<dyn ArbitrationOracle>>> {
    match cfg.provider {
        ProviderKind::None => Ok(None),
        ProviderKind::Openai => {
            let Some(api_key) = lookup(&cfg.api_key_env) else {
                tracing::warn!(env = %cfg.api_key_env, "arbitration oracle disabled: API key not set");
                return Ok(None);
            };
            let oracle = OpenAiArbitrationOracle::with_params(
                &cfg.base_url,
                api_key,
                cfg.model.clone(),
                Duration::from_secs(cfg.timeout_secs),
            )?;
            let oracle: Arc<dyn ArbitrationOracle> = Arc::new(oracle);
            Ok(Some(oracle))
        }
    }
}
