use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Root application configuration, loaded from `~/.config/librarian/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub dedup: DedupConfig,
    pub embedding: EmbeddingConfig,
    pub arbitration: ArbitrationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub database_path: String,
}

/// Thresholds and policies of the duplicate decision pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Lexical ratio strictly above this marks a stored record as a suspect.
    pub fuzzy_threshold: f64,
    /// Cosine similarity at or above this is a duplicate without arbitration.
    pub semantic_threshold: f64,
    /// How many top suspects are shown to the arbitration oracle.
    pub max_suspects: usize,
    pub lexical_metric: LexicalMetric,
    pub embedding_fallback: EmbeddingFallback,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LexicalMetric {
    /// Matching-blocks ratio `2*M / T`.
    #[default]
    RatcliffObershelp,
    /// `1 - levenshtein / max_len`.
    Levenshtein,
}

/// What the engine does when the embedding provider fails for a candidate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingFallback {
    /// Skip the semantic layer and continue with the lexical scan.
    #[default]
    FuzzyScan,
    /// Decide on exact keys only and accept otherwise.
    ExactOnly,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[default]
    None,
    Openai,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: ProviderKind,
    pub model: String,
    pub base_url: String,
    pub api_key_env: String,
    pub timeout_secs: u64,
    /// Cache vectors on disk keyed by model and text.
    pub cache: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbitrationConfig {
    pub provider: ProviderKind,
    pub model: String,
    pub base_url: String,
    pub api_key_env: String,
    pub timeout_secs: u64,
}

// ─── Defaults ──────────────────────────────────────────────

impl Default for StoreConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("~/.local/share"))
            .join("librarian");

        Self {
            database_path: data_dir.join("librarian.db").to_string_lossy().to_string(),
        }
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: 0.6,
            semantic_threshold: 0.85,
            max_suspects: 1,
            lexical_metric: LexicalMetric::default(),
            embedding_fallback: EmbeddingFallback::default(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::None,
            model: "text-embedding-3-small".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 30,
            cache: true,
        }
    }
}

impl Default for ArbitrationConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::None,
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 60,
        }
    }
}

// ─── Load / Save ───────────────────────────────────────────

impl AppConfig {
    /// Standard config file path: `~/.config/librarian/config.toml`
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("LIBRARIAN_CONFIG") {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("librarian")
            .join("config.toml")
    }

    /// Load config from disk, falling back to defaults if file doesn't exist.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path())?;
        if let Ok(path) = std::env::var("LIBRARIAN_DATABASE") {
            config.store.database_path = path;
        }
        Ok(config)
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save config to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let toml_str = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_str)?;
        Ok(())
    }

    /// Path to the SQLite database file.
    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.store.database_path)
    }

    /// Flat key/value view used by `librarian config list`.
    pub fn key_values(&self) -> Vec<(&'static str, String)> {
        vec![
            ("store.database_path", self.store.database_path.clone()),
            ("dedup.fuzzy_threshold", self.dedup.fuzzy_threshold.to_string()),
            ("dedup.semantic_threshold", self.dedup.semantic_threshold.to_string()),
            ("dedup.max_suspects", self.dedup.max_suspects.to_string()),
            ("dedup.lexical_metric", format!("{:?}", self.dedup.lexical_metric)),
            ("dedup.embedding_fallback", format!("{:?}", self.dedup.embedding_fallback)),
            ("embedding.provider", format!("{:?}", self.embedding.provider)),
            ("embedding.model", self.embedding.model.clone()),
            ("embedding.base_url", self.embedding.base_url.clone()),
            ("embedding.api_key_env", self.embedding.api_key_env.clone()),
            ("embedding.cache", self.embedding.cache.to_string()),
            ("arbitration.provider", format!("{:?}", self.arbitration.provider)),
            ("arbitration.model", self.arbitration.model.clone()),
            ("arbitration.base_url", self.arbitration.base_url.clone()),
            ("arbitration.api_key_env", self.arbitration.api_key_env.clone()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.dedup.fuzzy_threshold, 0.6);
        assert_eq!(cfg.dedup.semantic_threshold, 0.85);
        assert_eq!(cfg.dedup.max_suspects, 1);
        assert_eq!(cfg.embedding.provider, ProviderKind::None);
        assert!(cfg.database_path().to_string_lossy().contains("librarian.db"));
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let mut cfg = AppConfig::default();
        cfg.dedup.lexical_metric = LexicalMetric::Levenshtein;
        cfg.embedding.provider = ProviderKind::Openai;
        cfg.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.dedup.lexical_metric, LexicalMetric::Levenshtein);
        assert_eq!(loaded.embedding.provider, ProviderKind::Openai);
        assert_eq!(loaded.arbitration.model, cfg.arbitration.model);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[dedup]\nfuzzy_threshold = 0.7\nembedding_fallback = \"exact_only\"\n",
        )
        .unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.dedup.fuzzy_threshold, 0.7);
        assert_eq!(loaded.dedup.semantic_threshold, 0.85);
        assert_eq!(loaded.dedup.embedding_fallback, EmbeddingFallback::ExactOnly);
        assert_eq!(loaded.embedding.model, "text-embedding-3-small");
    }

    #[test]
    fn test_load_nonexistent_returns_default() {
        let cfg = AppConfig::load_from(Path::new("/tmp/nonexistent_librarian_config.toml")).unwrap();
        assert_eq!(cfg.dedup.fuzzy_threshold, 0.6);
    }

    #[test]
    fn test_key_values_cover_sections() {
        let keys: Vec<&str> = AppConfig::default().key_values().into_iter().map(|(k, _)| k).collect();
        assert!(keys.contains(&"store.database_path"));
        assert!(keys.contains(&"dedup.semantic_threshold"));
        assert!(keys.contains(&"arbitration.model"));
    }
}
