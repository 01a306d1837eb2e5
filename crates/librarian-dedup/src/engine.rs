use std::sync::Arc;

use chrono::Utc;
use librarian_core::{
    Candidate, DedupConfig, EmbeddingFallback, InsertOutcome, LexicalMetric, Record, RecordStore,
};

use crate::arbitration::{ArbitrationOracle, Verdict, VerdictStatus};
use crate::decision::{Decision, MatchReason};
use crate::embedding::EmbeddingProvider;
use crate::error::{DedupError, Result};
use crate::similarity::{Suspect, best_semantic_match, find_suspects, rank_semantic};

/// Tunables of the decision pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub fuzzy_threshold: f64,
    pub semantic_threshold: f64,
    pub max_suspects: usize,
    pub lexical_metric: LexicalMetric,
    pub embedding_fallback: EmbeddingFallback,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&DedupConfig::default())
    }
}

impl From<&DedupConfig> for EngineSettings {
    fn from(cfg: &DedupConfig) -> Self {
        Self {
            fuzzy_threshold: threshold(cfg.fuzzy_threshold, DedupConfig::default().fuzzy_threshold),
            semantic_threshold: threshold(
                cfg.semantic_threshold,
                DedupConfig::default().semantic_threshold,
            ),
            max_suspects: cfg.max_suspects.max(1),
            lexical_metric: cfg.lexical_metric,
            embedding_fallback: cfg.embedding_fallback,
        }
    }
}

/// Clamp to [0, 1]; NaN or infinite values fall back to `default`.
fn threshold(value: f64, default: f64) -> f64 {
    if value.is_finite() { value.clamp(0.0, 1.0) } else { default }
}

/// Whether the candidate ended up with a vector before the similarity layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EmbeddingState {
    Present,
    NoProvider,
    Failed,
}

/// Layered duplicate detector over a [`RecordStore`].
///
/// Layers run in order and each may short-circuit:
/// unique id, normalized title, cosine similarity, lexical scan plus arbitration.
/// Embedding provider and oracle are optional; without them the engine
/// degrades instead of failing.
pub struct DuplicateEngine {
    store: Arc<dyn RecordStore>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    oracle: Option<Arc<dyn ArbitrationOracle>>,
    settings: EngineSettings,
}

impl DuplicateEngine {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            embedder: None,
            oracle: None,
            settings: EngineSettings::default(),
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_oracle(mut self, oracle: Arc<dyn ArbitrationOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Evaluate `candidate` without touching the store.
    pub async fn check(&self, candidate: &Candidate) -> Result<Decision> {
        let mut scratch = candidate.clone();
        self.decide(&mut scratch, false).await
    }

    /// Run the pipeline for one candidate.
    ///
    /// Fills in the candidate's embedding (when a provider yields one) and the
    /// transient `similarity_score` / `match_index` fields. `force` skips the
    /// semantic and lexical layers but never the unique-id and title checks.
    pub async fn decide(&self, candidate: &mut Candidate, force: bool) -> Result<Decision> {
        if !candidate.is_valid() {
            return Err(DedupError::InvalidCandidate(
                "candidate has neither a title nor a unique id".to_string(),
            ));
        }

        if let Some(unique_id) = candidate.unique_id.as_deref() {
            if let Some(existing) = self.store.find_by_unique_id(unique_id)? {
                tracing::debug!(unique_id, existing = %existing.id, "unique id match");
                return Ok(Decision::Reject {
                    existing,
                    reason: MatchReason::UniqueId,
                });
            }
        }

        if let Some(existing) = self.store.find_by_normalized_title(&candidate.normalized_title)? {
            tracing::debug!(title = %candidate.normalized_title, existing = %existing.id, "normalized title match");
            return Ok(Decision::Reject {
                existing,
                reason: MatchReason::NormalizedTitle,
            });
        }

        let embedding_state = self.ensure_embedding(candidate).await;

        if force {
            tracing::debug!(title = %candidate.title, "forced, skipping similarity layers");
            return Ok(Decision::Accept);
        }

        let records = self.store.all_records()?;

        if embedding_state == EmbeddingState::Present {
            if let Some(decision) = self.semantic_layer(candidate, &records) {
                return Ok(decision);
            }
        } else if embedding_state == EmbeddingState::Failed
            && self.settings.embedding_fallback == EmbeddingFallback::ExactOnly
        {
            tracing::debug!(title = %candidate.title, "no embedding, exact checks only");
            return Ok(Decision::Accept);
        }

        self.lexical_layer(candidate, &records).await
    }

    /// Persist an accepted candidate. A uniqueness violation at write time
    /// comes back as [`InsertOutcome::Conflict`].
    pub fn commit(&self, candidate: Candidate) -> Result<(InsertOutcome, Record)> {
        let record = candidate.into_record(Utc::now());
        let outcome = self.store.insert(&record)?;
        Ok((outcome, record))
    }

    /// Stored records closest in meaning to `query`, best first.
    ///
    /// Empty when no embedding provider is configured or it fails.
    pub async fn search_similar(&self, query: &str, limit: usize) -> Result<Vec<(Record, f64)>> {
        let Some(embedder) = &self.embedder else {
            tracing::warn!("semantic search requested without an embedding provider");
            return Ok(Vec::new());
        };
        let vector = match embedder.embed(query).await {
            Ok(v) if !v.is_empty() => v,
            Ok(_) => return Ok(Vec::new()),
            Err(e) => {
                tracing::warn!("embedding query failed: {e}");
                return Ok(Vec::new());
            }
        };
        let records = self.store.all_records()?;
        Ok(rank_semantic(&vector, &records, limit))
    }

    async fn ensure_embedding(&self, candidate: &mut Candidate) -> EmbeddingState {
        if candidate.has_embedding() {
            return EmbeddingState::Present;
        }
        candidate.embedding = None;
        let Some(embedder) = &self.embedder else {
            return EmbeddingState::NoProvider;
        };
        match embedder.embed(&candidate.embedding_text()).await {
            Ok(vector) if !vector.is_empty() && vector.iter().all(|v| v.is_finite()) => {
                candidate.embedding = Some(vector);
                EmbeddingState::Present
            }
            Ok(_) => {
                tracing::warn!(title = %candidate.title, "embedding provider returned an empty or non-finite vector");
                EmbeddingState::Failed
            }
            Err(e) => {
                tracing::warn!(title = %candidate.title, "embedding failed: {e}");
                EmbeddingState::Failed
            }
        }
    }

    fn semantic_layer(&self, candidate: &mut Candidate, records: &[Record]) -> Option<Decision> {
        let embedding = candidate.embedding.as_deref()?;
        let (best, score) = best_semantic_match(embedding, records)?;
        candidate.similarity_score = Some(score);
        // NaN never passes the threshold.
        if !(score >= self.settings.semantic_threshold) {
            tracing::debug!(title = %candidate.title, score, "closest vector below threshold");
            return None;
        }
        tracing::debug!(title = %candidate.title, existing = %best.id, score, "semantic match");
        Some(Decision::Reject {
            existing: best.clone(),
            reason: MatchReason::Semantic { score },
        })
    }

    async fn lexical_layer(&self, candidate: &mut Candidate, records: &[Record]) -> Result<Decision> {
        let mut suspects = find_suspects(
            &candidate.normalized_title,
            records,
            self.settings.fuzzy_threshold,
            self.settings.lexical_metric,
        );
        if suspects.is_empty() {
            return Ok(Decision::Accept);
        }
        suspects.truncate(self.settings.max_suspects);
        candidate.similarity_score = Some(suspects[0].score);

        let shown: Vec<Record> = suspects.iter().map(|s| s.record.clone()).collect();
        let verdict = self.arbitrate(candidate, &shown).await;

        Ok(match verdict.status {
            VerdictStatus::Same => {
                let index = verdict
                    .matched_index
                    .filter(|i| *i < suspects.len())
                    .unwrap_or(0);
                candidate.match_index = Some(index);
                let Suspect { record, .. } = suspects.swap_remove(index);
                tracing::debug!(title = %candidate.title, existing = %record.id, "oracle says same");
                Decision::Reject {
                    existing: record,
                    reason: MatchReason::Arbitrated {
                        explanation: verdict.explanation,
                    },
                }
            }
            VerdictStatus::Different => {
                tracing::debug!(title = %candidate.title, "oracle says different");
                Decision::Accept
            }
            VerdictStatus::Uncertain => {
                candidate.match_index = Some(0);
                tracing::warn!(title = %candidate.title, "escalating: {}", verdict.explanation);
                Decision::Escalate {
                    suspect: suspects.swap_remove(0),
                    explanation: verdict.explanation,
                }
            }
        })
    }

    async fn arbitrate(&self, candidate: &Candidate, suspects: &[Record]) -> Verdict {
        let Some(oracle) = &self.oracle else {
            return Verdict::uncertain("no arbitration oracle configured");
        };
        match oracle.arbitrate(candidate, suspects).await {
            Ok(verdict) => verdict,
            Err(e) => {
                tracing::warn!(title = %candidate.title, "arbitration failed: {e}");
                Verdict::uncertain(format!("arbitration failed: {e}"))
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use librarian_core::Database;

    /// Embeds from a fixed table; unknown texts fail.
    pub(crate) struct TableEmbedder(pub HashMap<String, Vec<f32>>);

    #[async_trait]
    impl EmbeddingProvider for TableEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.0
                .get(text)
                .cloned()
                .ok_or_else(|| DedupError::ProviderUnavailable(format!("no vector for {text}")))
        }
    }

    /// Returns a canned verdict and records how many suspects it was shown.
    pub(crate) struct FixedOracle {
        pub verdict: Option<Verdict>,
        pub calls: Mutex<Vec<usize>>,
    }

    impl FixedOracle {
        pub(crate) fn new(verdict: Verdict) -> Self {
            Self {
                verdict: Some(verdict),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn failing() -> Self {
            Self {
                verdict: None,
                calls: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ArbitrationOracle for FixedOracle {
        async fn arbitrate(&self, _candidate: &Candidate, suspects: &[Record]) -> Result<Verdict> {
            self.calls.lock().unwrap().push(suspects.len());
            self.verdict
                .clone()
                .ok_or_else(|| DedupError::ApiError("oracle".to_string(), "HTTP 503".to_string()))
        }
    }

    fn store() -> Arc<Database> {
        Arc::new(Database::open_in_memory().unwrap())
    }

    fn seed(engine: &DuplicateEngine, candidate: Candidate) -> Record {
        let (outcome, record) = engine.commit(candidate).unwrap();
        assert_eq!(outcome, InsertOutcome::Inserted);
        record
    }

    #[tokio::test]
    async fn unique_id_match_rejects_regardless_of_title() {
        let engine = DuplicateEngine::new(store());
        seed(&engine, Candidate::new("Attention Is All You Need", "a").with_unique_id("1706.03762"));

        let decision = engine
            .check(&Candidate::new("Totally Different", "b").with_unique_id("1706.03762"))
            .await
            .unwrap();
        match decision {
            Decision::Reject { existing, reason } => {
                assert_eq!(existing.title, "Attention Is All You Need");
                assert_eq!(reason, MatchReason::UniqueId);
            }
            other => panic!("expected reject, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn normalized_title_match_rejects() {
        let engine = DuplicateEngine::new(store());
        seed(&engine, Candidate::new("Deep Learning", "a"));

        let decision = engine.check(&Candidate::new("deep-learning!", "b")).await.unwrap();
        assert!(matches!(
            decision,
            Decision::Reject { reason: MatchReason::NormalizedTitle, .. }
        ));
    }

    #[tokio::test]
    async fn semantic_match_rejects_without_oracle() {
        let oracle = Arc::new(FixedOracle::new(Verdict::uncertain("should not be asked")));
        let engine = DuplicateEngine::new(store()).with_oracle(oracle.clone());
        seed(&engine, Candidate::new("Deep Learning", "a").with_embedding(vec![1.0, 0.0]));

        let mut candidate =
            Candidate::new("Intro to Deep Learning", "b").with_embedding(vec![0.9, 0.435_889_9]);
        let decision = engine.decide(&mut candidate, false).await.unwrap();

        match decision {
            Decision::Reject { existing, reason: MatchReason::Semantic { score } } => {
                assert_eq!(existing.title, "Deep Learning");
                assert!((score - 0.9).abs() < 1e-4);
            }
            other => panic!("expected semantic reject, got {other:?}"),
        }
        assert_eq!(oracle.call_count(), 0);
        assert!(candidate.similarity_score.is_some());
    }

    #[tokio::test]
    async fn low_cosine_falls_through_to_lexical_scan() {
        let oracle = Arc::new(FixedOracle::new(Verdict::different("other book")));
        let engine = DuplicateEngine::new(store()).with_oracle(oracle.clone());
        seed(&engine, Candidate::new("Deep Learning", "a").with_embedding(vec![1.0, 0.0]));

        let candidate = Candidate::new("Intro to Deep Learning", "b").with_embedding(vec![0.0, 1.0]);
        assert_eq!(engine.check(&candidate).await.unwrap(), Decision::Accept);
        assert_eq!(oracle.call_count(), 1);
    }

    #[tokio::test]
    async fn non_finite_vectors_never_match_semantically() {
        let engine = DuplicateEngine::new(store());
        seed(&engine, Candidate::new("Deep Learning", "a").with_embedding(vec![1.0, 0.0]));

        let mut supplied =
            Candidate::new("Cooking for Beginners", "b").with_embedding(vec![f32::INFINITY, 1.0]);
        assert_eq!(engine.decide(&mut supplied, false).await.unwrap(), Decision::Accept);
        assert!(supplied.embedding.is_none());

        let embedder = TableEmbedder(HashMap::from([(
            "Cooking for Beginners".to_string(),
            vec![f32::NAN, 1.0],
        )]));
        let engine = DuplicateEngine::new(engine.store().clone()).with_embedder(Arc::new(embedder));
        let mut computed = Candidate::new("Cooking for Beginners", "b");
        assert_eq!(engine.decide(&mut computed, false).await.unwrap(), Decision::Accept);
        assert!(computed.embedding.is_none());
    }

    #[tokio::test]
    async fn uncertain_oracle_escalates_with_top_suspect() {
        let engine = DuplicateEngine::new(store())
            .with_oracle(Arc::new(FixedOracle::new(Verdict::uncertain("could be either"))));
        seed(&engine, Candidate::new("Deep Learning", "a"));

        let mut candidate = Candidate::new("Intro to Deep Learning", "b");
        let decision = engine.decide(&mut candidate, false).await.unwrap();
        match decision {
            Decision::Escalate { suspect, explanation } => {
                assert_eq!(suspect.record.title, "Deep Learning");
                assert!((suspect.score - 24.0 / 31.0).abs() < 1e-9);
                assert_eq!(explanation, "could be either");
            }
            other => panic!("expected escalation, got {other:?}"),
        }
        assert_eq!(candidate.match_index, Some(0));
    }

    #[tokio::test]
    async fn same_verdict_rejects_matched_suspect() {
        let oracle = Arc::new(FixedOracle::new(Verdict::same(1, "same text")));
        let settings = EngineSettings {
            max_suspects: 3,
            ..EngineSettings::default()
        };
        let engine = DuplicateEngine::new(store())
            .with_oracle(oracle.clone())
            .with_settings(settings);
        seed(&engine, Candidate::new("Deep Learning", "a"));
        seed(&engine, Candidate::new("Deep Learning Book", "a"));

        let decision = engine
            .check(&Candidate::new("Deep Learning Books", "b"))
            .await
            .unwrap();
        match decision {
            Decision::Reject { existing, reason: MatchReason::Arbitrated { .. } } => {
                // Suspects are ordered best first: "Deep Learning Book", then "Deep Learning".
                assert_eq!(existing.title, "Deep Learning");
            }
            other => panic!("expected arbitrated reject, got {other:?}"),
        }
        assert_eq!(*oracle.calls.lock().unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn same_verdict_without_index_uses_top_suspect() {
        let verdict = Verdict {
            status: VerdictStatus::Same,
            explanation: "same".to_string(),
            matched_index: None,
        };
        let engine = DuplicateEngine::new(store()).with_oracle(Arc::new(FixedOracle::new(verdict)));
        seed(&engine, Candidate::new("Deep Learning", "a"));

        let decision = engine.check(&Candidate::new("Intro to Deep Learning", "b")).await.unwrap();
        assert!(matches!(decision, Decision::Reject { ref existing, .. } if existing.title == "Deep Learning"));
    }

    #[tokio::test]
    async fn only_top_suspects_reach_the_oracle() {
        let oracle = Arc::new(FixedOracle::new(Verdict::different("no")));
        let engine = DuplicateEngine::new(store()).with_oracle(oracle.clone());
        seed(&engine, Candidate::new("Deep Learning", "a"));
        seed(&engine, Candidate::new("Deep Learning Book", "a"));

        engine.check(&Candidate::new("Deep Learning Books", "b")).await.unwrap();
        assert_eq!(*oracle.calls.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn missing_or_failing_oracle_escalates() {
        let engine = DuplicateEngine::new(store());
        seed(&engine, Candidate::new("Deep Learning", "a"));
        let decision = engine.check(&Candidate::new("Intro to Deep Learning", "b")).await.unwrap();
        assert!(decision.is_escalation());

        let engine = DuplicateEngine::new(engine.store().clone()).with_oracle(Arc::new(FixedOracle::failing()));
        match engine.check(&Candidate::new("Intro to Deep Learning", "b")).await.unwrap() {
            Decision::Escalate { explanation, .. } => assert!(explanation.contains("503")),
            other => panic!("expected escalation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn no_suspects_accepts_without_oracle() {
        let oracle = Arc::new(FixedOracle::new(Verdict::uncertain("unused")));
        let engine = DuplicateEngine::new(store()).with_oracle(oracle.clone());
        seed(&engine, Candidate::new("Deep Learning", "a"));

        let decision = engine.check(&Candidate::new("Cooking for Beginners", "b")).await.unwrap();
        assert_eq!(decision, Decision::Accept);
        assert_eq!(oracle.call_count(), 0);
    }

    #[tokio::test]
    async fn force_skips_similarity_but_not_unique_id() {
        let oracle = Arc::new(FixedOracle::new(Verdict::uncertain("unused")));
        let engine = DuplicateEngine::new(store()).with_oracle(oracle.clone());
        seed(&engine, Candidate::new("Deep Learning", "a").with_unique_id("isbn-1"));

        let mut similar = Candidate::new("Intro to Deep Learning", "b");
        assert_eq!(engine.decide(&mut similar, true).await.unwrap(), Decision::Accept);
        assert_eq!(oracle.call_count(), 0);

        let mut same_id = Candidate::new("Something Else", "b").with_unique_id("isbn-1");
        assert!(matches!(
            engine.decide(&mut same_id, true).await.unwrap(),
            Decision::Reject { reason: MatchReason::UniqueId, .. }
        ));
    }

    #[tokio::test]
    async fn provider_vector_is_attached_to_candidate() {
        let table = HashMap::from([("Deep Learning by Ian Goodfellow".to_string(), vec![0.5, 0.5])]);
        let engine = DuplicateEngine::new(store()).with_embedder(Arc::new(TableEmbedder(table)));

        let mut candidate = Candidate::new("Deep Learning", "a").with_authors(["Ian Goodfellow"]);
        assert_eq!(engine.decide(&mut candidate, true).await.unwrap(), Decision::Accept);
        assert_eq!(candidate.embedding, Some(vec![0.5, 0.5]));
    }

    #[tokio::test]
    async fn embedding_failure_follows_fallback_policy() {
        let failing = Arc::new(TableEmbedder(HashMap::new()));
        let oracle = Arc::new(FixedOracle::new(Verdict::uncertain("ambiguous")));
        let db = store();

        let fuzzy = DuplicateEngine::new(db.clone())
            .with_embedder(failing.clone())
            .with_oracle(oracle.clone());
        seed(&fuzzy, Candidate::new("Deep Learning", "a"));
        let candidate = Candidate::new("Intro to Deep Learning", "b");
        assert!(fuzzy.check(&candidate).await.unwrap().is_escalation());

        let exact_only = DuplicateEngine::new(db)
            .with_embedder(failing)
            .with_oracle(oracle)
            .with_settings(EngineSettings {
                embedding_fallback: EmbeddingFallback::ExactOnly,
                ..EngineSettings::default()
            });
        assert_eq!(exact_only.check(&candidate).await.unwrap(), Decision::Accept);
        assert!(matches!(
            exact_only.check(&Candidate::new("DEEP learning", "c")).await.unwrap(),
            Decision::Reject { reason: MatchReason::NormalizedTitle, .. }
        ));
    }

    #[tokio::test]
    async fn check_does_not_write() {
        let db = store();
        let engine = DuplicateEngine::new(db.clone());
        engine.check(&Candidate::new("Deep Learning", "a")).await.unwrap();
        assert_eq!(db.count_records().unwrap(), 0);
    }

    #[tokio::test]
    async fn invalid_candidate_is_an_error() {
        let engine = DuplicateEngine::new(store());
        let err = engine.check(&Candidate::new("  ", "a")).await.unwrap_err();
        assert!(matches!(err, DedupError::InvalidCandidate(_)));
    }

    #[tokio::test]
    async fn search_similar_ranks_by_cosine() {
        let table = HashMap::from([("neural networks".to_string(), vec![1.0, 0.0])]);
        let engine = DuplicateEngine::new(store()).with_embedder(Arc::new(TableEmbedder(table)));
        seed(&engine, Candidate::new("Deep Learning", "a").with_embedding(vec![0.9, 0.1]));
        seed(&engine, Candidate::new("Cooking", "a").with_embedding(vec![0.0, 1.0]));
        seed(&engine, Candidate::new("No Vector", "a"));

        let hits = engine.search_similar("neural networks", 5).await.unwrap();
        let titles: Vec<&str> = hits.iter().map(|(r, _)| r.title.as_str()).collect();
        assert_eq!(titles, ["Deep Learning", "Cooking"]);

        assert!(engine.search_similar("unknown query", 5).await.unwrap().is_empty());
        assert!(DuplicateEngine::new(store()).search_similar("x", 5).await.unwrap().is_empty());
    }

    #[test]
    fn settings_clamp_thresholds() {
        let cfg = DedupConfig {
            fuzzy_threshold: 1.7,
            semantic_threshold: -0.2,
            max_suspects: 0,
            ..DedupConfig::default()
        };
        let settings = EngineSettings::from(&cfg);
        assert_eq!(settings.fuzzy_threshold, 1.0);
        assert_eq!(settings.semantic_threshold, 0.0);
        assert_eq!(settings.max_suspects, 1);
    }

    #[test]
    fn settings_replace_nan_thresholds_with_defaults() {
        let cfg = DedupConfig {
            fuzzy_threshold: f64::NAN,
            semantic_threshold: f64::INFINITY,
            ..DedupConfig::default()
        };
        let settings = EngineSettings::from(&cfg);
        let defaults = DedupConfig::default();
        assert_eq!(settings.fuzzy_threshold, defaults.fuzzy_threshold);
        assert_eq!(settings.semantic_threshold, defaults.semantic_threshold);
    }
}
