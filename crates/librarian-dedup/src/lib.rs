//! Librarian dedup: layered duplicate detection and batch ingestion.

pub mod arbitration;
pub mod decision;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod http;
pub mod ingest;
pub mod providers;
pub mod similarity;

pub use arbitration::{ArbitrationOracle, OpenAiArbitrationOracle, Verdict, VerdictStatus};
pub use decision::{Decision, MatchReason};
pub use embedding::{EmbeddingProvider, OpenAiEmbeddingProvider};
pub use engine::{DuplicateEngine, EngineSettings};
pub use error::{DedupError, Result};
pub use ingest::{ConflictReport, IngestCounts, IngestOptions, IngestReport, Ingestor, submission_entries};
pub use providers::build_engine;
pub use similarity::{Suspect, cosine_similarity, lexical_similarity, ratcliff_obershelp};
