//! Librarian core: records, title normalization, configuration and the SQLite store.

pub mod config;
pub mod error;
pub mod models;
pub mod normalize;
pub mod storage;

pub use config::{
    AppConfig, ArbitrationConfig, DedupConfig, EmbeddingConfig, EmbeddingFallback, LexicalMetric,
    ProviderKind, StoreConfig,
};
pub use error::{ExitCode, LibrarianError, Result};
pub use models::*;
pub use normalize::{normalize_title, resolve_normalized_title};

pub use storage::database::{ConnectionPool, Database, open_database, open_in_memory};
pub use storage::queries::RecordStatsQuery;
pub use storage::repositories::{RecordRepository, SqliteRecordRepository};
pub use storage::store::RecordStore;
