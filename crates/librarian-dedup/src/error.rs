use librarian_core::LibrarianError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DedupError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error from {0}: {1}")]
    ApiError(String, String),

    #[error("rate limit from {0}, retry after {1}s")]
    RateLimit(String, u64),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("invalid submission: {0}")]
    InvalidSubmission(String),

    #[error("invalid candidate: {0}")]
    InvalidCandidate(String),

    #[error(transparent)]
    Store(#[from] LibrarianError),
}

pub type Result<T> = std::result::Result<T, DedupError>;
