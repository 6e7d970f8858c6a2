use thiserror::Error;

use crate::storage::StorageError;
use crate::upstream::FetchError;

/// Errors returned across the service boundary.
///
/// `InvalidInput`, `NotFound` and `NoChapters` are caller-facing outcomes;
/// `Storage` and `Upstream` are service failures.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Caller-supplied data violates a precondition (e.g. empty slug list)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Feed identifier is unknown or its mapping has expired
    #[error("Feed not found")]
    NotFound,

    /// None of the requested titles produced any chapters
    #[error("No chapters found for the requested comics")]
    NoChapters,

    /// Mapping or chapter store could not be used
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Upstream API failed after retries
    #[error(transparent)]
    Upstream(#[from] FetchError),
}

impl FeedError {
    /// True for errors the caller caused or can act on (4xx-style).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            FeedError::InvalidInput(_) | FeedError::NotFound | FeedError::NoChapters
        )
    }
}
