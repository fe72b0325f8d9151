use kiln_domain::DomainError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate name: {0}")]
    Duplicate(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A conditional update whose precondition failed (e.g. a status write
    /// against a row that no longer exists).
    #[error("no rows updated: {0}")]
    NoRowsUpdated(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Retryable backend failure.
    #[error("transient backend error: {0}")]
    Transient(String),

    #[error("internal store error: {0}")]
    Internal(String),
}

impl From<DomainError> for StoreError {
    fn from(e: DomainError) -> Self {
        StoreError::InvalidInput(e.to_string())
    }
}
