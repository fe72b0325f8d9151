use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("invalid org id: {0}")]
    InvalidOrgId(String),

    #[error("invalid owner reference: {0}")]
    InvalidOwnerRef(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("unsupported field selector: {0}")]
    InvalidSelector(String),
}
