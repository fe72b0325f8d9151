use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    /// The cancellation signal fired before the step finished.
    #[error("canceled")]
    Canceled,

    #[error("build failed: {0}")]
    Failed(String),

    #[error("internal builder error: {0}")]
    Internal(String),
}
