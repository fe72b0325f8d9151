use kiln_bus::{BusError, StreamError};
use kiln_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Replacing the spec of a resource that a worker is actively driving is
    /// rejected; callers wait for a terminal state or delete the resource.
    #[error("resource '{0}' is active; wait for it to finish or delete it")]
    ResourceActive(String),

    #[error("event publish failed: {0}")]
    Bus(#[from] BusError),

    #[error("log stream error: {0}")]
    Stream(#[from] StreamError),
}
