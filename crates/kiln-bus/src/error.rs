use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("event bus is closed")]
    Closed,

    #[error("the bus already has a consumer")]
    ConsumerAttached,
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("log stream is closed")]
    Closed,

    #[error("internal stream error: {0}")]
    Internal(String),
}
