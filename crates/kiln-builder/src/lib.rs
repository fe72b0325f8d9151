pub mod builder;
pub mod error;
pub mod local;

pub use builder::{Builder, ImageArtifact, LogSink};
pub use error::BuildError;
pub use local::LocalBuilder;
