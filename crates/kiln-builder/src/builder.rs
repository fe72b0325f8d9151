use async_trait::async_trait;
use kiln_domain::{ImageBuild, ImageExport};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::BuildError;

/// Result of a successful build or convert step.
#[derive(Debug, Clone)]
pub struct ImageArtifact {
    /// Reference to the produced artifact (image ref or object path).
    pub reference: String,
    /// Content digest, `sha256:<hex>`.
    pub digest: String,
}

/// Line-oriented handle a builder writes its process output through.
///
/// The receiving end is owned by the status updater; once it tears down,
/// writes are silently dropped, which is exactly the contract for log output
/// arriving after the final status write.
#[derive(Clone)]
pub struct LogSink {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl LogSink {
    pub fn new(tx: mpsc::UnboundedSender<Vec<u8>>) -> Self {
        LogSink { tx }
    }

    /// A sink plus the receiver that consumes it. Test convenience.
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (LogSink { tx }, rx)
    }

    pub fn write(&self, chunk: impl Into<Vec<u8>>) {
        let _ = self.tx.send(chunk.into());
    }

    pub fn line(&self, line: impl AsRef<str>) {
        self.write(format!("{}\n", line.as_ref()));
    }
}

/// External collaborator that produces and moves image bytes.
///
/// kiln never runs OCI tooling itself; a `Builder` implementation owns the
/// subprocesses, registries and object stores. Every step takes a
/// cancellation token and must return promptly (with
/// [`BuildError::Canceled`]) once it fires.
#[async_trait]
pub trait Builder: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Produce a bootable image from the build's base image and agent
    /// configuration, streaming subprocess output into `logs`.
    async fn build_image(
        &self,
        build: &ImageBuild,
        logs: &LogSink,
        cancel: &CancellationToken,
    ) -> Result<ImageArtifact, BuildError>;

    /// Upload a built image to the build's destination reference.
    async fn push_image(
        &self,
        build: &ImageBuild,
        artifact: &ImageArtifact,
        logs: &LogSink,
        cancel: &CancellationToken,
    ) -> Result<(), BuildError>;

    /// Convert `source_image` into the export's target format.
    async fn convert_image(
        &self,
        export: &ImageExport,
        source_image: &str,
        logs: &LogSink,
        cancel: &CancellationToken,
    ) -> Result<ImageArtifact, BuildError>;

    /// Upload a converted artifact to the export's destination.
    async fn push_artifact(
        &self,
        export: &ImageExport,
        artifact: &ImageArtifact,
        logs: &LogSink,
        cancel: &CancellationToken,
    ) -> Result<(), BuildError>;
}
