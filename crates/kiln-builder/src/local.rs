use std::time::Duration;

use async_trait::async_trait;
use kiln_domain::{ImageBuild, ImageExport};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::builder::{Builder, ImageArtifact, LogSink};
use crate::error::BuildError;

/// A stub builder that simulates the container tooling locally.
///
/// - Produces synthetic digests derived from the inputs.
/// - Emits a few representative log lines per step.
/// - Performs no actual I/O; each step just sleeps briefly, which keeps the
///   cancellation paths honest.
#[derive(Debug, Clone)]
pub struct LocalBuilder {
    step_delay: Duration,
}

impl LocalBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_step_delay(step_delay: Duration) -> Self {
        LocalBuilder { step_delay }
    }

    /// Sleep for one simulated work step, bailing out if canceled.
    async fn work(&self, cancel: &CancellationToken) -> Result<(), BuildError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(BuildError::Canceled),
            _ = tokio::time::sleep(self.step_delay) => Ok(()),
        }
    }
}

impl Default for LocalBuilder {
    fn default() -> Self {
        LocalBuilder { step_delay: Duration::from_millis(25) }
    }
}

fn synthetic_digest(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
    }
    format!("sha256:{:x}", hasher.finalize())
}

#[async_trait]
impl Builder for LocalBuilder {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn build_image(
        &self,
        build: &ImageBuild,
        logs: &LogSink,
        cancel: &CancellationToken,
    ) -> Result<ImageArtifact, BuildError> {
        debug!(name = %build.name(), "LocalBuilder: build_image");
        logs.line(format!("pulling base image {}", build.spec.source_image));
        self.work(cancel).await?;
        logs.line(format!("assembling image with {} binding", build.spec.binding));
        self.work(cancel).await?;
        let digest = synthetic_digest(&[build.name(), &build.spec.source_image]);
        logs.line(format!("built {digest}"));
        Ok(ImageArtifact { reference: build.spec.destination_image.clone(), digest })
    }

    async fn push_image(
        &self,
        build: &ImageBuild,
        artifact: &ImageArtifact,
        logs: &LogSink,
        cancel: &CancellationToken,
    ) -> Result<(), BuildError> {
        debug!(name = %build.name(), "LocalBuilder: push_image");
        logs.line(format!("pushing {} to {}", artifact.digest, build.spec.destination_image));
        self.work(cancel).await?;
        logs.line("push complete");
        Ok(())
    }

    async fn convert_image(
        &self,
        export: &ImageExport,
        source_image: &str,
        logs: &LogSink,
        cancel: &CancellationToken,
    ) -> Result<ImageArtifact, BuildError> {
        debug!(name = %export.name(), format = %export.spec.format, "LocalBuilder: convert_image");
        logs.line(format!("converting {source_image} to {}", export.spec.format));
        self.work(cancel).await?;
        let digest = synthetic_digest(&[export.name(), source_image]);
        logs.line(format!("converted {digest}"));
        Ok(ImageArtifact {
            reference: format!("{}.{}", export.spec.destination_image, export.spec.format),
            digest,
        })
    }

    async fn push_artifact(
        &self,
        export: &ImageExport,
        artifact: &ImageArtifact,
        logs: &LogSink,
        cancel: &CancellationToken,
    ) -> Result<(), BuildError> {
        debug!(name = %export.name(), "LocalBuilder: push_artifact");
        logs.line(format!("uploading {} to {}", artifact.reference, export.spec.destination_image));
        self.work(cancel).await?;
        logs.line("upload complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use kiln_domain::{BindingMode, ImageBuildSpec, Metadata, ResourceStatus};

    fn build(name: &str) -> ImageBuild {
        ImageBuild {
            metadata: Metadata::new(name, Utc::now()),
            spec: ImageBuildSpec {
                source_image: "quay.io/acme/base:9".into(),
                destination_image: "quay.io/acme/os:latest".into(),
                binding: BindingMode::Early,
                user_config: None,
            },
            status: ResourceStatus::default(),
            exports: None,
        }
    }

    #[tokio::test]
    async fn build_image_streams_logs_and_returns_digest() {
        let builder = LocalBuilder::with_step_delay(Duration::from_millis(1));
        let (sink, mut rx) = LogSink::pair();
        let cancel = CancellationToken::new();

        let artifact = builder.build_image(&build("b1"), &sink, &cancel).await.unwrap();
        assert!(artifact.digest.starts_with("sha256:"));
        assert_eq!(artifact.reference, "quay.io/acme/os:latest");

        let first = String::from_utf8(rx.recv().await.unwrap()).unwrap();
        assert!(first.contains("pulling base image"));
    }

    #[tokio::test]
    async fn canceled_token_aborts_the_step() {
        let builder = LocalBuilder::with_step_delay(Duration::from_secs(30));
        let (sink, _rx) = LogSink::pair();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = builder.build_image(&build("b1"), &sink, &cancel).await.unwrap_err();
        assert!(matches!(err, BuildError::Canceled));
    }

    #[tokio::test]
    async fn digests_are_deterministic_per_input() {
        let builder = LocalBuilder::with_step_delay(Duration::from_millis(1));
        let (sink, _rx) = LogSink::pair();
        let cancel = CancellationToken::new();

        let a = builder.build_image(&build("b1"), &sink, &cancel).await.unwrap();
        let b = builder.build_image(&build("b1"), &sink, &cancel).await.unwrap();
        let c = builder.build_image(&build("b2"), &sink, &cancel).await.unwrap();
        assert_eq!(a.digest, b.digest);
        assert_ne!(a.digest, c.digest);
    }
}
