use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use kiln_builder::{BuildError, Builder, LogSink};
use kiln_bus::LogStream;
use kiln_domain::{
    Condition, ExportSource, ImageBuild, ImageExport, LifecyclePhase, OrgId, ResourceKind,
};
use kiln_store::{GetOptions, Store};

use crate::config::EngineConfig;
use crate::service::ResourceService;
use crate::status::StatusUpdater;

/// Everything a task body needs; one per spawned task.
pub(crate) struct TaskContext {
    pub service: Arc<ResourceService>,
    pub store: Arc<dyn Store>,
    pub builder: Arc<dyn Builder>,
    pub stream: Arc<dyn LogStream>,
    pub config: EngineConfig,
    pub org_id: OrgId,
}

/// Drive one ImageBuild: Building → Pushing → Completed, or Failed on error
/// or cancellation. The final condition write is bounded by the cancel grace
/// window; if the process dies before it lands, the startup scan fails the
/// resource on next boot.
pub(crate) async fn run_build(ctx: TaskContext, build: ImageBuild, cancel: CancellationToken) {
    let name = build.metadata.name.clone();
    let generation = build.metadata.generation;
    let updater = StatusUpdater::spawn(
        ctx.service.clone(),
        ctx.stream.clone(),
        ctx.org_id,
        ResourceKind::ImageBuild,
        name.clone(),
        ctx.config.clone(),
    );
    let sink = updater.sink();

    let outcome = drive_build(&ctx, &build, &updater, &sink, &cancel).await;
    let condition = final_condition(&ctx, ResourceKind::ImageBuild, &name, generation, outcome).await;
    finalize_within_grace(&ctx, updater, condition).await;
    info!(org_id = %ctx.org_id, name = %name, "build task finished");
}

async fn drive_build(
    ctx: &TaskContext,
    build: &ImageBuild,
    updater: &StatusUpdater,
    sink: &LogSink,
    cancel: &CancellationToken,
) -> Result<(), BuildError> {
    let generation = build.metadata.generation;
    updater.update_condition(
        Condition::for_phase(LifecyclePhase::Building, "building image")
            .with_observed_generation(generation),
    );
    let artifact = ctx.builder.build_image(build, sink, cancel).await?;

    updater.update_condition(
        Condition::for_phase(LifecyclePhase::Pushing, "pushing image")
            .with_observed_generation(generation),
    );
    ctx.builder.push_image(build, &artifact, sink, cancel).await?;
    sink.line(format!("image available at {}", artifact.reference));
    Ok(())
}

/// Drive one ImageExport: Converting → Pushing → Completed, or Failed. The
/// dispatcher has already resolved the completion gate; this body only
/// resolves the source reference into a concrete image.
pub(crate) async fn run_export(ctx: TaskContext, export: ImageExport, cancel: CancellationToken) {
    let name = export.metadata.name.clone();
    let generation = export.metadata.generation;
    let updater = StatusUpdater::spawn(
        ctx.service.clone(),
        ctx.stream.clone(),
        ctx.org_id,
        ResourceKind::ImageExport,
        name.clone(),
        ctx.config.clone(),
    );
    let sink = updater.sink();

    let outcome = drive_export(&ctx, &export, &updater, &sink, &cancel).await;
    let condition =
        final_condition(&ctx, ResourceKind::ImageExport, &name, generation, outcome).await;
    finalize_within_grace(&ctx, updater, condition).await;
    info!(org_id = %ctx.org_id, name = %name, "export task finished");
}

async fn drive_export(
    ctx: &TaskContext,
    export: &ImageExport,
    updater: &StatusUpdater,
    sink: &LogSink,
    cancel: &CancellationToken,
) -> Result<(), BuildError> {
    let generation = export.metadata.generation;
    let source_image = match &export.spec.source {
        ExportSource::Image { image } => image.clone(),
        ExportSource::ImageBuildRef { image_build_ref } => {
            let build = ctx
                .store
                .get_build(&ctx.org_id, image_build_ref, GetOptions::default())
                .await
                .map_err(|e| {
                    BuildError::Failed(format!("source build '{image_build_ref}': {e}"))
                })?;
            build.spec.destination_image
        }
    };

    updater.update_condition(
        Condition::for_phase(LifecyclePhase::Converting, "converting image")
            .with_observed_generation(generation),
    );
    let artifact = ctx
        .builder
        .convert_image(export, &source_image, sink, cancel)
        .await?;

    updater.update_condition(
        Condition::for_phase(LifecyclePhase::Pushing, "pushing artifact")
            .with_observed_generation(generation),
    );
    ctx.builder.push_artifact(export, &artifact, sink, cancel).await?;
    sink.line(format!("artifact available at {}", artifact.reference));
    Ok(())
}

// ── Shared terminal handling ─────────────────────────────────────────────────

async fn final_condition(
    ctx: &TaskContext,
    kind: ResourceKind,
    name: &str,
    generation: i64,
    outcome: Result<(), BuildError>,
) -> Condition {
    let condition = match outcome {
        Ok(()) => Condition::for_phase(LifecyclePhase::Completed, "work completed"),
        Err(BuildError::Canceled) => {
            let cause = cancel_cause(ctx, kind, name).await;
            Condition::for_phase(LifecyclePhase::Failed, format!("canceled: {cause}"))
        }
        Err(e) => Condition::for_phase(LifecyclePhase::Failed, e.to_string()),
    };
    condition.with_observed_generation(generation)
}

/// The message the cancel initiator left on the Canceling condition, e.g.
/// "timed out" from the watchdog. Falls back to a generic cause when the
/// signal came from shutdown or the resource is already gone.
async fn cancel_cause(ctx: &TaskContext, kind: ResourceKind, name: &str) -> String {
    let ready = match kind {
        ResourceKind::ImageBuild => ctx
            .store
            .get_build(&ctx.org_id, name, GetOptions::default())
            .await
            .ok()
            .and_then(|b| b.status.ready().cloned()),
        ResourceKind::ImageExport => ctx
            .store
            .get_export(&ctx.org_id, name)
            .await
            .ok()
            .and_then(|e| e.status.ready().cloned()),
    };
    match ready {
        Some(c) if c.reason == LifecyclePhase::Canceling.as_str() && !c.message.is_empty() => {
            c.message
        }
        _ => "task canceled".to_string(),
    }
}

async fn finalize_within_grace(ctx: &TaskContext, updater: StatusUpdater, condition: Condition) {
    if tokio::time::timeout(ctx.config.cancel_grace, updater.finalize(condition))
        .await
        .is_err()
    {
        // The startup scan will fail the resource on next boot.
        warn!(org_id = %ctx.org_id, "final status write did not land within the grace window");
    }
}
