use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use kiln_builder::Builder;
use kiln_bus::{EventReceiver, LogStream};
use kiln_domain::{
    Condition, ImageBuild, ImageExport, LifecyclePhase, OrgId, ResourceKind,
};
use kiln_store::{GetOptions, StatusPatch, Store, StoreError};

use crate::config::EngineConfig;
use crate::registry::{TaskKey, TaskRegistry};
use crate::resolver;
use crate::service::ResourceService;
use crate::task::{self, TaskContext};

/// Single consumer of the event bus. For each event it loads the referenced
/// resource, routes on `(kind, current phase)`, and spawns the matching task
/// under the per-resource single-flight lock; duplicates are dropped. The
/// loop returns to reading immediately — tasks run in their own execution
/// units.
pub struct Dispatcher {
    service: Arc<ResourceService>,
    store: Arc<dyn Store>,
    builder: Arc<dyn Builder>,
    stream: Arc<dyn LogStream>,
    registry: Arc<TaskRegistry>,
    config: EngineConfig,
    shutdown: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        service: Arc<ResourceService>,
        store: Arc<dyn Store>,
        builder: Arc<dyn Builder>,
        stream: Arc<dyn LogStream>,
        registry: Arc<TaskRegistry>,
        config: EngineConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Dispatcher { service, store, builder, stream, registry, config, shutdown }
    }

    pub async fn run(self: Arc<Self>, mut events: EventReceiver) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                next = events.recv() => match next {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                },
            }
        }
        debug!("dispatcher stopped");
    }

    async fn handle_event(self: &Arc<Self>, event: kiln_bus::EventWithOrg) {
        let org = event.org_id;
        let name = event.event.name;
        match event.event.kind {
            ResourceKind::ImageBuild => self.handle_build_event(org, &name).await,
            ResourceKind::ImageExport => self.handle_export_event(org, &name).await,
        }
    }

    // ── ImageBuild admission ──────────────────────────────────────────────────

    async fn handle_build_event(self: &Arc<Self>, org: OrgId, name: &str) {
        let build = match self.store.get_build(&org, name, GetOptions::default()).await {
            Ok(build) => build,
            Err(StoreError::NotFound(_)) => {
                // Deleted between publish and dispatch.
                debug!(org_id = %org, name = %name, "build vanished; dropping event");
                return;
            }
            Err(e) => {
                warn!(org_id = %org, name = %name, error = %e, "failed to load build");
                return;
            }
        };

        match build.phase().unwrap_or(LifecyclePhase::Pending) {
            LifecyclePhase::Pending => self.spawn_build(org, build).await,
            LifecyclePhase::Canceling => {
                self.cancel(org, ResourceKind::ImageBuild, name).await;
            }
            LifecyclePhase::Completed => {
                resolver::fan_out(&self.service, &self.store, &org, name).await;
            }
            // Active states have a task in flight; Failed is terminal.
            _ => {}
        }
    }

    // ── ImageExport admission ─────────────────────────────────────────────────

    async fn handle_export_event(self: &Arc<Self>, org: OrgId, name: &str) {
        let export = match self.store.get_export(&org, name).await {
            Ok(export) => export,
            Err(StoreError::NotFound(_)) => {
                debug!(org_id = %org, name = %name, "export vanished; dropping event");
                return;
            }
            Err(e) => {
                warn!(org_id = %org, name = %name, error = %e, "failed to load export");
                return;
            }
        };

        match export.phase().unwrap_or(LifecyclePhase::Pending) {
            LifecyclePhase::Pending => {
                if let Some(build_ref) = export.spec.source.image_build_ref() {
                    if !self.build_completed(&org, build_ref).await {
                        // The resolver requeues this export when the build
                        // completes; until then it stays Pending.
                        debug!(
                            org_id = %org,
                            name = %name,
                            build = %build_ref,
                            "dependency not ready; leaving export Pending"
                        );
                        return;
                    }
                }
                self.spawn_export(org, export).await;
            }
            LifecyclePhase::Canceling => {
                self.cancel(org, ResourceKind::ImageExport, name).await;
            }
            _ => {}
        }
    }

    async fn build_completed(&self, org: &OrgId, name: &str) -> bool {
        match self.store.get_build(org, name, GetOptions::default()).await {
            Ok(build) => build.phase() == Some(LifecyclePhase::Completed),
            Err(StoreError::NotFound(_)) => false,
            Err(e) => {
                warn!(org_id = %org, build = %name, error = %e, "failed to check gate");
                false
            }
        }
    }

    // ── Task spawning ─────────────────────────────────────────────────────────

    fn task_context(&self, org: OrgId) -> TaskContext {
        TaskContext {
            service: self.service.clone(),
            store: self.store.clone(),
            builder: self.builder.clone(),
            stream: self.stream.clone(),
            config: self.config.clone(),
            org_id: org,
        }
    }

    async fn spawn_build(self: &Arc<Self>, org: OrgId, build: ImageBuild) {
        let key = TaskKey::new(org, ResourceKind::ImageBuild, build.name());
        let Some(token) = self.registry.try_claim(key.clone(), &self.shutdown).await else {
            debug!(key = %key, "task already running; dropping duplicate event");
            return;
        };
        let this = self.clone();
        tokio::spawn(async move {
            task::run_build(this.task_context(org), build, token).await;
            this.registry.release(&key).await;
        });
    }

    async fn spawn_export(self: &Arc<Self>, org: OrgId, export: ImageExport) {
        let key = TaskKey::new(org, ResourceKind::ImageExport, export.name());
        let Some(token) = self.registry.try_claim(key.clone(), &self.shutdown).await else {
            debug!(key = %key, "task already running; dropping duplicate event");
            return;
        };
        let this = self.clone();
        tokio::spawn(async move {
            task::run_export(this.task_context(org), export, token).await;
            this.registry.release(&key).await;
        });
    }

    // ── Cancellation ──────────────────────────────────────────────────────────

    /// Canceling state: signal the running task, which persists the final
    /// Failed condition itself. With no task to signal (the worker crashed or
    /// never started), drive the resource to Failed here, carrying the prior
    /// cause.
    async fn cancel(&self, org: OrgId, kind: ResourceKind, name: &str) {
        let key = TaskKey::new(org, kind, name);
        if self.registry.cancel(&key).await {
            debug!(key = %key, "cancellation signaled to running task");
            return;
        }

        let cause = self.canceling_message(&org, kind, name).await;
        let condition =
            Condition::for_phase(LifecyclePhase::Failed, format!("canceled: {cause}"));
        if let Err(e) = self
            .service
            .patch_status(&org, kind, name, StatusPatch::condition(condition))
            .await
        {
            warn!(org_id = %org, name = %name, error = %e, "failed to fail canceled resource");
        }
    }

    async fn canceling_message(&self, org: &OrgId, kind: ResourceKind, name: &str) -> String {
        let ready = match kind {
            ResourceKind::ImageBuild => self
                .store
                .get_build(org, name, GetOptions::default())
                .await
                .ok()
                .and_then(|b| b.status.ready().cloned()),
            ResourceKind::ImageExport => self
                .store
                .get_export(org, name)
                .await
                .ok()
                .and_then(|e| e.status.ready().cloned()),
        };
        ready
            .map(|c| c.message)
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| "task canceled".to_string())
    }
}
