use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::debug;

use kiln_bus::{stream_key, EventBus, EventReason, EventWithOrg, LogStream};
use kiln_domain::{
    ExportSource, ImageBuild, ImageExport, ListParams, OrgId, OwnerRef, ResourceKind,
    ResourceList,
};
use kiln_store::{GetOptions, StatusPatch, Store, StoreError};

use crate::error::ServiceError;
use crate::registry::{TaskKey, TaskRegistry};

/// The CRUD facade over the store: validates, persists, publishes follow-up
/// events, and keeps the single-flight registry honest on deletes.
///
/// Every writer in the system (API handlers, tasks, watchdog, recovery) goes
/// through this service so that meaningful transitions always reach the bus.
pub struct ResourceService {
    store: Arc<dyn Store>,
    bus: Arc<dyn EventBus>,
    stream: Arc<dyn LogStream>,
    registry: Arc<TaskRegistry>,
}

/// Log material for one resource: the durable archive plus the live stream.
/// The archive and the stream backlog may overlap; callers tolerate that
/// rather than deduplicating by offset.
pub struct LogFetch {
    pub archived_tail: Option<String>,
    pub backlog: Vec<Vec<u8>>,
    pub live: Option<broadcast::Receiver<Vec<u8>>>,
}

impl ResourceService {
    pub fn new(
        store: Arc<dyn Store>,
        bus: Arc<dyn EventBus>,
        stream: Arc<dyn LogStream>,
        registry: Arc<TaskRegistry>,
    ) -> Self {
        ResourceService { store, bus, stream, registry }
    }

    async fn publish(
        &self,
        org: &OrgId,
        kind: ResourceKind,
        name: &str,
        reason: EventReason,
    ) -> Result<(), ServiceError> {
        self.bus
            .publish(EventWithOrg::new(*org, kind, name, reason))
            .await?;
        Ok(())
    }

    /// Re-publish a `Created` event, used by the dependency resolver and the
    /// startup recovery scan to requeue work.
    pub async fn requeue(
        &self,
        org: &OrgId,
        kind: ResourceKind,
        name: &str,
    ) -> Result<(), ServiceError> {
        self.publish(org, kind, name, EventReason::Created).await
    }

    // ── ImageBuild ────────────────────────────────────────────────────────────

    pub async fn create_build(
        &self,
        org: &OrgId,
        build: ImageBuild,
    ) -> Result<ImageBuild, ServiceError> {
        let created = self.store.create_build(org, build).await?;
        self.publish(org, ResourceKind::ImageBuild, created.name(), EventReason::Created)
            .await?;
        Ok(created)
    }

    pub async fn get_build(
        &self,
        org: &OrgId,
        name: &str,
        opts: GetOptions,
    ) -> Result<ImageBuild, ServiceError> {
        Ok(self.store.get_build(org, name, opts).await?)
    }

    pub async fn list_builds(
        &self,
        org: &OrgId,
        params: ListParams,
    ) -> Result<ResourceList<ImageBuild>, ServiceError> {
        Ok(self.store.list_builds(org, params).await?)
    }

    /// Replace the spec. Rejected while a worker is driving the resource.
    pub async fn replace_build(
        &self,
        org: &OrgId,
        build: ImageBuild,
    ) -> Result<ImageBuild, ServiceError> {
        let current = self
            .store
            .get_build(org, build.name(), GetOptions::default())
            .await?;
        if current.phase().is_some_and(|p| p.is_active()) {
            return Err(ServiceError::ResourceActive(build.metadata.name));
        }
        let updated = self.store.update_build(org, build).await?;
        self.publish(org, ResourceKind::ImageBuild, updated.name(), EventReason::Updated)
            .await?;
        Ok(updated)
    }

    /// Cascade delete: signals any running task for the build and its owned
    /// exports, then removes them atomically. Idempotent.
    pub async fn delete_build(
        &self,
        org: &OrgId,
        name: &str,
    ) -> Result<Option<ImageBuild>, ServiceError> {
        let current = match self
            .store
            .get_build(org, name, GetOptions::with_exports())
            .await
        {
            Ok(build) => build,
            Err(StoreError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        self.registry
            .cancel(&TaskKey::new(*org, ResourceKind::ImageBuild, name))
            .await;
        for export in current.exports.iter().flatten() {
            self.registry
                .cancel(&TaskKey::new(*org, ResourceKind::ImageExport, export.name()))
                .await;
        }
        Ok(self.store.delete_build(org, name).await?)
    }

    // ── ImageExport ───────────────────────────────────────────────────────────

    pub async fn create_export(
        &self,
        org: &OrgId,
        export: ImageExport,
    ) -> Result<ImageExport, ServiceError> {
        let created = self.store.create_export(org, export).await?;
        self.publish(org, ResourceKind::ImageExport, created.name(), EventReason::Created)
            .await?;
        Ok(created)
    }

    pub async fn get_export(
        &self,
        org: &OrgId,
        name: &str,
    ) -> Result<ImageExport, ServiceError> {
        Ok(self.store.get_export(org, name).await?)
    }

    pub async fn list_exports(
        &self,
        org: &OrgId,
        params: ListParams,
    ) -> Result<ResourceList<ImageExport>, ServiceError> {
        Ok(self.store.list_exports(org, params).await?)
    }

    pub async fn replace_export(
        &self,
        org: &OrgId,
        export: ImageExport,
    ) -> Result<ImageExport, ServiceError> {
        let current = self.store.get_export(org, export.name()).await?;
        if current.phase().is_some_and(|p| p.is_active()) {
            return Err(ServiceError::ResourceActive(export.metadata.name));
        }
        let updated = self.store.update_export(org, export).await?;
        self.publish(org, ResourceKind::ImageExport, updated.name(), EventReason::Updated)
            .await?;
        Ok(updated)
    }

    pub async fn delete_export(
        &self,
        org: &OrgId,
        name: &str,
    ) -> Result<Option<ImageExport>, ServiceError> {
        self.registry
            .cancel(&TaskKey::new(*org, ResourceKind::ImageExport, name))
            .await;
        Ok(self.store.delete_export(org, name).await?)
    }

    // ── Status writes ─────────────────────────────────────────────────────────

    /// Apply a status patch and publish `Updated` iff the condition merge
    /// changed something. Periodic log-tail flushes therefore generate no
    /// event traffic.
    pub async fn patch_status(
        &self,
        org: &OrgId,
        kind: ResourceKind,
        name: &str,
        patch: StatusPatch,
    ) -> Result<bool, ServiceError> {
        let changed = match kind {
            ResourceKind::ImageBuild => {
                self.store.update_build_status(org, name, patch).await?.1
            }
            ResourceKind::ImageExport => {
                self.store.update_export_status(org, name, patch).await?.1
            }
        };
        if changed {
            self.publish(org, kind, name, EventReason::Updated).await?;
        }
        Ok(changed)
    }

    pub async fn update_build_status(
        &self,
        org: &OrgId,
        name: &str,
        patch: StatusPatch,
    ) -> Result<ImageBuild, ServiceError> {
        let (updated, changed) = self.store.update_build_status(org, name, patch).await?;
        if changed {
            self.publish(org, ResourceKind::ImageBuild, name, EventReason::Updated)
                .await?;
        }
        Ok(updated)
    }

    pub async fn update_export_status(
        &self,
        org: &OrgId,
        name: &str,
        patch: StatusPatch,
    ) -> Result<ImageExport, ServiceError> {
        let (updated, changed) = self.store.update_export_status(org, name, patch).await?;
        if changed {
            self.publish(org, ResourceKind::ImageExport, name, EventReason::Updated)
                .await?;
        }
        Ok(updated)
    }

    pub async fn update_last_seen(
        &self,
        org: &OrgId,
        kind: ResourceKind,
        name: &str,
        at: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        Ok(self.store.update_last_seen(org, kind, name, at).await?)
    }

    // ── Pipelines ─────────────────────────────────────────────────────────────

    /// Atomic composite create. The export's source is rewritten to reference
    /// the build regardless of what the caller sent, and the export is owned
    /// by the build so deletes cascade.
    pub async fn create_pipeline(
        &self,
        org: &OrgId,
        build: ImageBuild,
        mut export: Option<ImageExport>,
    ) -> Result<(ImageBuild, Option<ImageExport>), ServiceError> {
        if let Some(export) = export.as_mut() {
            export.spec.source = ExportSource::ImageBuildRef {
                image_build_ref: build.metadata.name.clone(),
            };
            export.metadata.owner = Some(OwnerRef::image_build(&build.metadata.name));
        }
        let (build, export) = self.store.create_pipeline(org, build, export).await?;
        self.publish(org, ResourceKind::ImageBuild, build.name(), EventReason::Created)
            .await?;
        if let Some(export) = &export {
            self.publish(org, ResourceKind::ImageExport, export.name(), EventReason::Created)
                .await?;
        }
        Ok((build, export))
    }

    // ── Logs ──────────────────────────────────────────────────────────────────

    /// Archived tail plus live stream for a resource. `follow` additionally
    /// opens a live subscription; readers stop at the stream-complete
    /// sentinel.
    pub async fn fetch_logs(
        &self,
        org: &OrgId,
        kind: ResourceKind,
        name: &str,
        follow: bool,
    ) -> Result<LogFetch, ServiceError> {
        let archived_tail = match kind {
            ResourceKind::ImageBuild => {
                self.store
                    .get_build(org, name, GetOptions::default())
                    .await?
                    .status
                    .log_tail
            }
            ResourceKind::ImageExport => self.store.get_export(org, name).await?.status.log_tail,
        };
        let key = stream_key(kind, org, name);
        let backlog = self.stream.read(&key).await?;
        let live = if follow {
            Some(self.stream.subscribe(&key).await?)
        } else {
            None
        };
        debug!(org_id = %org, name = %name, chunks = backlog.len(), "fetched logs");
        Ok(LogFetch { archived_tail, backlog, live })
    }
}
