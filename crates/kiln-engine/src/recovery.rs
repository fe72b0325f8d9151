use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use kiln_domain::{Condition, LifecyclePhase, ListParams, OrgId, ResourceKind};
use kiln_store::{StatusPatch, Store};

use crate::service::ResourceService;

/// Outcome of the one-shot startup scan.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RecoveryReport {
    /// Pending resources re-queued for dispatch.
    pub requeued: usize,
    /// In-progress resources failed because their worker state cannot be
    /// adopted mid-flight.
    pub failed: usize,
}

/// Post-boot recovery, run after the bus exists but before the dispatcher
/// consumes:
///
/// - Pending resources get a fresh `Created` event;
/// - resources in any active state are failed — build subprocesses and
///   partial uploads cannot be resumed by a new worker;
/// - terminal resources are left unchanged.
///
/// Per-resource errors are logged and swallowed; the scan always finishes.
pub async fn recover(service: &ResourceService, store: &Arc<dyn Store>) -> RecoveryReport {
    let mut report = RecoveryReport::default();
    let orgs = match store.org_ids().await {
        Ok(orgs) => orgs,
        Err(e) => {
            warn!(error = %e, "startup scan could not enumerate orgs");
            return report;
        }
    };

    for org in orgs {
        match store.list_builds(&org, ListParams::default()).await {
            Ok(list) => {
                for build in list.items {
                    recover_one(
                        service,
                        &org,
                        ResourceKind::ImageBuild,
                        build.name(),
                        build.phase(),
                        &mut report,
                    )
                    .await;
                }
            }
            Err(e) => warn!(org_id = %org, error = %e, "startup build scan failed"),
        }
        match store.list_exports(&org, ListParams::default()).await {
            Ok(list) => {
                for export in list.items {
                    recover_one(
                        service,
                        &org,
                        ResourceKind::ImageExport,
                        export.name(),
                        export.phase(),
                        &mut report,
                    )
                    .await;
                }
            }
            Err(e) => warn!(org_id = %org, error = %e, "startup export scan failed"),
        }
    }

    info!(requeued = report.requeued, failed = report.failed, "startup recovery finished");
    report
}

async fn recover_one(
    service: &ResourceService,
    org: &OrgId,
    kind: ResourceKind,
    name: &str,
    phase: Option<LifecyclePhase>,
    report: &mut RecoveryReport,
) {
    match phase.unwrap_or(LifecyclePhase::Pending) {
        LifecyclePhase::Pending => match service.requeue(org, kind, name).await {
            Ok(()) => report.requeued += 1,
            Err(e) => warn!(org_id = %org, name = %name, error = %e, "startup requeue failed"),
        },
        phase if phase.is_active() => {
            let condition = Condition::for_phase(
                LifecyclePhase::Failed,
                format!("{phase} was in progress on startup"),
            );
            match service
                .patch_status(org, kind, name, StatusPatch::condition(condition))
                .await
            {
                Ok(_) => report.failed += 1,
                Err(e) => warn!(org_id = %org, name = %name, error = %e, "startup fail-over failed"),
            }
        }
        _ => {} // terminal: leave unchanged
    }
}
