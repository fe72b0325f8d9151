use std::sync::Arc;

use tracing::{debug, warn};

use kiln_domain::{FieldSelector, LifecyclePhase, ListParams, OrgId, ResourceKind};
use kiln_store::Store;

use crate::service::ResourceService;

/// Fan a completed ImageBuild out to the exports gated on it.
///
/// One selector query finds same-org exports with
/// `spec.source.imageBuildRef = build_name`; each whose Ready condition is
/// absent or still Pending gets a synthetic `Created` event. Active and
/// terminal exports are left alone, as are exports behind a build that ended
/// any other way. Per-export errors are swallowed; the count of requeued
/// exports is returned for observability.
pub(crate) async fn fan_out(
    service: &ResourceService,
    store: &Arc<dyn Store>,
    org: &OrgId,
    build_name: &str,
) -> usize {
    let params = ListParams::with_selector(FieldSelector::image_build_ref_eq(build_name));
    let exports = match store.list_exports(org, params).await {
        Ok(list) => list.items,
        Err(e) => {
            warn!(org_id = %org, build = %build_name, error = %e, "resolver list failed");
            return 0;
        }
    };

    let mut requeued = 0;
    for export in exports {
        match export.phase() {
            None | Some(LifecyclePhase::Pending) => {
                match service
                    .requeue(org, ResourceKind::ImageExport, export.name())
                    .await
                {
                    Ok(()) => requeued += 1,
                    Err(e) => {
                        warn!(org_id = %org, export = %export.name(), error = %e, "requeue failed")
                    }
                }
            }
            Some(_) => {}
        }
    }
    if requeued > 0 {
        debug!(org_id = %org, build = %build_name, requeued, "resolver requeued gated exports");
    }
    requeued
}
