use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use kiln_domain::{
    Condition, FieldSelector, LifecyclePhase, ListParams, OrgId, ResourceKind,
};
use kiln_store::{StatusPatch, Store};

use crate::config::EngineConfig;
use crate::service::ResourceService;

/// States a worker should be heartbeating from. Canceling is excluded here:
/// a stale Canceling resource is finished off by the startup scan instead.
const WATCHED_PHASES: [LifecyclePhase; 3] = [
    LifecyclePhase::Building,
    LifecyclePhase::Converting,
    LifecyclePhase::Pushing,
];

/// Periodic scan that detects active resources whose liveness heartbeat went
/// stale and marks them Canceling rather than Failed, so the cancel path
/// still runs graceful cleanup. Pending resources are excluded: no worker
/// owns them, so timeout does not apply.
pub struct TimeoutWatchdog {
    service: Arc<ResourceService>,
    store: Arc<dyn Store>,
    config: EngineConfig,
    shutdown: CancellationToken,
}

impl TimeoutWatchdog {
    pub fn new(
        service: Arc<ResourceService>,
        store: Arc<dyn Store>,
        config: EngineConfig,
        shutdown: CancellationToken,
    ) -> Self {
        TimeoutWatchdog { service, store, config, shutdown }
    }

    pub async fn run(self) {
        let mut tick = tokio::time::interval(self.config.watchdog_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tick.tick().await; // immediate first tick; scanning at boot is recovery's job
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tick.tick() => {
                    self.run_once().await;
                }
            }
        }
    }

    /// One full scan across orgs. Returns how many resources were marked
    /// Canceling; per-resource errors are logged and swallowed.
    pub async fn run_once(&self) -> usize {
        let orgs = match self.store.org_ids().await {
            Ok(orgs) => orgs,
            Err(e) => {
                warn!(error = %e, "watchdog could not enumerate orgs");
                return 0;
            }
        };
        let mut marked = 0;
        for org in orgs {
            marked += self.scan_org(&org).await;
        }
        if marked > 0 {
            info!(marked, "watchdog canceled stale resources");
        }
        marked
    }

    async fn scan_org(&self, org: &OrgId) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.task_timeout)
                .unwrap_or_else(|_| chrono::Duration::seconds(600));
        let selector = FieldSelector::default()
            .with_phase_in(WATCHED_PHASES.to_vec())
            .with_last_seen_before(cutoff);
        let mut marked = 0;

        match self
            .store
            .list_builds(org, ListParams::with_selector(selector.clone()))
            .await
        {
            Ok(list) => {
                for build in list.items {
                    if self.mark(org, ResourceKind::ImageBuild, build.name()).await {
                        marked += 1;
                    }
                }
            }
            Err(e) => warn!(org_id = %org, error = %e, "watchdog build scan failed"),
        }

        match self
            .store
            .list_exports(org, ListParams::with_selector(selector))
            .await
        {
            Ok(list) => {
                for export in list.items {
                    if self.mark(org, ResourceKind::ImageExport, export.name()).await {
                        marked += 1;
                    }
                }
            }
            Err(e) => warn!(org_id = %org, error = %e, "watchdog export scan failed"),
        }

        marked
    }

    async fn mark(&self, org: &OrgId, kind: ResourceKind, name: &str) -> bool {
        let condition = Condition::for_phase(LifecyclePhase::Canceling, "timed out");
        match self
            .service
            .patch_status(org, kind, name, StatusPatch::condition(condition))
            .await
        {
            Ok(_) => {
                info!(org_id = %org, kind = %kind, name = %name, "marked timed-out resource Canceling");
                true
            }
            Err(e) => {
                warn!(org_id = %org, kind = %kind, name = %name, error = %e, "watchdog mark failed");
                false
            }
        }
    }
}
