use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kiln_domain::{
    ImageBuild, ImageExport, ListParams, OrgId, OwnerRef, ResourceKind, ResourceList,
};
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::store::{
    apply_status_patch, compute_spec_hash, normalize_new_build, normalize_new_export, paginate,
    GetOptions, StatusPatch, Store,
};

#[derive(Debug, Default)]
struct OrgData {
    builds: BTreeMap<String, ImageBuild>,
    exports: BTreeMap<String, ImageExport>,
}

#[derive(Debug, Default)]
struct Inner {
    orgs: HashMap<OrgId, OrgData>,
}

/// In-memory implementation of [`Store`].
///
/// All data is lost on process exit. One mutex guards the whole world, which
/// gives every operation transaction semantics and serializes condition
/// merges the way the Postgres row lock does. Suitable for tests and local
/// runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn owned_exports(data: &OrgData, build_name: &str) -> Vec<ImageExport> {
    let owner = OwnerRef::image_build(build_name);
    data.exports
        .values()
        .filter(|e| e.metadata.owner.as_ref() == Some(&owner))
        .cloned()
        .collect()
}

#[async_trait]
impl Store for InMemoryStore {
    // ── ImageBuild ────────────────────────────────────────────────────────────

    async fn create_build(
        &self,
        org: &OrgId,
        build: ImageBuild,
    ) -> Result<ImageBuild, StoreError> {
        let build = normalize_new_build(build, Utc::now())?;
        let mut guard = self.inner.lock().await;
        let data = guard.orgs.entry(*org).or_default();
        if data.builds.contains_key(build.name()) {
            return Err(StoreError::Duplicate(build.metadata.name));
        }
        data.builds.insert(build.metadata.name.clone(), build.clone());
        Ok(build)
    }

    async fn get_build(
        &self,
        org: &OrgId,
        name: &str,
        opts: GetOptions,
    ) -> Result<ImageBuild, StoreError> {
        let guard = self.inner.lock().await;
        let Some(data) = guard.orgs.get(org) else {
            return Err(StoreError::NotFound(name.to_string()));
        };
        let mut build = data
            .builds
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        if opts.with_exports {
            build.exports = Some(owned_exports(data, name));
        }
        Ok(build)
    }

    async fn list_builds(
        &self,
        org: &OrgId,
        params: ListParams,
    ) -> Result<ResourceList<ImageBuild>, StoreError> {
        let guard = self.inner.lock().await;
        let items: Vec<ImageBuild> = guard
            .orgs
            .get(org)
            .map(|d| {
                d.builds
                    .values()
                    .filter(|b| params.selector.as_ref().map_or(true, |s| s.matches_build(b)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(paginate(items, &params, |b| &b.metadata.name))
    }

    async fn update_build(
        &self,
        org: &OrgId,
        build: ImageBuild,
    ) -> Result<ImageBuild, StoreError> {
        build.spec.validate()?;
        let mut guard = self.inner.lock().await;
        let existing = guard
            .orgs
            .get_mut(org)
            .and_then(|d| d.builds.get_mut(build.name()))
            .ok_or_else(|| StoreError::NotFound(build.metadata.name.clone()))?;
        if compute_spec_hash(&existing.spec) != compute_spec_hash(&build.spec) {
            existing.metadata.generation += 1;
        }
        existing.spec = build.spec;
        existing.metadata.resource_version.bump();
        Ok(existing.clone())
    }

    async fn update_build_status(
        &self,
        org: &OrgId,
        name: &str,
        patch: StatusPatch,
    ) -> Result<(ImageBuild, bool), StoreError> {
        let mut guard = self.inner.lock().await;
        let existing = guard
            .orgs
            .get_mut(org)
            .and_then(|d| d.builds.get_mut(name))
            .ok_or_else(|| StoreError::NoRowsUpdated(name.to_string()))?;
        let changed = apply_status_patch(&mut existing.status, patch);
        existing.metadata.resource_version.bump();
        Ok((existing.clone(), changed))
    }

    async fn delete_build(
        &self,
        org: &OrgId,
        name: &str,
    ) -> Result<Option<ImageBuild>, StoreError> {
        let mut guard = self.inner.lock().await;
        let Some(data) = guard.orgs.get_mut(org) else {
            return Ok(None);
        };
        let Some(prior) = data.builds.remove(name) else {
            return Ok(None);
        };
        let owner = OwnerRef::image_build(name);
        data.exports.retain(|_, e| e.metadata.owner.as_ref() != Some(&owner));
        Ok(Some(prior))
    }

    // ── ImageExport ───────────────────────────────────────────────────────────

    async fn create_export(
        &self,
        org: &OrgId,
        export: ImageExport,
    ) -> Result<ImageExport, StoreError> {
        let export = normalize_new_export(export, Utc::now())?;
        let mut guard = self.inner.lock().await;
        let data = guard.orgs.entry(*org).or_default();
        if data.exports.contains_key(export.name()) {
            return Err(StoreError::Duplicate(export.metadata.name));
        }
        data.exports.insert(export.metadata.name.clone(), export.clone());
        Ok(export)
    }

    async fn get_export(&self, org: &OrgId, name: &str) -> Result<ImageExport, StoreError> {
        let guard = self.inner.lock().await;
        guard
            .orgs
            .get(org)
            .and_then(|d| d.exports.get(name))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    async fn list_exports(
        &self,
        org: &OrgId,
        params: ListParams,
    ) -> Result<ResourceList<ImageExport>, StoreError> {
        let guard = self.inner.lock().await;
        let items: Vec<ImageExport> = guard
            .orgs
            .get(org)
            .map(|d| {
                d.exports
                    .values()
                    .filter(|e| params.selector.as_ref().map_or(true, |s| s.matches_export(e)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(paginate(items, &params, |e| &e.metadata.name))
    }

    async fn update_export(
        &self,
        org: &OrgId,
        export: ImageExport,
    ) -> Result<ImageExport, StoreError> {
        export.spec.validate()?;
        let mut guard = self.inner.lock().await;
        let existing = guard
            .orgs
            .get_mut(org)
            .and_then(|d| d.exports.get_mut(export.name()))
            .ok_or_else(|| StoreError::NotFound(export.metadata.name.clone()))?;
        if compute_spec_hash(&existing.spec) != compute_spec_hash(&export.spec) {
            existing.metadata.generation += 1;
        }
        existing.spec = export.spec;
        existing.metadata.resource_version.bump();
        Ok(existing.clone())
    }

    async fn update_export_status(
        &self,
        org: &OrgId,
        name: &str,
        patch: StatusPatch,
    ) -> Result<(ImageExport, bool), StoreError> {
        let mut guard = self.inner.lock().await;
        let existing = guard
            .orgs
            .get_mut(org)
            .and_then(|d| d.exports.get_mut(name))
            .ok_or_else(|| StoreError::NoRowsUpdated(name.to_string()))?;
        let changed = apply_status_patch(&mut existing.status, patch);
        existing.metadata.resource_version.bump();
        Ok((existing.clone(), changed))
    }

    async fn delete_export(
        &self,
        org: &OrgId,
        name: &str,
    ) -> Result<Option<ImageExport>, StoreError> {
        let mut guard = self.inner.lock().await;
        Ok(guard.orgs.get_mut(org).and_then(|d| d.exports.remove(name)))
    }

    // ── Shared ────────────────────────────────────────────────────────────────

    async fn update_last_seen(
        &self,
        org: &OrgId,
        kind: ResourceKind,
        name: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().await;
        let data = guard
            .orgs
            .get_mut(org)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        match kind {
            ResourceKind::ImageBuild => {
                let build = data
                    .builds
                    .get_mut(name)
                    .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
                build.status.last_seen = Some(at);
            }
            ResourceKind::ImageExport => {
                let export = data
                    .exports
                    .get_mut(name)
                    .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
                export.status.last_seen = Some(at);
            }
        }
        Ok(())
    }

    async fn create_pipeline(
        &self,
        org: &OrgId,
        build: ImageBuild,
        export: Option<ImageExport>,
    ) -> Result<(ImageBuild, Option<ImageExport>), StoreError> {
        // Validate both before touching the maps so a failure on either
        // resource leaves nothing behind.
        let now = Utc::now();
        let build = normalize_new_build(build, now)?;
        let export = export.map(|e| normalize_new_export(e, now)).transpose()?;

        let mut guard = self.inner.lock().await;
        let data = guard.orgs.entry(*org).or_default();
        if data.builds.contains_key(build.name()) {
            return Err(StoreError::Duplicate(build.metadata.name));
        }
        if let Some(export) = &export {
            if data.exports.contains_key(export.name()) {
                return Err(StoreError::Duplicate(export.metadata.name.clone()));
            }
        }
        data.builds.insert(build.metadata.name.clone(), build.clone());
        if let Some(export) = &export {
            data.exports.insert(export.metadata.name.clone(), export.clone());
        }
        Ok((build, export))
    }

    async fn org_ids(&self) -> Result<Vec<OrgId>, StoreError> {
        let guard = self.inner.lock().await;
        Ok(guard
            .orgs
            .iter()
            .filter(|(_, d)| !d.builds.is_empty() || !d.exports.is_empty())
            .map(|(org, _)| *org)
            .collect())
    }
}
