use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use kiln_domain::{
    set_condition, validate_name, Condition, ImageBuild, ImageExport, ListParams, Metadata, OrgId,
    ResourceKind, ResourceList, ResourceStatus,
};

use crate::error::StoreError;

// ── Operation options ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct GetOptions {
    /// Embed every ImageExport owned by the build, ordered by name.
    pub with_exports: bool,
}

impl GetOptions {
    pub fn with_exports() -> Self {
        GetOptions { with_exports: true }
    }
}

/// A status-only write. Conditions are merged with transition-time semantics;
/// `log_tail` and `last_seen` replace the stored value only when present, so
/// the cheap flush paths cannot clobber each other.
#[derive(Debug, Clone, Default)]
pub struct StatusPatch {
    pub conditions: Vec<Condition>,
    pub log_tail: Option<String>,
    pub last_seen: Option<DateTime<Utc>>,
}

impl StatusPatch {
    pub fn condition(condition: Condition) -> Self {
        StatusPatch { conditions: vec![condition], ..Default::default() }
    }

    pub fn with_log_tail(mut self, tail: impl Into<String>) -> Self {
        self.log_tail = Some(tail.into());
        self
    }

    pub fn with_last_seen(mut self, at: DateTime<Utc>) -> Self {
        self.last_seen = Some(at);
        self
    }
}

// ── Store trait ──────────────────────────────────────────────────────────────

/// Multi-tenant persistence for ImageBuild and ImageExport resources.
///
/// Every operation is org-scoped; no call returns rows from another org.
/// Writes are transactional, and condition merges run under a row-level lock
/// so concurrent status writers linearize.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    // ── ImageBuild ────────────────────────────────────────────────────────────

    async fn create_build(&self, org: &OrgId, build: ImageBuild)
        -> Result<ImageBuild, StoreError>;

    async fn get_build(
        &self,
        org: &OrgId,
        name: &str,
        opts: GetOptions,
    ) -> Result<ImageBuild, StoreError>;

    async fn list_builds(
        &self,
        org: &OrgId,
        params: ListParams,
    ) -> Result<ResourceList<ImageBuild>, StoreError>;

    /// Replace the spec. Bumps `generation` iff the canonical spec bytes
    /// differ; bumps `resourceVersion` unconditionally; never touches status.
    async fn update_build(&self, org: &OrgId, build: ImageBuild)
        -> Result<ImageBuild, StoreError>;

    /// Apply a status patch. Returns the stored resource and whether the
    /// condition merge changed anything. Never touches `generation`.
    async fn update_build_status(
        &self,
        org: &OrgId,
        name: &str,
        patch: StatusPatch,
    ) -> Result<(ImageBuild, bool), StoreError>;

    /// Delete a build and, atomically first, every export it owns.
    /// Deleting an absent name returns `Ok(None)`.
    async fn delete_build(&self, org: &OrgId, name: &str)
        -> Result<Option<ImageBuild>, StoreError>;

    // ── ImageExport ───────────────────────────────────────────────────────────

    async fn create_export(
        &self,
        org: &OrgId,
        export: ImageExport,
    ) -> Result<ImageExport, StoreError>;

    async fn get_export(&self, org: &OrgId, name: &str) -> Result<ImageExport, StoreError>;

    async fn list_exports(
        &self,
        org: &OrgId,
        params: ListParams,
    ) -> Result<ResourceList<ImageExport>, StoreError>;

    async fn update_export(
        &self,
        org: &OrgId,
        export: ImageExport,
    ) -> Result<ImageExport, StoreError>;

    async fn update_export_status(
        &self,
        org: &OrgId,
        name: &str,
        patch: StatusPatch,
    ) -> Result<(ImageExport, bool), StoreError>;

    async fn delete_export(
        &self,
        org: &OrgId,
        name: &str,
    ) -> Result<Option<ImageExport>, StoreError>;

    // ── Shared ────────────────────────────────────────────────────────────────

    /// Liveness heartbeat: writes only `status.lastSeen`, outside the
    /// condition merge and outside resource versioning — it is a single
    /// cheap statement, not a versioned update.
    async fn update_last_seen(
        &self,
        org: &OrgId,
        kind: ResourceKind,
        name: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Create a build plus an optional export in one transaction; any failure
    /// on either resource rolls back both.
    async fn create_pipeline(
        &self,
        org: &OrgId,
        build: ImageBuild,
        export: Option<ImageExport>,
    ) -> Result<(ImageBuild, Option<ImageExport>), StoreError>;

    /// Every org with at least one resource. Used by the startup scan and the
    /// watchdog.
    async fn org_ids(&self) -> Result<Vec<OrgId>, StoreError>;
}

// ── Canonical spec hash ──────────────────────────────────────────────────────

/// SHA-256 of the canonical JSON (object keys sorted) of a spec. Spec
/// replacement bumps `generation` only when this digest changes.
pub fn compute_spec_hash<T: Serialize>(spec: &T) -> String {
    let v = serde_json::to_value(spec).unwrap_or(serde_json::Value::Null);
    let canonical = sort_json_keys(v);
    let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
    format!("{:x}", Sha256::digest(&bytes))
}

fn sort_json_keys(v: serde_json::Value) -> serde_json::Value {
    match v {
        serde_json::Value::Object(map) => {
            let sorted: std::collections::BTreeMap<String, serde_json::Value> =
                map.into_iter().map(|(k, v)| (k, sort_json_keys(v))).collect();
            serde_json::Value::Object(sorted.into_iter().collect())
        }
        serde_json::Value::Array(arr) => {
            serde_json::Value::Array(arr.into_iter().map(sort_json_keys).collect())
        }
        other => other,
    }
}

// ── Shared create/merge mechanics (both backends) ────────────────────────────

pub(crate) fn seeded_status() -> ResourceStatus {
    let mut status = ResourceStatus::default();
    set_condition(
        &mut status.conditions,
        Condition::for_phase(kiln_domain::LifecyclePhase::Pending, "Waiting to be processed"),
    );
    status
}

/// Validate and normalize a caller-supplied build for creation.
pub(crate) fn normalize_new_build(
    mut build: ImageBuild,
    now: DateTime<Utc>,
) -> Result<ImageBuild, StoreError> {
    validate_name(&build.metadata.name)?;
    build.spec.validate()?;
    let owner = build.metadata.owner.take();
    build.metadata = Metadata::new(build.metadata.name.clone(), now);
    build.metadata.owner = owner;
    build.status = seeded_status();
    build.exports = None;
    Ok(build)
}

pub(crate) fn normalize_new_export(
    mut export: ImageExport,
    now: DateTime<Utc>,
) -> Result<ImageExport, StoreError> {
    validate_name(&export.metadata.name)?;
    export.spec.validate()?;
    let owner = export.metadata.owner.take();
    export.metadata = Metadata::new(export.metadata.name.clone(), now);
    export.metadata.owner = owner;
    export.status = seeded_status();
    Ok(export)
}

/// Merge a status patch into a stored status. Returns true iff the condition
/// merge changed anything.
pub(crate) fn apply_status_patch(status: &mut ResourceStatus, patch: StatusPatch) -> bool {
    let mut changed = false;
    for condition in patch.conditions {
        changed |= set_condition(&mut status.conditions, condition);
    }
    if let Some(tail) = patch.log_tail {
        status.log_tail = Some(tail);
    }
    if let Some(at) = patch.last_seen {
        status.last_seen = Some(at);
    }
    changed
}

/// Apply name-cursor paging to an already filtered, name-ordered item set.
pub(crate) fn paginate<T, F: Fn(&T) -> &str>(
    items: Vec<T>,
    params: &ListParams,
    name_of: F,
) -> ResourceList<T> {
    let mut items: Vec<T> = match &params.continue_token {
        Some(token) => items.into_iter().filter(|i| name_of(i) > token.as_str()).collect(),
        None => items,
    };
    let mut next = None;
    if let Some(limit) = params.limit {
        if items.len() > limit {
            items.truncate(limit);
            next = items.last().map(|i| name_of(i).to_string());
        }
    }
    ResourceList::new(items, next)
}
