use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::types::{ImageBuild, ImageExport, LifecyclePhase};

// ── Field selectors ──────────────────────────────────────────────────────────

const IMAGE_BUILD_REF_FIELD: &str = "spec.source.imageBuildRef";

/// A conjunction of field predicates a list query filters on.
///
/// The API surface parses the `spec.source.imageBuildRef` equality and
/// set-membership forms; the phase and liveness predicates are built
/// programmatically by the watchdog.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldSelector {
    pub image_build_ref_in: Option<Vec<String>>,
    pub phase_in: Option<Vec<LifecyclePhase>>,
    pub last_seen_before: Option<DateTime<Utc>>,
}

impl FieldSelector {
    pub fn image_build_ref_eq(name: impl Into<String>) -> Self {
        FieldSelector {
            image_build_ref_in: Some(vec![name.into()]),
            ..Default::default()
        }
    }

    pub fn with_phase_in(mut self, phases: Vec<LifecyclePhase>) -> Self {
        self.phase_in = Some(phases);
        self
    }

    pub fn with_last_seen_before(mut self, cutoff: DateTime<Utc>) -> Self {
        self.last_seen_before = Some(cutoff);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.image_build_ref_in.is_none()
            && self.phase_in.is_none()
            && self.last_seen_before.is_none()
    }

    /// Parse the query-string form: `spec.source.imageBuildRef=<v>` or
    /// `spec.source.imageBuildRef in (a,b)`.
    pub fn parse(input: &str) -> Result<Self, DomainError> {
        let input = input.trim();
        if let Some(rest) = input.strip_prefix(IMAGE_BUILD_REF_FIELD) {
            let rest = rest.trim_start();
            if let Some(value) = rest.strip_prefix('=') {
                let value = value.trim();
                if value.is_empty() {
                    return Err(DomainError::InvalidSelector(input.to_string()));
                }
                return Ok(FieldSelector::image_build_ref_eq(value));
            }
            if let Some(set) = rest.strip_prefix("in") {
                let set = set
                    .trim()
                    .strip_prefix('(')
                    .and_then(|s| s.strip_suffix(')'))
                    .ok_or_else(|| DomainError::InvalidSelector(input.to_string()))?;
                let values: Vec<String> = set
                    .split(',')
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
                    .collect();
                if values.is_empty() {
                    return Err(DomainError::InvalidSelector(input.to_string()));
                }
                return Ok(FieldSelector {
                    image_build_ref_in: Some(values),
                    ..Default::default()
                });
            }
        }
        Err(DomainError::InvalidSelector(input.to_string()))
    }

    pub fn matches_build(&self, build: &ImageBuild) -> bool {
        // Builds have no spec.source.imageBuildRef; a ref predicate excludes them.
        if self.image_build_ref_in.is_some() {
            return false;
        }
        self.matches_status(build.phase(), build.status.last_seen)
    }

    pub fn matches_export(&self, export: &ImageExport) -> bool {
        if let Some(refs) = &self.image_build_ref_in {
            match export.spec.source.image_build_ref() {
                Some(r) if refs.iter().any(|v| v == r) => {}
                _ => return false,
            }
        }
        self.matches_status(export.phase(), export.status.last_seen)
    }

    fn matches_status(
        &self,
        phase: Option<LifecyclePhase>,
        last_seen: Option<DateTime<Utc>>,
    ) -> bool {
        if let Some(phases) = &self.phase_in {
            match phase {
                Some(p) if phases.contains(&p) => {}
                _ => return false,
            }
        }
        if let Some(cutoff) = self.last_seen_before {
            match last_seen {
                Some(t) if t < cutoff => {}
                _ => return false,
            }
        }
        true
    }
}

// ── List paging ──────────────────────────────────────────────────────────────

/// Cursor semantics: `WHERE name > continue ORDER BY name LIMIT limit`.
#[derive(Debug, Clone, Default)]
pub struct ListParams {
    pub limit: Option<usize>,
    pub continue_token: Option<String>,
    pub selector: Option<FieldSelector>,
}

impl ListParams {
    pub fn with_selector(selector: FieldSelector) -> Self {
        ListParams { selector: Some(selector), ..Default::default() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceList<T> {
    pub items: Vec<T>,
    /// Opaque cursor for the next page, when one may exist.
    #[serde(rename = "continue", default, skip_serializing_if = "Option::is_none")]
    pub next_continue: Option<String>,
}

impl<T> ResourceList<T> {
    pub fn new(items: Vec<T>, next_continue: Option<String>) -> Self {
        ResourceList { items, next_continue }
    }
}
