use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::conditions::{Condition, ConditionType};
use crate::error::DomainError;

// ── Identifiers ──────────────────────────────────────────────────────────────

/// Tenant scope. Every store operation and every event carries one; no query
/// ever crosses org boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrgId(pub Uuid);

impl OrgId {
    pub fn new(id: Uuid) -> Self {
        OrgId(id)
    }

    /// The default org (nil UUID) used when a caller does not specify one.
    pub fn nil() -> Self {
        OrgId(Uuid::nil())
    }

    pub fn parse(s: &str) -> Result<Self, DomainError> {
        Uuid::parse_str(s)
            .map(OrgId)
            .map_err(|_| DomainError::InvalidOrgId(s.to_string()))
    }
}

impl std::fmt::Display for OrgId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    ImageBuild,
    ImageExport,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::ImageBuild => "ImageBuild",
            ResourceKind::ImageExport => "ImageExport",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ImageBuild" => Some(ResourceKind::ImageBuild),
            "ImageExport" => Some(ResourceKind::ImageExport),
            _ => None,
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Owner references ─────────────────────────────────────────────────────────

/// Typed back-reference `"<Kind>/<name>"`. Deleting the referenced parent
/// cascades to every resource in the same org whose owner names it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OwnerRef {
    pub kind: ResourceKind,
    pub name: String,
}

impl OwnerRef {
    pub fn image_build(name: impl Into<String>) -> Self {
        OwnerRef { kind: ResourceKind::ImageBuild, name: name.into() }
    }

    pub fn parse(s: &str) -> Result<Self, DomainError> {
        let (kind, name) = s
            .split_once('/')
            .ok_or_else(|| DomainError::InvalidOwnerRef(s.to_string()))?;
        let kind =
            ResourceKind::parse(kind).ok_or_else(|| DomainError::InvalidOwnerRef(s.to_string()))?;
        if name.is_empty() {
            return Err(DomainError::InvalidOwnerRef(s.to_string()));
        }
        Ok(OwnerRef { kind, name: name.to_string() })
    }
}

impl std::fmt::Display for OwnerRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

impl Serialize for OwnerRef {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for OwnerRef {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        OwnerRef::parse(&s).map_err(serde::de::Error::custom)
    }
}

// ── Versioning ───────────────────────────────────────────────────────────────

/// Opaque write token. Changes on every write; callers treat it as a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceVersion(pub u64);

impl ResourceVersion {
    pub fn initial() -> Self {
        ResourceVersion(1)
    }

    pub fn bump(&mut self) {
        self.0 += 1;
    }
}

impl std::fmt::Display for ResourceVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for ResourceVersion {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for ResourceVersion {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse::<u64>()
            .map(ResourceVersion)
            .map_err(|_| serde::de::Error::custom(format!("invalid resourceVersion '{s}'")))
    }
}

// ── Metadata ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// Unique per org and kind.
    pub name: String,
    pub created_at: DateTime<Utc>,
    /// Spec-version counter; bumps only when the spec changes.
    pub generation: i64,
    pub resource_version: ResourceVersion,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<OwnerRef>,
}

impl Metadata {
    /// Metadata for a freshly created resource.
    pub fn new(name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Metadata {
            name: name.into(),
            created_at: now,
            generation: 1,
            resource_version: ResourceVersion::initial(),
            owner: None,
        }
    }
}

// ── Lifecycle ────────────────────────────────────────────────────────────────

/// The lifecycle state of a resource, encoded as the `Ready` condition reason.
///
/// ImageBuild:  Pending → Building → Pushing → Completed | Failed
/// ImageExport: Pending → Converting → Pushing → Completed | Failed
/// Either kind: any active state → Canceling → Failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecyclePhase {
    Pending,
    Building,
    Converting,
    Pushing,
    Canceling,
    Completed,
    Failed,
}

impl LifecyclePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecyclePhase::Pending => "Pending",
            LifecyclePhase::Building => "Building",
            LifecyclePhase::Converting => "Converting",
            LifecyclePhase::Pushing => "Pushing",
            LifecyclePhase::Canceling => "Canceling",
            LifecyclePhase::Completed => "Completed",
            LifecyclePhase::Failed => "Failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Pending" => Some(LifecyclePhase::Pending),
            "Building" => Some(LifecyclePhase::Building),
            "Converting" => Some(LifecyclePhase::Converting),
            "Pushing" => Some(LifecyclePhase::Pushing),
            "Canceling" => Some(LifecyclePhase::Canceling),
            "Completed" => Some(LifecyclePhase::Completed),
            "Failed" => Some(LifecyclePhase::Failed),
            _ => None,
        }
    }

    /// No further transitions happen from these states.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecyclePhase::Completed | LifecyclePhase::Failed)
    }

    /// A worker is expected to be driving the resource.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            LifecyclePhase::Building
                | LifecyclePhase::Converting
                | LifecyclePhase::Pushing
                | LifecyclePhase::Canceling
        )
    }

    /// Safe to re-dispatch after a restart: either no worker ever owned the
    /// resource, or the work already finished.
    pub fn is_requeue_safe(&self) -> bool {
        matches!(
            self,
            LifecyclePhase::Pending | LifecyclePhase::Completed | LifecyclePhase::Failed
        )
    }
}

impl std::fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Status ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    /// Liveness heartbeat written by the running task; consumed by the
    /// timeout watchdog.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
    /// Bounded tail of the worker log, persisted periodically.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_tail: Option<String>,
}

impl ResourceStatus {
    pub fn ready(&self) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == ConditionType::Ready)
    }

    /// The lifecycle phase encoded in `Ready.reason`, if any.
    pub fn phase(&self) -> Option<LifecyclePhase> {
        self.ready().and_then(|c| LifecyclePhase::parse(&c.reason))
    }
}

// ── ImageBuild ───────────────────────────────────────────────────────────────

/// Whether agent credentials are baked into the image at build time (Early)
/// or injected at boot (Late). Only the external builder consumes this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindingMode {
    Early,
    #[default]
    Late,
}

impl std::fmt::Display for BindingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BindingMode::Early => write!(f, "early"),
            BindingMode::Late => write!(f, "late"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageBuildSpec {
    /// Base image the build starts from.
    pub source_image: String,
    /// Registry reference the finished image is pushed to.
    pub destination_image: String,
    #[serde(default)]
    pub binding: BindingMode,
    /// Opaque agent configuration handed to the builder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_config: Option<Value>,
}

impl ImageBuildSpec {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.source_image.is_empty() {
            return Err(DomainError::MissingField("spec.sourceImage"));
        }
        if self.destination_image.is_empty() {
            return Err(DomainError::MissingField("spec.destinationImage"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageBuild {
    pub metadata: Metadata,
    pub spec: ImageBuildSpec,
    #[serde(default)]
    pub status: ResourceStatus,
    /// Owned exports, embedded only when requested with `withExports`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exports: Option<Vec<ImageExport>>,
}

impl ImageBuild {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn phase(&self) -> Option<LifecyclePhase> {
        self.status.phase()
    }
}

// ── ImageExport ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Qcow2,
    Vmdk,
    Raw,
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportFormat::Qcow2 => write!(f, "qcow2"),
            ExportFormat::Vmdk => write!(f, "vmdk"),
            ExportFormat::Raw => write!(f, "raw"),
        }
    }
}

/// Where the exported image comes from: a direct registry reference, or a
/// back-reference to an ImageBuild in the same org. A referenced build gates
/// the export until it completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExportSource {
    ImageBuildRef {
        #[serde(rename = "imageBuildRef")]
        image_build_ref: String,
    },
    Image { image: String },
}

impl ExportSource {
    pub fn image_build_ref(&self) -> Option<&str> {
        match self {
            ExportSource::ImageBuildRef { image_build_ref } => Some(image_build_ref),
            ExportSource::Image { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageExportSpec {
    pub source: ExportSource,
    pub destination_image: String,
    pub format: ExportFormat,
}

impl ImageExportSpec {
    pub fn validate(&self) -> Result<(), DomainError> {
        match &self.source {
            ExportSource::Image { image } if image.is_empty() => {
                return Err(DomainError::MissingField("spec.source.image"));
            }
            ExportSource::ImageBuildRef { image_build_ref } if image_build_ref.is_empty() => {
                return Err(DomainError::MissingField("spec.source.imageBuildRef"));
            }
            _ => {}
        }
        if self.destination_image.is_empty() {
            return Err(DomainError::MissingField("spec.destinationImage"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageExport {
    pub metadata: Metadata,
    pub spec: ImageExportSpec,
    #[serde(default)]
    pub status: ResourceStatus,
}

impl ImageExport {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn phase(&self) -> Option<LifecyclePhase> {
        self.status.phase()
    }
}

// ── Name validation ──────────────────────────────────────────────────────────

const MAX_NAME_LEN: usize = 253;

/// Names are DNS-subdomain-like: lowercase alphanumerics, `-` and `.`,
/// starting and ending with an alphanumeric.
pub fn validate_name(name: &str) -> Result<(), DomainError> {
    if name.is_empty() {
        return Err(DomainError::InvalidName("name must not be empty".into()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(DomainError::InvalidName(format!(
            "name exceeds {MAX_NAME_LEN} characters"
        )));
    }
    let valid_char = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.';
    if !name.chars().all(valid_char) {
        return Err(DomainError::InvalidName(format!(
            "name '{name}' contains characters outside [a-z0-9.-]"
        )));
    }
    let edge_ok = |c: Option<char>| c.is_some_and(|c| c.is_ascii_alphanumeric());
    if !edge_ok(name.chars().next()) || !edge_ok(name.chars().last()) {
        return Err(DomainError::InvalidName(format!(
            "name '{name}' must start and end with an alphanumeric"
        )));
    }
    Ok(())
}
