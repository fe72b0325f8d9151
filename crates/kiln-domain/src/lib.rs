pub mod conditions;
pub mod error;
pub mod selector;
pub mod types;

mod tests;

pub use conditions::{set_condition, Condition, ConditionStatus, ConditionType};
pub use error::DomainError;
pub use selector::{FieldSelector, ListParams, ResourceList};
pub use types::{
    validate_name, BindingMode, ExportFormat, ExportSource, ImageBuild, ImageBuildSpec,
    ImageExport, ImageExportSpec, LifecyclePhase, Metadata, OrgId, OwnerRef, ResourceKind,
    ResourceStatus, ResourceVersion,
};
