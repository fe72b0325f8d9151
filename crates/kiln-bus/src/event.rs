use kiln_domain::{OrgId, ResourceKind};
use serde::{Deserialize, Serialize};

/// Why an event was published. The dispatcher routes on
/// `(kind, reason, current phase)`; synthetic requeues reuse `Created`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventReason {
    Created,
    Updated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub kind: ResourceKind,
    pub name: String,
    pub reason: EventReason,
}

/// Queue envelope. The bus treats the payload as opaque; only the dispatcher
/// interprets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventWithOrg {
    pub org_id: OrgId,
    pub event: Event,
}

impl EventWithOrg {
    pub fn new(org_id: OrgId, kind: ResourceKind, name: impl Into<String>, reason: EventReason) -> Self {
        EventWithOrg {
            org_id,
            event: Event { kind, name: name.into(), reason },
        }
    }
}
