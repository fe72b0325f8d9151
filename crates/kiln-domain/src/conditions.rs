use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::LifecyclePhase;

// ── Condition model ──────────────────────────────────────────────────────────

/// Truth value of a condition, following the Kubernetes convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl ConditionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionStatus::True => "True",
            ConditionStatus::False => "False",
            ConditionStatus::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Condition types are fixed per resource; a condition list holds at most one
/// entry per type. `Ready` is the canonical condition whose `reason` encodes
/// the lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionType {
    Ready,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
    /// When `status` last flipped. Reason/message churn within the same truth
    /// value is not a transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    pub fn new(
        condition_type: ConditionType,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Condition {
            condition_type,
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: None,
            observed_generation: None,
        }
    }

    pub fn with_observed_generation(mut self, generation: i64) -> Self {
        self.observed_generation = Some(generation);
        self
    }

    /// The `Ready` condition for a lifecycle phase: `True` once Completed,
    /// `Unknown` while Pending, `False` everywhere else.
    pub fn for_phase(phase: LifecyclePhase, message: impl Into<String>) -> Self {
        let status = match phase {
            LifecyclePhase::Completed => ConditionStatus::True,
            LifecyclePhase::Pending => ConditionStatus::Unknown,
            _ => ConditionStatus::False,
        };
        Condition::new(ConditionType::Ready, status, phase.as_str(), message)
    }
}

// ── Merge ────────────────────────────────────────────────────────────────────

/// Merge `new` into `list`, keeping at most one condition per type.
///
/// `lastTransitionTime` advances only when `status` changes, taking
/// `new.last_transition_time` if set, else now. Returns true iff any field
/// changed. `observed_generation` compares by value, with absent distinct
/// from zero.
pub fn set_condition(list: &mut Vec<Condition>, mut new: Condition) -> bool {
    let now = Utc::now();
    match list
        .iter_mut()
        .find(|c| c.condition_type == new.condition_type)
    {
        Some(existing) => {
            let mut changed = false;
            if existing.status != new.status {
                existing.status = new.status;
                existing.last_transition_time = Some(new.last_transition_time.unwrap_or(now));
                changed = true;
            }
            if existing.reason != new.reason {
                existing.reason = new.reason;
                changed = true;
            }
            if existing.message != new.message {
                existing.message = new.message;
                changed = true;
            }
            if existing.observed_generation != new.observed_generation {
                existing.observed_generation = new.observed_generation;
                changed = true;
            }
            changed
        }
        None => {
            if new.last_transition_time.is_none() {
                new.last_transition_time = Some(now);
            }
            list.push(new);
            true
        }
    }
}
