use std::collections::HashMap;

use kiln_domain::{OrgId, ResourceKind};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Identity of a running task: one per `(org, kind, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskKey {
    pub org_id: OrgId,
    pub kind: ResourceKind,
    pub name: String,
}

impl TaskKey {
    pub fn new(org_id: OrgId, kind: ResourceKind, name: impl Into<String>) -> Self {
        TaskKey { org_id, kind, name: name.into() }
    }
}

impl std::fmt::Display for TaskKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.org_id, self.kind, self.name)
    }
}

/// In-memory single-flight map: at most one task per resource key.
///
/// On a distributed deployment this would be promoted to a lease on the
/// streaming store; in-process a mutex-guarded map is enough.
#[derive(Default)]
pub struct TaskRegistry {
    inner: Mutex<HashMap<TaskKey, CancellationToken>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot for `key`. Returns a child token of `parent` to hand to
    /// the task, or `None` if a task is already running (the caller drops the
    /// duplicate).
    pub async fn try_claim(
        &self,
        key: TaskKey,
        parent: &CancellationToken,
    ) -> Option<CancellationToken> {
        let mut map = self.inner.lock().await;
        if map.contains_key(&key) {
            return None;
        }
        let token = parent.child_token();
        map.insert(key, token.clone());
        Some(token)
    }

    /// Release the slot once the task body has fully finished.
    pub async fn release(&self, key: &TaskKey) {
        self.inner.lock().await.remove(key);
    }

    /// Signal the running task for `key`, if any. Returns whether a task was
    /// there to cancel.
    pub async fn cancel(&self, key: &TaskKey) -> bool {
        let map = self.inner.lock().await;
        match map.get(key) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn active_count(&self) -> usize {
        self.inner.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> TaskKey {
        TaskKey::new(OrgId::nil(), ResourceKind::ImageBuild, name)
    }

    #[tokio::test]
    async fn claim_is_single_flight_per_key() {
        let registry = TaskRegistry::new();
        let root = CancellationToken::new();
        assert!(registry.try_claim(key("b1"), &root).await.is_some());
        assert!(registry.try_claim(key("b1"), &root).await.is_none());
        assert!(registry.try_claim(key("b2"), &root).await.is_some());

        registry.release(&key("b1")).await;
        assert!(registry.try_claim(key("b1"), &root).await.is_some());
    }

    #[tokio::test]
    async fn cancel_fires_the_claimed_token() {
        let registry = TaskRegistry::new();
        let root = CancellationToken::new();
        let token = registry.try_claim(key("b1"), &root).await.unwrap();
        assert!(registry.cancel(&key("b1")).await);
        assert!(token.is_cancelled());
        assert!(!registry.cancel(&key("ghost")).await);
    }

    #[tokio::test]
    async fn child_tokens_follow_the_parent() {
        let registry = TaskRegistry::new();
        let root = CancellationToken::new();
        let token = registry.try_claim(key("b1"), &root).await.unwrap();
        root.cancel();
        assert!(token.is_cancelled());
    }
}
