//! Actual state: the store interface and an in-memory implementation
//!
//! The apply engine commits every successful action through a
//! [`StateUpdater`]; writes are atomic at the instance granularity.

use crate::resolve::{ComponentInstance, Resolution};
use async_trait::async_trait;
use canopy_lang::Generation;
use thiserror::Error;
use tokio::sync::RwLock;

/// Store failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("instance '{0}' not found in actual state")]
    NotFound(String),

    #[error("state store unavailable: {0}")]
    Unavailable(String),
}

/// Interface from the core to the actual-state store.
#[async_trait]
pub trait StateUpdater: Send + Sync {
    async fn create(&self, instance: ComponentInstance) -> Result<(), StateError>;

    async fn update(&self, instance: ComponentInstance) -> Result<(), StateError>;

    async fn delete(&self, key: &str) -> Result<(), StateError>;

    /// Read one instance.
    async fn get(&self, key: &str) -> Result<Option<ComponentInstance>, StateError>;

    /// Advance the recorded policy revision.
    async fn update_revision(&self, revision: Generation) -> Result<(), StateError>;

    /// Snapshot of the full actual state.
    async fn actual_state(&self) -> Result<Resolution, StateError>;
}

/// In-memory actual state, used in tests and as the reference
/// implementation. The lock serializes per-key writes.
#[derive(Debug, Default)]
pub struct InMemoryStateUpdater {
    state: RwLock<Resolution>,
}

impl InMemoryStateUpdater {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: Resolution) -> Self {
        Self {
            state: RwLock::new(state),
        }
    }
}

#[async_trait]
impl StateUpdater for InMemoryStateUpdater {
    async fn create(&self, instance: ComponentInstance) -> Result<(), StateError> {
        let mut state = self.state.write().await;
        state
            .instances
            .insert(instance.key.as_string(), instance);
        Ok(())
    }

    async fn update(&self, instance: ComponentInstance) -> Result<(), StateError> {
        let mut state = self.state.write().await;
        state
            .instances
            .insert(instance.key.as_string(), instance);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StateError> {
        let mut state = self.state.write().await;
        state.instances.remove(key);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<ComponentInstance>, StateError> {
        let state = self.state.read().await;
        Ok(state.instances.get(key).cloned())
    }

    async fn update_revision(&self, revision: Generation) -> Result<(), StateError> {
        let mut state = self.state.write().await;
        state.policy_revision = revision;
        Ok(())
    }

    async fn actual_state(&self) -> Result<Resolution, StateError> {
        let state = self.state.read().await;
        Ok(state.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::ComponentKey;

    fn instance(component: &str) -> ComponentInstance {
        let root = ComponentKey::root("main", "s1", "cx", vec![], "b1");
        ComponentInstance::new(if component.is_empty() {
            root
        } else {
            root.with_component(component)
        })
    }

    #[tokio::test]
    async fn create_get_delete_round_trip() {
        let store = InMemoryStateUpdater::new();
        let inst = instance("c1");
        let key = inst.key.as_string();

        store.create(inst).await.unwrap();
        assert!(store.get(&key).await.unwrap().is_some());

        store.delete(&key).await.unwrap();
        assert!(store.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn revision_advances() {
        let store = InMemoryStateUpdater::new();
        store.update_revision(Generation(7)).await.unwrap();
        assert_eq!(
            store.actual_state().await.unwrap().policy_revision,
            Generation(7)
        );
    }
}
