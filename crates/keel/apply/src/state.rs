//! Actual state updates
//!
//! Actions never mutate a `PolicyResolution` directly. They go through an
//! [`ActualStateUpdater`] so hosts can persist each change as it happens.

use crate::error::{ApplyError, Result};
use async_trait::async_trait;
use keel_resolve::{ComponentInstance, PolicyResolution};
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-place modification of one stored instance
pub type InstanceUpdate = Box<dyn FnOnce(&mut ComponentInstance) + Send>;

/// Store of the actual state that actions write through
#[async_trait]
pub trait ActualStateUpdater: Send + Sync {
    /// Stores an instance, replacing any previous one with the same key
    async fn save(&self, instance: ComponentInstance) -> Result<()>;

    /// Removes an instance if present
    async fn delete(&self, key: &str) -> Result<()>;

    /// Stores a new instance; fails if the key already exists
    async fn create_component_instance(&self, instance: ComponentInstance) -> Result<()>;

    /// Applies `update` to an existing instance and returns the new value
    async fn update_component_instance(
        &self,
        key: &str,
        update: InstanceUpdate,
    ) -> Result<ComponentInstance>;

    /// Removes an existing instance and returns it
    async fn delete_component_instance(&self, key: &str) -> Result<ComponentInstance>;

    async fn get_component_instance(&self, key: &str) -> Option<ComponentInstance>;

    /// Snapshot of the actual state including every change made so far
    async fn get_updated_actual_state(&self) -> PolicyResolution;
}

/// Actual state kept in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryActualState {
    state: Arc<RwLock<PolicyResolution>>,
}

impl InMemoryActualState {
    /// Create an empty actual state
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a previously recorded actual state
    pub fn from_resolution(resolution: PolicyResolution) -> Self {
        Self {
            state: Arc::new(RwLock::new(resolution)),
        }
    }
}

#[async_trait]
impl ActualStateUpdater for InMemoryActualState {
    async fn save(&self, instance: ComponentInstance) -> Result<()> {
        let mut state = self.state.write().await;
        state.insert_instance(instance);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut state = self.state.write().await;
        state.remove_instance(key);
        Ok(())
    }

    async fn create_component_instance(&self, instance: ComponentInstance) -> Result<()> {
        let mut state = self.state.write().await;
        if state.instance(instance.key.as_str()).is_some() {
            return Err(ApplyError::AlreadyExists(instance.key.to_string()));
        }
        state.insert_instance(instance);
        Ok(())
    }

    async fn update_component_instance(
        &self,
        key: &str,
        update: InstanceUpdate,
    ) -> Result<ComponentInstance> {
        let mut state = self.state.write().await;
        let mut instance = state
            .instance(key)
            .cloned()
            .ok_or_else(|| ApplyError::NotFound(key.to_string()))?;
        update(&mut instance);
        state.insert_instance(instance.clone());
        Ok(instance)
    }

    async fn delete_component_instance(&self, key: &str) -> Result<ComponentInstance> {
        let mut state = self.state.write().await;
        state
            .remove_instance(key)
            .ok_or_else(|| ApplyError::NotFound(key.to_string()))
    }

    async fn get_component_instance(&self, key: &str) -> Option<ComponentInstance> {
        let state = self.state.read().await;
        state.instance(key).cloned()
    }

    async fn get_updated_actual_state(&self) -> PolicyResolution {
        let state = self.state.read().await;
        state.clone()
    }
}
