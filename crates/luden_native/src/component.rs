//! Entity script binding
//!
//! A [`ScriptComponent`] names a script behavior. Attaching it resolves the
//! name through the script registry and creates the module-owned instance.

use crate::error::{LifecycleError, Result};
use crate::script::{ScriptInstance, ScriptRegistry};
use luden_core::EntityId;
use serde::{Deserialize, Serialize};

/// Script binding as written in a scene or runtime config
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptComponentConfig {
    /// Registered script name
    pub script: String,
}

/// A script attached to one entity
pub struct ScriptComponent {
    script: String,
    entity: EntityId,
    instance: Option<ScriptInstance>,
}

impl ScriptComponent {
    pub fn new(entity: EntityId, script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            entity,
            instance: None,
        }
    }

    pub fn from_config(entity: EntityId, config: &ScriptComponentConfig) -> Self {
        Self::new(entity, config.script.clone())
    }

    pub fn script(&self) -> &str {
        &self.script
    }

    pub fn entity(&self) -> EntityId {
        self.entity
    }

    /// Whether a live instance is attached
    pub fn is_attached(&self) -> bool {
        self.instance.as_ref().is_some_and(ScriptInstance::is_live)
    }

    /// Resolve, instantiate and run `on_create`.
    ///
    /// Replaces a stale instance left behind by an unloaded module.
    pub fn attach(&mut self, scripts: &ScriptRegistry) -> Result<()> {
        if self.is_attached() {
            return Ok(());
        }
        // A stale instance from an unloaded module is discarded
        self.instance = None;

        let factory = scripts
            .resolve(&self.script)
            .ok_or_else(|| LifecycleError::UnknownScript(self.script.clone()))?;
        let mut instance = factory.instantiate()?;
        instance.on_create(self.entity)?;

        log::debug!(
            "Attached script '{}' from module '{}' to entity {}",
            self.script,
            factory.module_name(),
            self.entity
        );
        self.instance = Some(instance);
        Ok(())
    }

    /// Forward a frame to the script; a no-op while detached
    pub fn update(&mut self, delta_time: f32) -> Result<()> {
        match self.instance.as_mut() {
            Some(instance) => instance.on_update(delta_time),
            None => Ok(()),
        }
    }

    /// Run `on_destroy` and drop the instance
    pub fn detach(&mut self) {
        if let Some(mut instance) = self.instance.take() {
            if instance.is_live() {
                if let Err(e) = instance.on_destroy() {
                    log::warn!("Failed to destroy script '{}': {}", self.script, e);
                }
            }
        }
    }
}

impl Drop for ScriptComponent {
    fn drop(&mut self) {
        self.detach();
    }
}
