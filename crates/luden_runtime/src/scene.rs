//! Entities declared in the runtime config
//!
//! Components are built through the reflection registry; anything that
//! fails to construct or configure is logged and skipped.

use crate::config::{ComponentConfig, EntityConfig};
use luden_core::{EntityId, Instance, ReflectionError, TypeRegistry};
use luden_native::{ScriptComponent, ScriptRegistry};

/// A configured entity
pub struct Entity {
    id: EntityId,
    name: String,
    components: Vec<Instance>,
    script: Option<ScriptComponent>,
}

impl Entity {
    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Component of a registered type
    pub fn component(&self, type_name: &str) -> Option<&Instance> {
        self.components.iter().find(|c| c.type_name() == type_name)
    }

    pub fn components(&self) -> &[Instance] {
        &self.components
    }

    pub fn script(&self) -> Option<&ScriptComponent> {
        self.script.as_ref()
    }

    pub fn script_mut(&mut self) -> Option<&mut ScriptComponent> {
        self.script.as_mut()
    }
}

/// Construct a component and apply its properties
pub fn build_component(
    registry: &TypeRegistry,
    config: &ComponentConfig,
) -> Result<Instance, ReflectionError> {
    let mut instance = registry.construct(&config.type_name, &config.args)?;
    for (property, value) in &config.properties {
        registry.set_property(&mut instance, property, value.clone())?;
    }
    Ok(instance)
}

/// Build entities; scripts are created but not attached
pub fn build_entities(registry: &TypeRegistry, configs: &[EntityConfig]) -> Vec<Entity> {
    configs
        .iter()
        .map(|config| {
            let id = EntityId::from_name(&config.name);
            let components = config
                .components
                .iter()
                .filter_map(|component| match build_component(registry, component) {
                    Ok(instance) => Some(instance),
                    Err(e) => {
                        log::warn!(
                            "Skipping component '{}' of entity '{}': {}",
                            component.type_name,
                            config.name,
                            e
                        );
                        None
                    }
                })
                .collect();

            Entity {
                id,
                name: config.name.clone(),
                components,
                script: config
                    .script
                    .as_ref()
                    .map(|script| ScriptComponent::new(id, script.clone())),
            }
        })
        .collect()
}

/// Attach every detached script; returns how many are attached afterwards
pub fn attach_scripts(entities: &mut [Entity], scripts: &ScriptRegistry) -> usize {
    let mut attached = 0;
    for entity in entities.iter_mut() {
        let Some(script) = entity.script.as_mut() else {
            continue;
        };
        match script.attach(scripts) {
            Ok(()) => attached += 1,
            Err(e) => log::warn!("Entity '{}' runs without its script: {}", entity.name, e),
        }
    }
    attached
}

/// Forward a frame to every script; a failing script is detached
pub fn update_scripts(entities: &mut [Entity], delta_time: f32) {
    for entity in entities.iter_mut() {
        let Some(script) = entity.script.as_mut() else {
            continue;
        };
        if let Err(e) = script.update(delta_time) {
            log::warn!("Script '{}' on '{}' failed: {}", script.script(), entity.name, e);
            script.detach();
        }
    }
}

pub fn detach_scripts(entities: &mut [Entity]) {
    for script in entities.iter_mut().filter_map(Entity::script_mut) {
        script.detach();
    }
}
