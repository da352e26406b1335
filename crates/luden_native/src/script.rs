//! Script registry: behavior names to module-supplied factories
//!
//! Entries are only added while a module runs `register_scripts` and are
//! removed when that module unloads.

use crate::binary::ModuleLibrary;
use crate::error::{LifecycleError, LoadError, RegistryError, Result};
use crate::ffi::{FfiScript, FfiScriptFactory, FfiScriptVTable};
use crate::foreign::Foreign;
use crate::loader::ModuleHandle;
use luden_core::EntityId;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

type CreateScriptFn = unsafe extern "C" fn() -> *mut FfiScript;
type DestroyScriptFn = unsafe extern "C" fn(*mut FfiScript);

struct ScriptEntry {
    module: ModuleHandle,
    module_name: String,
    create: CreateScriptFn,
    destroy: DestroyScriptFn,
    library: Weak<ModuleLibrary>,
}

/// Registry of named script behaviors
#[derive(Default)]
pub struct ScriptRegistry {
    entries: HashMap<String, ScriptEntry>,
}

impl ScriptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(
        &mut self,
        name: &str,
        module: ModuleHandle,
        factory: FfiScriptFactory,
        library: &Arc<ModuleLibrary>,
    ) -> std::result::Result<(), RegistryError> {
        let (Some(create), Some(destroy)) = (factory.create, factory.destroy) else {
            return Err(RegistryError::InvalidScript {
                name: name.to_string(),
                reason: "factory is missing create or destroy".to_string(),
            });
        };

        if self.entries.contains_key(name) {
            return Err(RegistryError::DuplicateScript(name.to_string()));
        }

        self.entries.insert(
            name.to_string(),
            ScriptEntry {
                module,
                module_name: library.name().to_string(),
                create,
                destroy,
                library: Arc::downgrade(library),
            },
        );
        log::debug!("Registered script '{}' from module '{}'", name, library.name());
        Ok(())
    }

    /// Factory for a script name
    pub fn resolve(&self, name: &str) -> Option<ScriptFactory> {
        self.entries.get(name).map(|entry| ScriptFactory {
            name: name.to_string(),
            module: entry.module,
            module_name: entry.module_name.clone(),
            create: entry.create,
            destroy: entry.destroy,
            library: entry.library.clone(),
        })
    }

    /// Remove every entry of `module`; returns how many were removed
    pub fn invalidate_all(&mut self, module: ModuleHandle) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.module != module);
        let removed = before - self.entries.len();
        if removed > 0 {
            log::debug!("Invalidated {} scripts of module {}", removed, module);
        }
        removed
    }

    /// All registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Names registered by one module, sorted
    pub fn scripts_of(&self, module: ModuleHandle) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.module == module)
            .map(|(name, _)| name.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    /// Module that registered a name
    pub fn module_of(&self, name: &str) -> Option<ModuleHandle> {
        self.entries.get(name).map(|entry| entry.module)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A resolved script factory.
///
/// Does not keep the module loaded; instantiating after the module was
/// unloaded fails.
#[derive(Clone)]
pub struct ScriptFactory {
    name: String,
    module: ModuleHandle,
    module_name: String,
    create: CreateScriptFn,
    destroy: DestroyScriptFn,
    library: Weak<ModuleLibrary>,
}

impl ScriptFactory {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn module(&self) -> ModuleHandle {
        self.module
    }

    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    /// Whether the module behind this factory is still loaded
    pub fn is_available(&self) -> bool {
        self.library
            .upgrade()
            .map(|library| library.is_active())
            .unwrap_or(false)
    }

    /// Create a new instance through the module
    pub fn instantiate(&self) -> Result<ScriptInstance> {
        let library = self
            .library
            .upgrade()
            .filter(|library| library.is_active())
            .ok_or_else(|| LifecycleError::OperationOnInactiveModule(self.module_name.clone()))?;

        let raw = unsafe { (self.create)() };
        let object = unsafe { Foreign::from_raw(raw, self.destroy, library) }.ok_or_else(|| {
            LoadError::construction_failed(
                &self.module_name,
                format!("script factory '{}' returned null", self.name),
            )
        })?;
        let vtable = object.header().vtable;

        Ok(ScriptInstance {
            name: self.name.clone(),
            object,
            vtable,
            created: false,
        })
    }
}

/// A live script object owned by its module
pub struct ScriptInstance {
    name: String,
    object: Foreign<FfiScript>,
    vtable: FfiScriptVTable,
    created: bool,
}

impl ScriptInstance {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_live(&self) -> bool {
        self.object.is_live()
    }

    /// `on_create` has run and `on_destroy` has not
    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn on_create(&mut self, entity: EntityId) -> Result<()> {
        self.ensure_live()?;
        if let Some(on_create) = self.vtable.on_create {
            unsafe { on_create(self.object.as_ptr(), entity.into()) };
        }
        self.created = true;
        Ok(())
    }

    pub fn on_update(&mut self, delta_time: f32) -> Result<()> {
        self.ensure_live()?;
        if let Some(on_update) = self.vtable.on_update {
            unsafe { on_update(self.object.as_ptr(), delta_time) };
        }
        Ok(())
    }

    /// Run `on_destroy` once; later calls are no-ops
    pub fn on_destroy(&mut self) -> Result<()> {
        self.ensure_live()?;
        if self.created {
            self.created = false;
            if let Some(on_destroy) = self.vtable.on_destroy {
                unsafe { on_destroy(self.object.as_ptr()) };
            }
        }
        Ok(())
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_live() {
            Ok(())
        } else {
            Err(
                LifecycleError::OperationOnInactiveModule(self.object.module_name().to_string())
                    .into(),
            )
        }
    }
}

impl Drop for ScriptInstance {
    fn drop(&mut self) {
        if self.created {
            if self.is_live() {
                let _ = self.on_destroy();
            } else {
                log::warn!(
                    "Script '{}' dropped after module '{}' was unloaded; skipping on_destroy",
                    self.name,
                    self.object.module_name()
                );
            }
        }
    }
}
