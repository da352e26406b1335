//! Module host: ordered module slots on top of the loader
//!
//! A slot is a named position in the module list. Startup loads every slot
//! in order and degrades on failure; hot reload replaces the module in one
//! slot; shutdown unloads in reverse activation order.

use crate::application::{ApplicationFactory, ApplicationSpec, RuntimeApplication};
use crate::binary::StaticBinary;
use crate::error::{LifecycleError, Result};
use crate::loader::{LoaderConfig, ModuleHandle, ModuleLoader};
use crate::manifest::ModuleManifest;
use crate::script::ScriptRegistry;
use std::path::{Path, PathBuf};

/// Where a slot's binary comes from
#[derive(Clone)]
pub enum ModuleSource {
    Path(PathBuf),
    Static(StaticBinary),
}

/// A named module position
pub struct ModuleSlot {
    name: String,
    source: ModuleSource,
    hot_reload: bool,
    handle: Option<ModuleHandle>,
    last_error: Option<String>,
}

impl ModuleSlot {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &ModuleSource {
        &self.source
    }

    /// Binary path, for dynamic slots
    pub fn path(&self) -> Option<&Path> {
        match &self.source {
            ModuleSource::Path(path) => Some(path),
            ModuleSource::Static(_) => None,
        }
    }

    pub fn hot_reload(&self) -> bool {
        self.hot_reload
    }

    /// Module currently occupying the slot
    pub fn handle(&self) -> Option<ModuleHandle> {
        self.handle
    }

    pub fn is_available(&self) -> bool {
        self.handle.is_some()
    }

    /// Why the last load attempt failed
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

/// Outcome of [`ModuleHost::start`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartupReport {
    /// Slots that reached `Active`, in activation order
    pub activated: Vec<String>,
    /// Slots that failed, with the reason
    pub failed: Vec<(String, String)>,
}

impl StartupReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Owns the loader, the module slots and the application factory
pub struct ModuleHost {
    loader: ModuleLoader,
    slots: Vec<ModuleSlot>,
    factory: ApplicationFactory,
}

impl Default for ModuleHost {
    fn default() -> Self {
        Self::new(LoaderConfig::default())
    }
}

impl ModuleHost {
    pub fn new(config: LoaderConfig) -> Self {
        Self {
            loader: ModuleLoader::new(config),
            slots: Vec::new(),
            factory: ApplicationFactory::new(),
        }
    }

    /// Host with one slot per manifest entry, in manifest order
    pub fn from_manifest(manifest: &ModuleManifest) -> Result<Self> {
        manifest.validate()?;
        let mut host = Self::new(manifest.loader_config());
        for entry in &manifest.modules {
            host.push_slot(
                entry.name.clone(),
                ModuleSource::Path(manifest.resolve_path(entry)),
                entry.hot_reload,
            );
        }
        Ok(host)
    }

    /// Add a dynamic module slot
    pub fn add_path(
        &mut self,
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        hot_reload: bool,
    ) {
        self.push_slot(name.into(), ModuleSource::Path(path.into()), hot_reload);
    }

    /// Add a statically linked module slot
    pub fn add_static(&mut self, name: impl Into<String>, binary: StaticBinary) {
        self.push_slot(name.into(), ModuleSource::Static(binary), false);
    }

    fn push_slot(&mut self, name: String, source: ModuleSource, hot_reload: bool) {
        if self.slot(&name).is_some() {
            log::warn!("Module slot '{}' is already registered, replacing its source", name);
            self.slots.retain(|slot| slot.name != name);
        }
        self.slots.push(ModuleSlot {
            name,
            source,
            hot_reload,
            handle: None,
            last_error: None,
        });
    }

    /// Load and activate every empty slot in order.
    ///
    /// A slot that fails is logged and left unavailable; the rest still
    /// start.
    pub fn start(&mut self) -> StartupReport {
        let mut report = StartupReport::default();
        for index in 0..self.slots.len() {
            if self.slots[index].handle.is_some() {
                continue;
            }
            let name = self.slots[index].name.clone();
            match self.bring_up(index) {
                Ok(handle) => {
                    log::info!("Module slot '{}' is active as {}", name, handle);
                    report.activated.push(name);
                }
                Err(e) => {
                    log::error!("Module slot '{}' is unavailable: {}", name, e);
                    report.failed.push((name, e.to_string()));
                }
            }
        }
        report
    }

    fn bring_up(&mut self, index: usize) -> Result<ModuleHandle> {
        let slot = &mut self.slots[index];
        let loaded = match &slot.source {
            ModuleSource::Path(path) => self.loader.load(path),
            ModuleSource::Static(binary) => self.loader.load_binary(binary.clone()),
        };
        let result = loaded.and_then(|handle| self.loader.activate(handle).map(|()| handle));

        match &result {
            Ok(handle) => {
                slot.handle = Some(*handle);
                slot.last_error = None;
            }
            Err(e) => {
                slot.handle = None;
                slot.last_error = Some(e.to_string());
            }
        }
        result
    }

    /// Create the session's runtime application
    pub fn create_application(
        &mut self,
        spec: &ApplicationSpec,
    ) -> Result<Box<dyn RuntimeApplication>> {
        self.factory.create(&self.loader, spec)
    }

    /// Replace the module in a slot with a fresh load of its binary.
    ///
    /// Every script instance of the old module must be detached first;
    /// instances left behind refuse further calls.
    pub fn reload(&mut self, name: &str) -> Result<ModuleHandle> {
        let index = self
            .slots
            .iter()
            .position(|slot| slot.name == name)
            .ok_or_else(|| LifecycleError::UnknownSlot(name.to_string()))?;

        if let Some(old) = self.slots[index].handle {
            if self.factory.owner() == Some(old) {
                return Err(LifecycleError::ModuleOwnsApplication(name.to_string()).into());
            }
            log::info!("Reloading module slot '{}'", name);
            self.slots[index].handle = None;
            self.loader.unload(old)?;
        }

        self.bring_up(index)
    }

    /// Unload every module, most recently activated first
    pub fn shutdown(&mut self) {
        self.loader.unload_all();
        for slot in &mut self.slots {
            slot.handle = None;
        }
    }

    pub fn slot(&self, name: &str) -> Option<&ModuleSlot> {
        self.slots.iter().find(|slot| slot.name == name)
    }

    /// Slots in load order
    pub fn slots(&self) -> &[ModuleSlot] {
        &self.slots
    }

    /// Dynamic slots marked for hot reload, with their binary path
    pub fn hot_reload_targets(&self) -> Vec<(&str, &Path)> {
        self.slots
            .iter()
            .filter(|slot| slot.hot_reload)
            .filter_map(|slot| slot.path().map(|path| (slot.name(), path)))
            .collect()
    }

    pub fn loader(&self) -> &ModuleLoader {
        &self.loader
    }

    pub fn scripts(&self) -> &ScriptRegistry {
        self.loader.scripts()
    }

    pub fn application_owner(&self) -> Option<ModuleHandle> {
        self.factory.owner()
    }
}

impl Drop for ModuleHost {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdk::{GameModule, ScriptRegistrar, ScriptableBehavior, SdkError};

    #[derive(Default)]
    struct Noop;

    impl ScriptableBehavior for Noop {}

    #[derive(Default)]
    struct Basic;

    impl GameModule for Basic {
        fn register_scripts(
            &mut self,
            registrar: &mut ScriptRegistrar<'_>,
        ) -> std::result::Result<(), SdkError> {
            registrar.register::<Noop>("Noop")
        }

        fn version(&self) -> u32 {
            1
        }
    }

    #[test]
    fn test_start_degrades_on_missing_binary() {
        let mut host = ModuleHost::default();
        host.add_path("missing", "/no/such/libmissing.so", false);
        host.add_static("basic", StaticBinary::of::<Basic>("basic"));

        let report = host.start();
        assert_eq!(report.activated, vec!["basic".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert!(!report.is_complete());

        assert!(!host.slot("missing").unwrap().is_available());
        assert!(host.slot("missing").unwrap().last_error().is_some());
        assert!(host.scripts().contains("Noop"));
    }

    #[test]
    fn test_reload_replaces_module() {
        let mut host = ModuleHost::default();
        host.add_static("basic", StaticBinary::of::<Basic>("basic"));
        host.start();
        let first = host.slot("basic").and_then(ModuleSlot::handle).unwrap();

        let second = host.reload("basic").unwrap();
        assert_ne!(first, second);
        assert!(host.scripts().contains("Noop"));
        assert_eq!(host.scripts().module_of("Noop"), Some(second));

        assert!(matches!(
            host.reload("nope"),
            Err(crate::error::ModuleError::Lifecycle(LifecycleError::UnknownSlot(_)))
        ));
    }

    #[test]
    fn test_shutdown_clears_slots() {
        let mut host = ModuleHost::default();
        host.add_static("basic", StaticBinary::of::<Basic>("basic"));
        host.start();
        host.shutdown();

        assert!(!host.slot("basic").unwrap().is_available());
        assert!(host.scripts().is_empty());
        assert!(host.loader().is_empty());
    }

    #[test]
    fn test_hot_reload_targets() {
        let manifest = ModuleManifest::from_toml(
            "[[module]]\nname = \"a\"\npath = \"/x/liba.so\"\nhot_reload = true\n\
             [[module]]\nname = \"b\"\npath = \"/x/libb.so\"",
        )
        .unwrap();
        let host = ModuleHost::from_manifest(&manifest).unwrap();
        assert_eq!(host.slots().len(), 2);
        assert_eq!(host.hot_reload_targets(), vec![("a", Path::new("/x/liba.so"))]);
    }
}
