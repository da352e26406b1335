//! Module loader: the lifecycle state machine of game modules
//!
//! ```text
//!  load ──▶ Loaded ──activate──▶ Active ──unload──▶ Unloading ──▶ Unloaded
//!             │                                                    ▲
//!             └───────────────────────unload───────────────────────┘
//! ```
//!
//! Entry points are resolved before any module code runs, the version is
//! checked before `on_load`, and any failure of `on_load` or
//! `register_scripts` rolls the module back completely.

use crate::application::{ApplicationSpec, ForeignApplication};
use crate::binary::{DynamicBinary, ModuleBinary, ModuleLibrary};
use crate::error::{LifecycleError, LoadError, ModuleError, RegistryError, Result};
use crate::ffi::*;
use crate::foreign::Foreign;
use crate::script::ScriptRegistry;
use crate::version::VersionRange;
use std::collections::{BTreeMap, HashMap};
use std::ffi::{c_char, c_void, CStr};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Opaque module handle, never reused within a loader
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModuleHandle(u64);

impl ModuleHandle {
    #[inline]
    pub const fn from_raw(id: u64) -> Self {
        Self(id)
    }

    #[inline]
    pub const fn to_raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ModuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle state of a module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleState {
    Unloaded,
    Loaded,
    Active,
    Unloading,
}

/// Loader configuration
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Versions accepted from `get_version`
    pub accepted_versions: VersionRange,
    /// Open dynamic modules from a shadow copy
    pub shadow_copy: bool,
    /// Where shadow copies are written
    pub shadow_directory: PathBuf,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            accepted_versions: VersionRange::default(),
            shadow_copy: false,
            shadow_directory: std::env::temp_dir().join("luden_shadow"),
        }
    }
}

/// Non-optional view of a complete module vtable
#[derive(Clone, Copy)]
struct ModuleCalls {
    on_load: unsafe extern "C" fn(*mut FfiScriptModule) -> FfiStatus,
    on_unload: unsafe extern "C" fn(*mut FfiScriptModule),
    register_scripts:
        unsafe extern "C" fn(*mut FfiScriptModule, *mut FfiScriptRegistrar) -> FfiStatus,
    get_version: unsafe extern "C" fn(*const FfiScriptModule) -> u32,
    create_runtime_application: Option<
        unsafe extern "C" fn(
            *mut FfiScriptModule,
            *const FfiApplicationSpec,
        ) -> *mut FfiApplication,
    >,
}

impl ModuleCalls {
    fn resolve(vtable: &FfiModuleVTable) -> Option<Self> {
        Some(Self {
            on_load: vtable.on_load?,
            on_unload: vtable.on_unload?,
            register_scripts: vtable.register_scripts?,
            get_version: vtable.get_version?,
            create_runtime_application: vtable.create_runtime_application,
        })
    }
}

/// A loaded module
pub struct ModuleDescriptor {
    handle: ModuleHandle,
    name: String,
    version: u32,
    state: ModuleState,
    calls: ModuleCalls,
    instance: Foreign<FfiScriptModule>,
    library: Arc<ModuleLibrary>,
}

impl ModuleDescriptor {
    pub fn handle(&self) -> ModuleHandle {
        self.handle
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// File the module binary was loaded from
    pub fn path(&self) -> Option<&Path> {
        self.library.path()
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn state(&self) -> ModuleState {
        self.state
    }

    /// Whether the module exposes `create_runtime_application`
    pub fn provides_application(&self) -> bool {
        self.calls.create_runtime_application.is_some()
    }
}

/// Collects registrations from one `register_scripts` call
struct RegistrationSession<'a> {
    scripts: &'a mut ScriptRegistry,
    module: ModuleHandle,
    library: &'a Arc<ModuleLibrary>,
    failure: Option<RegistryError>,
}

impl RegistrationSession<'_> {
    fn register(&mut self, name: *const c_char, factory: FfiScriptFactory) -> FfiStatus {
        let name = if name.is_null() {
            None
        } else {
            unsafe { CStr::from_ptr(name) }.to_str().ok()
        };
        let Some(name) = name.filter(|n| !n.is_empty()) else {
            self.fail(RegistryError::InvalidScript {
                name: String::new(),
                reason: "script name is null, empty or not UTF-8".to_string(),
            });
            return FfiStatus::INVALID_ARGUMENT;
        };

        match self.scripts.register(name, self.module, factory, self.library) {
            Ok(()) => FfiStatus::OK,
            Err(err) => {
                let status = match err {
                    RegistryError::DuplicateScript(_) => FfiStatus::DUPLICATE_SCRIPT,
                    _ => FfiStatus::INVALID_ARGUMENT,
                };
                log::error!("Module '{}': {}", self.library.name(), err);
                self.fail(err);
                status
            }
        }
    }

    fn fail(&mut self, err: RegistryError) {
        if self.failure.is_none() {
            self.failure = Some(err);
        }
    }
}

unsafe extern "C" fn register_script_callback(
    context: *mut c_void,
    name: *const c_char,
    factory: FfiScriptFactory,
) -> FfiStatus {
    match (context as *mut RegistrationSession<'_>).as_mut() {
        Some(session) => session.register(name, factory),
        None => FfiStatus::INVALID_ARGUMENT,
    }
}

/// Loads, activates and unloads game modules
pub struct ModuleLoader {
    config: LoaderConfig,
    modules: BTreeMap<ModuleHandle, ModuleDescriptor>,
    /// Unloaded handles and the name of the module they referred to
    retired: HashMap<ModuleHandle, String>,
    activation_order: Vec<ModuleHandle>,
    scripts: ScriptRegistry,
    next_id: u64,
}

impl Default for ModuleLoader {
    fn default() -> Self {
        Self::new(LoaderConfig::default())
    }
}

impl ModuleLoader {
    pub fn new(config: LoaderConfig) -> Self {
        Self {
            config,
            modules: BTreeMap::new(),
            retired: HashMap::new(),
            activation_order: Vec::new(),
            scripts: ScriptRegistry::new(),
            next_id: 1,
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Load a module binary from disk
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<ModuleHandle> {
        let shadow = self
            .config
            .shadow_copy
            .then(|| self.config.shadow_directory.as_path());
        let binary = DynamicBinary::open_with(path, shadow)?;
        self.load_binary(binary)
    }

    /// Load from any module binary
    pub fn load_binary(&mut self, binary: impl ModuleBinary + 'static) -> Result<ModuleHandle> {
        let library = Arc::new(ModuleLibrary::new(Box::new(binary)));
        let name = library.name().to_string();

        // No module code runs before both entry points resolve
        let entry = library.entry_points()?;

        let raw = unsafe { (entry.create)() };
        let instance = unsafe { Foreign::from_raw(raw, entry.destroy, Arc::clone(&library)) }
            .ok_or_else(|| {
                LoadError::construction_failed(&name, "CreateScriptModule returned null")
            })?;

        let Some(calls) = ModuleCalls::resolve(&instance.header().vtable) else {
            library.deactivate();
            return Err(LoadError::construction_failed(&name, "module vtable is incomplete").into());
        };

        let version = unsafe { (calls.get_version)(instance.as_ptr()) };
        if !self.config.accepted_versions.contains(version) {
            log::error!(
                "Module '{}' version {} is outside {}",
                name,
                version,
                self.config.accepted_versions
            );
            library.deactivate();
            return Err(LoadError::VersionMismatch {
                module: name,
                found: version,
                accepted: self.config.accepted_versions,
            }
            .into());
        }

        let handle = ModuleHandle(self.next_id);
        self.next_id += 1;

        log::info!("Loaded module '{}' v{} as {}", name, version, handle);
        self.modules.insert(
            handle,
            ModuleDescriptor {
                handle,
                name,
                version,
                state: ModuleState::Loaded,
                calls,
                instance,
                library,
            },
        );
        Ok(handle)
    }

    /// Run `on_load` and `register_scripts`.
    ///
    /// On failure the module is rolled back, destroyed and its handle
    /// retired.
    pub fn activate(&mut self, handle: ModuleHandle) -> Result<()> {
        let Some(descriptor) = self.modules.get(&handle) else {
            return Err(self.inactive(handle).into());
        };
        match descriptor.state {
            ModuleState::Loaded => {}
            ModuleState::Active => return Ok(()),
            _ => {
                return Err(
                    LifecycleError::OperationOnInactiveModule(descriptor.name.clone()).into(),
                )
            }
        }

        let calls = descriptor.calls;
        let module = descriptor.instance.as_ptr();
        let library = Arc::clone(&descriptor.library);
        let name = descriptor.name.clone();

        let status = unsafe { (calls.on_load)(module) };
        if !status.is_ok() {
            log::error!("OnLoad of module '{}' failed with {}", name, status);
            self.retire(handle);
            return Err(LoadError::OnLoadFailed { module: name, status }.into());
        }

        let mut session = RegistrationSession {
            scripts: &mut self.scripts,
            module: handle,
            library: &library,
            failure: None,
        };
        let mut registrar = FfiScriptRegistrar {
            context: &mut session as *mut RegistrationSession<'_> as *mut c_void,
            register: Some(register_script_callback),
        };
        let status = unsafe { (calls.register_scripts)(module, &mut registrar) };
        let failure = session.failure.take();

        if !status.is_ok() || failure.is_some() {
            let rolled_back = self.scripts.invalidate_all(handle);
            log::error!(
                "RegisterScripts of module '{}' failed with {}, rolled back {} scripts",
                name,
                status,
                rolled_back
            );
            unsafe { (calls.on_unload)(module) };
            self.retire(handle);
            return Err(match failure {
                Some(err) => ModuleError::Registry(err),
                None => LoadError::RegisterScriptsFailed { module: name, status }.into(),
            });
        }

        if let Some(descriptor) = self.modules.get_mut(&handle) {
            descriptor.state = ModuleState::Active;
        }
        self.activation_order.push(handle);
        log::info!(
            "Activated module '{}' with {} scripts",
            name,
            self.scripts.scripts_of(handle).len()
        );
        Ok(())
    }

    /// Unload a loaded or active module
    pub fn unload(&mut self, handle: ModuleHandle) -> Result<()> {
        let Some(descriptor) = self.modules.get_mut(&handle) else {
            return Err(self.missing(handle).into());
        };

        let was_active = descriptor.state == ModuleState::Active;
        descriptor.state = ModuleState::Unloading;
        descriptor.library.deactivate();
        log::info!("Unloading module '{}'", descriptor.name);

        if was_active {
            unsafe { (descriptor.calls.on_unload)(descriptor.instance.as_ptr()) };
        }

        self.scripts.invalidate_all(handle);
        self.activation_order.retain(|h| *h != handle);

        if let Some(descriptor) = self.modules.remove(&handle) {
            let ModuleDescriptor {
                name,
                instance,
                library,
                ..
            } = descriptor;

            // Destroy through DestroyScriptModule, then release the binary
            drop(instance);
            let outstanding = Arc::strong_count(&library) - 1;
            if outstanding > 0 {
                log::warn!(
                    "{} objects created by module '{}' outlive its unload; \
                     its code stays mapped until they are dropped",
                    outstanding,
                    name
                );
            }
            drop(library);

            log::info!("Unloaded module '{}'", name);
            self.retired.insert(handle, name);
        }
        Ok(())
    }

    /// Unload everything, most recently activated first
    pub fn unload_all(&mut self) {
        let mut order: Vec<ModuleHandle> = self.activation_order.iter().rev().copied().collect();
        // Loaded but never activated, newest first
        order.extend(
            self.modules
                .keys()
                .rev()
                .filter(|h| !self.activation_order.contains(h))
                .copied()
                .collect::<Vec<_>>(),
        );

        for handle in order {
            if let Err(e) = self.unload(handle) {
                log::error!("Failed to unload module {}: {}", handle, e);
            }
        }
    }

    /// Ask a module for a runtime application; `None` if it supplies none
    pub fn create_runtime_application(
        &self,
        handle: ModuleHandle,
        spec: &ApplicationSpec,
    ) -> Result<Option<ForeignApplication>> {
        let descriptor = self.modules.get(&handle).ok_or_else(|| self.inactive(handle))?;
        if !matches!(descriptor.state, ModuleState::Loaded | ModuleState::Active) {
            return Err(LifecycleError::OperationOnInactiveModule(descriptor.name.clone()).into());
        }

        let Some(create) = descriptor.calls.create_runtime_application else {
            return Ok(None);
        };

        let ffi_spec = spec.to_ffi();
        let raw = unsafe { create(descriptor.instance.as_ptr(), ffi_spec.as_ptr()) };
        if raw.is_null() {
            return Ok(None);
        }

        let app = unsafe { ForeignApplication::from_raw(raw, Arc::clone(&descriptor.library)) }?;
        Ok(Some(app))
    }

    /// State of a handle; `None` if it was never issued
    pub fn state(&self, handle: ModuleHandle) -> Option<ModuleState> {
        match self.modules.get(&handle) {
            Some(descriptor) => Some(descriptor.state),
            None if self.retired.contains_key(&handle) => Some(ModuleState::Unloaded),
            None => None,
        }
    }

    pub fn descriptor(&self, handle: ModuleHandle) -> Option<&ModuleDescriptor> {
        self.modules.get(&handle)
    }

    /// Live module by name
    pub fn find(&self, name: &str) -> Option<ModuleHandle> {
        self.modules
            .values()
            .find(|descriptor| descriptor.name == name)
            .map(|descriptor| descriptor.handle)
    }

    /// Active modules in activation order
    pub fn activation_order(&self) -> &[ModuleHandle] {
        &self.activation_order
    }

    /// Live modules in load order
    pub fn modules(&self) -> impl Iterator<Item = &ModuleDescriptor> {
        self.modules.values()
    }

    pub fn scripts(&self) -> &ScriptRegistry {
        &self.scripts
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    fn missing(&self, handle: ModuleHandle) -> LifecycleError {
        if self.retired.contains_key(&handle) {
            LifecycleError::DoubleUnload(handle)
        } else {
            LifecycleError::UnloadUnknownHandle(handle)
        }
    }

    fn inactive(&self, handle: ModuleHandle) -> LifecycleError {
        match self.retired.get(&handle) {
            Some(name) => LifecycleError::OperationOnInactiveModule(name.clone()),
            None => LifecycleError::UnknownHandle(handle),
        }
    }

    /// Drop a module that failed activation
    fn retire(&mut self, handle: ModuleHandle) {
        if let Some(descriptor) = self.modules.remove(&handle) {
            descriptor.library.deactivate();
            self.activation_order.retain(|h| *h != handle);
            self.retired.insert(handle, descriptor.name.clone());
            drop(descriptor);
        }
    }
}

impl Drop for ModuleLoader {
    fn drop(&mut self) {
        if !self.modules.is_empty() {
            log::debug!("Module loader dropped with {} modules, unloading", self.modules.len());
            self.unload_all();
        }
    }
}
